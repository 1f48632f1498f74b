//! Browser automation seam
//!
//! The authentication flow only needs a handful of page operations: load
//! Teams, check whether the user is signed in, export the storage state and
//! close. Those are expressed as traits so the orchestrator can be driven by
//! a real WebDriver session or by a scripted page in tests.

mod webdriver;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::SessionSnapshot;

pub use webdriver::WebDriverBrowser;

/// Teams web client entry point.
pub const TEAMS_URL: &str = "https://teams.microsoft.com/v2/";

/// URL fragments that identify an identity-provider sign-in page.
pub const LOGIN_URL_PATTERNS: &[&str] = &[
    "login.microsoftonline.com",
    "login.microsoft.com",
    "login.live.com",
    "/oauth2/",
    "/adfs/",
];

/// Elements that only exist once the Teams client has signed the user in.
pub const AUTHENTICATED_MARKERS: &[&str] = &[
    "[data-tid='app-bar']",
    "[data-tid='app-layout-area--nav']",
    "[data-tid='chat-list']",
    "[data-tid='searchInputField']",
    "#ms-searchux-input",
];

/// Search box candidates, newest client layout first.
pub const SEARCH_INPUT_SELECTORS: &[&str] = &[
    "[data-tid='searchInputField']",
    "#ms-searchux-input",
    "input[type='search']",
];

/// Whether `url` is an identity-provider sign-in page.
pub fn is_login_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    LOGIN_URL_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Starts browser sessions.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Open a fresh browser context and page, optionally seeding it with a
    /// previously captured session.
    async fn launch(
        &self,
        headless: bool,
        restore: Option<&SessionSnapshot>,
    ) -> Result<Box<dyn BrowserPage>>;

    /// Wipe persistent browser state (profile cookies, storage and cache)
    /// so the next launch starts signed out everywhere.
    async fn reset_profile(&self) -> Result<()>;
}

/// A single open page together with its browser context.
#[async_trait]
pub trait BrowserPage: Send {
    async fn goto(&mut self, url: &str) -> Result<()>;

    async fn current_url(&mut self) -> Result<String>;

    /// Whether any of the CSS selectors matches an element on the page.
    async fn has_any_of(&mut self, selectors: &[&str]) -> Result<bool>;

    /// Cookies of every domain plus local storage of the current origin.
    ///
    /// WebDriver can only read local storage of the loaded document, so
    /// storage of other origins (such as the identity provider) is not
    /// captured.
    async fn export_snapshot(&mut self) -> Result<SessionSnapshot>;

    /// Remove every cookie in the browser, for all domains.
    async fn clear_cookies(&mut self) -> Result<()>;

    /// Submit a query through the Teams search box.
    async fn run_search(&mut self, query: &str) -> Result<()>;

    /// Close the page, its context and the browser process.
    async fn close(self: Box<Self>) -> Result<()>;
}

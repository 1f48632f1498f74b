//! Chrome over WebDriver (chromedriver)

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thirtyfour::extensions::cdp::ChromeDevTools;
use thirtyfour::prelude::*;
use thirtyfour::Cookie;
use tokio::process::{Child, Command};

use super::{BrowserDriver, BrowserPage, SEARCH_INPUT_SELECTORS, TEAMS_URL};
use crate::config::Settings;
use crate::models::{
    OriginStorage, SessionCookie, SessionSnapshot, StorageEntry, TEAMS_ORIGIN,
};

/// Origins whose storage is wiped when all sign-in state is cleared.
const SIGN_IN_ORIGINS: &[&str] = &[
    TEAMS_ORIGIN,
    "https://login.microsoftonline.com",
    "https://login.microsoft.com",
    "https://login.live.com",
];

/// WebDriver "Enter" key code point.
const ENTER_KEY: &str = "\u{E007}";

const EXPORT_LOCAL_STORAGE: &str = "return Object.entries(window.localStorage);";
const IMPORT_LOCAL_STORAGE: &str =
    "for (const [k, v] of arguments[0]) { window.localStorage.setItem(k, v); } return true;";

/// Launches Chrome through chromedriver, spawning chromedriver on demand.
pub struct WebDriverBrowser {
    settings: Settings,
    profile_dir: PathBuf,
}

impl WebDriverBrowser {
    pub fn new(settings: Settings, profile_dir: PathBuf) -> Self {
        Self {
            settings,
            profile_dir,
        }
    }

    async fn chromedriver_running(&self) -> bool {
        let url = format!("{}/status", self.settings.chromedriver_url.trim_end_matches('/'));
        reqwest::get(&url)
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    /// Start chromedriver unless one is already listening. The returned
    /// child is killed when dropped.
    async fn ensure_chromedriver(&self) -> Result<Option<Child>> {
        if self.chromedriver_running().await {
            return Ok(None);
        }

        let port = url::Url::parse(&self.settings.chromedriver_url)
            .context("Invalid chromedriver_url")?
            .port_or_known_default()
            .context("chromedriver_url has no port")?;

        tracing::debug!("Spawning {} on port {}", self.settings.chromedriver_path, port);
        let child = Command::new(&self.settings.chromedriver_path)
            .arg(format!("--port={}", port))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", self.settings.chromedriver_path))?;

        for _ in 0..50 {
            if self.chromedriver_running().await {
                return Ok(Some(child));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        anyhow::bail!("chromedriver did not become ready")
    }
}

#[async_trait]
impl BrowserDriver for WebDriverBrowser {
    async fn launch(
        &self,
        headless: bool,
        restore: Option<&SessionSnapshot>,
    ) -> Result<Box<dyn BrowserPage>> {
        let chromedriver = self.ensure_chromedriver().await?;

        let mut caps = DesiredCapabilities::chrome();
        caps.add_arg(&format!("--user-data-dir={}", self.profile_dir.display()))?;
        caps.add_arg("--window-size=1280,900")?;
        caps.add_arg("--disable-infobars")?;
        if headless {
            caps.add_arg("--headless=new")?;
        }

        let driver = WebDriver::new(self.settings.chromedriver_url.as_str(), caps)
            .await
            .context("Failed to start browser session")?;

        let mut page = WebDriverPage {
            driver,
            chromedriver,
        };

        if let Some(snapshot) = restore {
            if let Err(e) = page.restore(snapshot).await {
                tracing::warn!("Could not restore saved session into browser: {:#}", e);
            }
        }

        Ok(Box::new(page))
    }

    async fn reset_profile(&self) -> Result<()> {
        let dir = &self.profile_dir;
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => tracing::info!("Removed browser profile {}", dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to remove browser profile {}", dir.display()))
            }
        }
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
                .await
                .with_context(|| format!("Failed to set permissions on {}", dir.display()))?;
        }
        Ok(())
    }
}

struct WebDriverPage {
    driver: WebDriver,
    chromedriver: Option<Child>,
}

impl WebDriverPage {
    fn devtools(&self) -> ChromeDevTools {
        ChromeDevTools::new(self.driver.handle.clone())
    }

    /// Cookies of every domain through DevTools, falling back to the
    /// current document's cookies when DevTools is unavailable.
    async fn all_cookies(&mut self) -> Result<Vec<SessionCookie>> {
        match self.devtools().execute_cdp("Network.getAllCookies").await {
            Ok(value) => cookies_from_devtools(value),
            Err(e) => {
                tracing::debug!("DevTools cookie export failed ({}), using current domain", e);
                self.document_cookies().await
            }
        }
    }

    async fn document_cookies(&mut self) -> Result<Vec<SessionCookie>> {
        Ok(self
            .driver
            .get_all_cookies()
            .await
            .context("Failed to read browser cookies")?
            .into_iter()
            .filter_map(|c| {
                let mut value = serde_json::to_value(&c).ok()?;
                if let serde_json::Value::Object(map) = &mut value {
                    map.retain(|_, v| !v.is_null());
                }
                serde_json::from_value::<SessionCookie>(value).ok()
            })
            .collect())
    }

    /// Seed cookies and local storage for the Teams origin. WebDriver can
    /// only set state for the origin currently loaded.
    async fn restore(&mut self, snapshot: &SessionSnapshot) -> Result<()> {
        self.driver.goto(TEAMS_URL).await?;

        let mut restored = 0usize;
        for cookie in snapshot.cookies.iter().filter(|c| c.is_teams()) {
            let wire = serde_json::json!({
                "name": cookie.name,
                "value": cookie.value,
                "domain": cookie.domain,
                "path": cookie.path,
                "secure": cookie.secure,
                "httpOnly": cookie.http_only,
                "expiry": cookie.expires.filter(|e| *e > 0.0).map(|e| e as i64),
            });
            let parsed: Cookie = match serde_json::from_value(wire) {
                Ok(c) => c,
                Err(e) => {
                    tracing::debug!("Skipping cookie {}: {}", cookie.name, e);
                    continue;
                }
            };
            match self.driver.add_cookie(parsed).await {
                Ok(()) => restored += 1,
                Err(e) => tracing::debug!("Browser rejected cookie {}: {}", cookie.name, e),
            }
        }

        let entries: Vec<(String, String)> = snapshot
            .teams_entries()
            .iter()
            .map(|e| (e.name.clone(), e.value.clone()))
            .collect();
        self.driver
            .execute(IMPORT_LOCAL_STORAGE, vec![serde_json::to_value(&entries)?])
            .await
            .context("Failed to restore local storage")?;

        tracing::debug!(
            "Restored {} cookies and {} storage entries",
            restored,
            entries.len()
        );
        Ok(())
    }
}

#[async_trait]
impl BrowserPage for WebDriverPage {
    async fn goto(&mut self, url: &str) -> Result<()> {
        self.driver
            .goto(url)
            .await
            .with_context(|| format!("Failed to navigate to {}", url))
    }

    async fn current_url(&mut self) -> Result<String> {
        Ok(self.driver.current_url().await?.to_string())
    }

    async fn has_any_of(&mut self, selectors: &[&str]) -> Result<bool> {
        for selector in selectors {
            if !self.driver.find_all(By::Css(*selector)).await?.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn export_snapshot(&mut self) -> Result<SessionSnapshot> {
        let cookies = self.all_cookies().await?;

        let ret = self
            .driver
            .execute(EXPORT_LOCAL_STORAGE, Vec::new())
            .await
            .context("Failed to read local storage")?;
        let pairs: Vec<(String, String)> =
            serde_json::from_value(ret.json().clone()).context("Unexpected local storage shape")?;

        let origin = self
            .driver
            .current_url()
            .await
            .map(|u| u.origin().ascii_serialization())
            .unwrap_or_else(|_| TEAMS_ORIGIN.to_string());

        Ok(SessionSnapshot {
            cookies,
            origins: vec![OriginStorage {
                origin,
                local_storage: pairs
                    .into_iter()
                    .map(|(name, value)| StorageEntry { name, value })
                    .collect(),
            }],
        }
        .normalize())
    }

    async fn clear_cookies(&mut self) -> Result<()> {
        // WebDriver's delete-all only covers the current document's domain.
        let devtools = self.devtools();
        devtools
            .execute_cdp("Network.clearBrowserCookies")
            .await
            .context("Failed to clear browser cookies")?;
        for origin in SIGN_IN_ORIGINS {
            devtools
                .execute_cdp_with_params(
                    "Storage.clearDataForOrigin",
                    serde_json::json!({ "origin": origin, "storageTypes": "all" }),
                )
                .await
                .with_context(|| format!("Failed to clear storage for {}", origin))?;
        }
        Ok(())
    }

    async fn run_search(&mut self, query: &str) -> Result<()> {
        for selector in SEARCH_INPUT_SELECTORS {
            let Ok(input) = self.driver.find(By::Css(*selector)).await else {
                continue;
            };
            input.click().await?;
            input.send_keys(query).await?;
            input.send_keys(ENTER_KEY).await?;
            tracing::debug!("Submitted browser search via {}", selector);
            return Ok(());
        }
        anyhow::bail!("Teams search box not found")
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let WebDriverPage {
            driver,
            chromedriver,
        } = *self;
        driver.quit().await.context("Failed to close browser")?;
        if let Some(mut child) = chromedriver {
            let _ = child.kill().await;
        }
        Ok(())
    }
}

#[derive(serde::Deserialize)]
struct DevToolsCookies {
    #[serde(default)]
    cookies: Vec<serde_json::Value>,
}

/// Parse a `Network.getAllCookies` result, skipping malformed cookies.
fn cookies_from_devtools(value: serde_json::Value) -> Result<Vec<SessionCookie>> {
    let parsed: DevToolsCookies =
        serde_json::from_value(value).context("Unexpected DevTools cookie shape")?;
    Ok(parsed
        .cookies
        .into_iter()
        .filter_map(|c| serde_json::from_value(c).ok())
        .collect())
}

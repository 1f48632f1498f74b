//! Browser-driven authentication lifecycle
//!
//! The [`Authenticator`] owns the saved session and the search token cache,
//! hands out per-audience credentials, and runs browser cycles when a fresh
//! session is needed. At most one browser cycle runs per process; callers
//! that arrive while one is in flight wait for its outcome instead of
//! launching a second browser.

use anyhow::{Context, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;

use super::cache::TokenCache;
use super::extract;
use super::rejected::RejectedTokens;
use super::tokens::{now_millis, now_secs, CachedToken};
use super::AuthError;
use crate::browser::{
    is_login_url, BrowserDriver, BrowserPage, WebDriverBrowser, AUTHENTICATED_MARKERS, TEAMS_URL,
};
use crate::config::{Paths, Settings};
use crate::models::{Audience, CredentialBundle, RegionConfig, SessionSnapshot, UserIdentity};
use crate::store::{Sealer, SecureStore};

type Cycle = Shared<BoxFuture<'static, Result<(), AuthError>>>;

/// Where the authentication flow currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    BrowserStarting,
    AwaitingManualLogin,
    Authenticated,
}

#[derive(Debug, Clone)]
enum CycleKind {
    Login,
    ForcedLogin,
    /// Sign in if needed, then run a search in the web client so it mints
    /// a search token.
    Search(String),
}

enum PageState {
    SignedIn,
    LoginPage,
    Loading,
}

enum Outcome {
    Captured,
    /// The headless attempt landed on a sign-in page.
    NeedsInteractive,
}

struct Inner {
    settings: Settings,
    session: SecureStore<SessionSnapshot>,
    cache: TokenCache,
    rejected: RejectedTokens,
    browser: Arc<dyn BrowserDriver>,
    state: Mutex<AuthState>,
    in_flight: Mutex<Option<Cycle>>,
}

/// Credential provider and browser login orchestrator.
#[derive(Clone)]
pub struct Authenticator {
    inner: Arc<Inner>,
}

impl Authenticator {
    pub fn new(
        settings: Settings,
        session: SecureStore<SessionSnapshot>,
        cache: TokenCache,
        rejected: RejectedTokens,
        browser: Arc<dyn BrowserDriver>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                session,
                cache,
                rejected,
                browser,
                state: Mutex::new(AuthState::Idle),
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Build an authenticator over the on-disk layout with a Chrome
    /// WebDriver browser.
    pub fn open(paths: &Paths, settings: Settings) -> Result<Self> {
        paths.ensure_dirs()?;
        let (sealer, generated) = Sealer::load_or_create(&paths.key_file())
            .context("Failed to load storage key")?;
        let session = SecureStore::new(paths.session_file(), sealer.clone());
        let cache = TokenCache::new(SecureStore::<CachedToken>::new(
            paths.token_cache_file(),
            sealer.clone(),
        ));
        let rejected = RejectedTokens::new(SecureStore::new(paths.rejected_tokens_file(), sealer));
        let browser = Arc::new(WebDriverBrowser::new(
            settings.clone(),
            paths.browser_profile_dir(),
        ));
        let auth = Self::new(settings, session, cache, rejected, browser);
        if generated {
            // Files sealed under a previous key can never be opened again.
            auth.inner.discard_sealed_files();
        }
        Ok(auth)
    }

    pub fn state(&self) -> AuthState {
        self.inner.state()
    }

    /// The saved session, if one exists and can be read.
    pub fn load_snapshot(&self) -> Option<SessionSnapshot> {
        self.inner.session.read().map(SessionSnapshot::normalize)
    }

    /// Like [`load_snapshot`](Self::load_snapshot), but distinguishes a
    /// missing session from one that exists and cannot be read.
    pub fn check_session(&self) -> Result<Option<SessionSnapshot>, AuthError> {
        match self.load_snapshot() {
            Some(snapshot) => Ok(Some(snapshot)),
            None if self.inner.session.exists() => Err(AuthError::SessionUnreadable),
            None => Ok(None),
        }
    }

    /// The cached search token record, valid or not.
    pub fn cached_search_token(&self) -> Option<CachedToken> {
        self.inner.cache.cached()
    }

    /// Hours since the session was last captured.
    pub fn session_age_hours(&self) -> Option<f64> {
        self.inner.session.age_hours()
    }

    /// A session older than the configured maximum is never restored into
    /// the browser, even if its tokens are still valid.
    pub fn is_session_stale(&self) -> bool {
        self.inner.is_stale()
    }

    /// The credential for `audience`, extracted from the saved session.
    ///
    /// Search credentials go through the token cache. Credentials a service
    /// has rejected are not handed out again. Never opens a browser.
    pub fn get_credential(&self, audience: Audience) -> Result<CredentialBundle, AuthError> {
        match self.current_credential(audience) {
            Some(bundle) if self.inner.rejected.is_rejected(&bundle) => {
                tracing::debug!("Saved {} credential was rejected earlier", audience);
                if audience == Audience::Search {
                    self.inner.invalidate_cache();
                }
                Err(AuthError::AuthRequired { audience })
            }
            Some(bundle) => Ok(bundle),
            None => Err(AuthError::AuthRequired { audience }),
        }
    }

    /// The credential the saved session yields, rejected or not.
    fn current_credential(&self, audience: Audience) -> Option<CredentialBundle> {
        match audience {
            Audience::Search => self
                .inner
                .cache
                .get_valid_search_token(|| self.load_snapshot(), now_millis())
                .map(CredentialBundle::Search),
            _ => self
                .load_snapshot()
                .and_then(|snapshot| extract::extract(&snapshot, audience, now_secs())),
        }
    }

    pub fn user_identity(&self) -> Option<UserIdentity> {
        self.load_snapshot()
            .and_then(|s| extract::extract_user_identity(&s))
    }

    /// Region routing for this tenant, defaulting to `amer`.
    pub fn region_config(&self) -> RegionConfig {
        self.load_snapshot()
            .and_then(|s| extract::extract_region_config(&s))
            .unwrap_or_default()
    }

    /// Forget a credential the remote service rejected.
    ///
    /// The rejected credential is remembered until the next session capture,
    /// so it is neither handed out again nor counted as a usable session.
    pub fn invalidate(&self, audience: Audience) {
        if let Some(bundle) = self.current_credential(audience) {
            if let Err(e) = self.inner.rejected.reject(&bundle) {
                tracing::warn!("Failed to record rejected {} credential: {:#}", audience, e);
            }
        }
        if audience == Audience::Search {
            self.inner.invalidate_cache();
        }
    }

    /// Make sure a fresh, usable session exists, running a browser cycle
    /// if it does not.
    pub async fn ensure_authenticated(&self) -> Result<(), AuthError> {
        if self.has_usable_session() {
            tracing::debug!("Saved session is usable");
            return Ok(());
        }
        self.run_exclusive(CycleKind::Login).await
    }

    /// Discard the saved session and sign in from scratch.
    pub async fn force_new_login(&self) -> Result<(), AuthError> {
        self.run_exclusive(CycleKind::ForcedLogin).await
    }

    /// Run `query` in the web client so it acquires a search token, then
    /// capture the session.
    pub async fn search_via_browser(&self, query: &str) -> Result<(), AuthError> {
        self.run_exclusive(CycleKind::Search(query.to_string()))
            .await
    }

    /// Remove the saved session and the token cache.
    pub fn logout(&self) -> Result<()> {
        self.inner.session.clear()?;
        self.inner.cache.invalidate()?;
        self.inner.rejected.clear()?;
        self.inner.set_state(AuthState::Idle);
        Ok(())
    }

    /// Whether the saved session is fresh and yields a chat or messaging
    /// credential that has not been rejected.
    pub fn has_usable_session(&self) -> bool {
        if self.inner.is_stale() {
            return false;
        }
        [Audience::Chat, Audience::Messaging]
            .into_iter()
            .any(|audience| self.get_credential(audience).is_ok())
    }

    /// Run a browser cycle, or join the one already in flight.
    async fn run_exclusive(&self, kind: CycleKind) -> Result<(), AuthError> {
        loop {
            let (cycle, joined) = {
                let mut slot = self
                    .inner
                    .in_flight
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                match slot.as_ref() {
                    Some(existing) => (existing.clone(), true),
                    None => {
                        // The cycle runs on its own task, so a caller that
                        // stops waiting does not leave the browser open.
                        let inner = Arc::clone(&self.inner);
                        let kind = kind.clone();
                        let task = tokio::spawn(async move {
                            let result = inner.run_cycle(kind).await;
                            inner.release_slot();
                            result
                        });
                        let inner = Arc::clone(&self.inner);
                        let cycle = async move {
                            task.await.unwrap_or_else(|e| {
                                inner.release_slot();
                                Err(AuthError::Browser(format!(
                                    "Browser cycle ended abnormally: {}",
                                    e
                                )))
                            })
                        }
                        .boxed()
                        .shared();
                        *slot = Some(cycle.clone());
                        (cycle, false)
                    }
                }
            };

            if joined {
                tracing::debug!("Waiting for the browser cycle already in progress");
            }
            let result = cycle.await;

            // A forced login must not be satisfied by a cycle that may have
            // restored the old session.
            if joined && matches!(kind, CycleKind::ForcedLogin) {
                continue;
            }
            return result;
        }
    }
}

impl Inner {
    fn state(&self) -> AuthState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: AuthState) {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != state {
            tracing::debug!("Auth state {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    fn release_slot(&self) {
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn invalidate_cache(&self) {
        if let Err(e) = self.cache.invalidate() {
            tracing::warn!("Failed to invalidate search token cache: {:#}", e);
        }
    }

    /// Remove every sealed file after the store key was replaced.
    fn discard_sealed_files(&self) {
        if let Err(e) = self.session.clear() {
            tracing::warn!("Failed to remove saved session: {:#}", e);
        }
        self.invalidate_cache();
        if let Err(e) = self.rejected.clear() {
            tracing::warn!("Failed to remove rejected credential list: {:#}", e);
        }
    }

    fn is_stale(&self) -> bool {
        match self.session.age_hours() {
            Some(age) => age > self.settings.session_max_age_hours,
            None => true,
        }
    }

    /// The saved session when it is fresh enough to restore.
    fn restorable_snapshot(&self) -> Option<SessionSnapshot> {
        if self.is_stale() {
            if self.session.exists() {
                tracing::info!("Saved session is too old to restore, signing in again");
            }
            return None;
        }
        self.session.read().map(SessionSnapshot::normalize)
    }

    async fn run_cycle(&self, kind: CycleKind) -> Result<(), AuthError> {
        let forced = matches!(kind, CycleKind::ForcedLogin);
        if forced {
            self.discard_sealed_files();
            // The browser profile keeps identity-provider cookies between
            // runs; without a reset the old account signs straight back in.
            self.set_state(AuthState::BrowserStarting);
            if let Err(e) = self.browser.reset_profile().await {
                self.set_state(AuthState::Idle);
                return Err(browser_error(e));
            }
        }

        let restore = if forced {
            None
        } else {
            self.restorable_snapshot()
        };
        let mut headless = self.settings.headless && restore.is_some();

        loop {
            self.set_state(AuthState::BrowserStarting);
            tracing::debug!(
                "Launching browser (headless: {}, restoring: {})",
                headless,
                restore.is_some()
            );
            let mut page = match self.browser.launch(headless, restore.as_ref()).await {
                Ok(page) => page,
                Err(e) => {
                    self.set_state(AuthState::Idle);
                    return Err(browser_error(e));
                }
            };

            let outcome = self.drive(page.as_mut(), &kind, headless, forced).await;

            if let Err(e) = page.close().await {
                tracing::warn!("Failed to close browser: {:#}", e);
            }
            self.set_state(AuthState::Idle);

            match outcome? {
                Outcome::Captured => return Ok(()),
                Outcome::NeedsInteractive => {
                    tracing::info!("Saved session was not accepted, opening a browser to sign in");
                    headless = false;
                }
            }
        }
    }

    async fn drive(
        &self,
        page: &mut dyn BrowserPage,
        kind: &CycleKind,
        headless: bool,
        forced: bool,
    ) -> Result<Outcome, AuthError> {
        if forced {
            page.clear_cookies().await.map_err(browser_error)?;
        }
        page.goto(TEAMS_URL).await.map_err(browser_error)?;

        let poll = self.settings.poll_interval();
        if !wait_for_page(page, self.settings.page_load_timeout(), poll).await {
            if headless {
                return Ok(Outcome::NeedsInteractive);
            }

            self.set_state(AuthState::AwaitingManualLogin);
            eprintln!("Sign in to Microsoft Teams in the browser window to continue.");
            let timeout = self.settings.login_timeout();
            if tokio::time::timeout(timeout, wait_until_signed_in(page, poll))
                .await
                .is_err()
            {
                return Err(AuthError::LoginTimeout {
                    secs: timeout.as_secs(),
                });
            }
        }

        self.set_state(AuthState::Authenticated);

        if let CycleKind::Search(query) = kind {
            page.run_search(query).await.map_err(browser_error)?;
        }

        // The web client writes tokens to storage shortly after loading.
        tokio::time::sleep(self.settings.settle_delay()).await;

        let snapshot = page
            .export_snapshot()
            .await
            .map_err(browser_error)?
            .normalize();
        self.session
            .write(&snapshot)
            .map_err(|e| AuthError::Storage(format!("{:#}", e)))?;
        self.invalidate_cache();
        if let Err(e) = self.rejected.clear() {
            tracing::warn!("Failed to clear rejected credentials: {:#}", e);
        }

        tracing::info!(
            "Session captured to {} ({} cookies, {} origins)",
            self.session.path().display(),
            snapshot.cookies.len(),
            snapshot.origins.len()
        );
        Ok(Outcome::Captured)
    }
}

fn browser_error(e: anyhow::Error) -> AuthError {
    AuthError::Browser(format!("{:#}", e))
}

async fn page_state(page: &mut dyn BrowserPage) -> PageState {
    match page.current_url().await {
        Ok(url) if is_login_url(&url) => return PageState::LoginPage,
        Ok(_) => {}
        Err(e) => {
            tracing::debug!("Could not read page URL: {:#}", e);
            return PageState::Loading;
        }
    }
    match page.has_any_of(AUTHENTICATED_MARKERS).await {
        Ok(true) => PageState::SignedIn,
        Ok(false) => PageState::Loading,
        Err(e) => {
            tracing::debug!("Could not inspect page: {:#}", e);
            PageState::Loading
        }
    }
}

/// Wait for the page to settle on either the signed-in client or a sign-in
/// page. Returns whether the user is signed in.
async fn wait_for_page(
    page: &mut dyn BrowserPage,
    limit: std::time::Duration,
    poll: std::time::Duration,
) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        match page_state(page).await {
            PageState::SignedIn => return true,
            PageState::LoginPage => return false,
            PageState::Loading => {}
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}

async fn wait_until_signed_in(page: &mut dyn BrowserPage, poll: std::time::Duration) {
    loop {
        if let PageState::SignedIn = page_state(page).await {
            return;
        }
        tokio::time::sleep(poll).await;
    }
}

//! Configuration and on-disk layout

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the data directory.
pub const HOME_ENV: &str = "TEAMS_AGENT_HOME";

/// Runtime settings, optionally read from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// WebDriver endpoint (chromedriver).
    pub chromedriver_url: String,
    /// chromedriver binary to spawn when nothing is listening.
    pub chromedriver_path: String,
    /// Try a headless browser first when a session can be restored.
    pub headless: bool,
    /// How long the Teams page may take to show a signed-in state.
    pub page_load_timeout_secs: u64,
    /// How long to wait for the user to finish signing in.
    pub login_timeout_secs: u64,
    /// Page polling interval while waiting for sign-in.
    pub poll_interval_ms: u64,
    /// Delay after sign-in so the web client can finish writing tokens.
    pub settle_delay_secs: u64,
    /// Sessions older than this are not restored into the browser.
    pub session_max_age_hours: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chromedriver_url: "http://localhost:9515".to_string(),
            chromedriver_path: "chromedriver".to_string(),
            headless: true,
            page_load_timeout_secs: 30,
            login_timeout_secs: 300,
            poll_interval_ms: 1000,
            settle_delay_secs: 5,
            session_max_age_hours: 12.0,
        }
    }
}

impl Settings {
    /// Load settings from `config.toml` in the data directory, falling back
    /// to defaults when the file does not exist.
    pub fn load(paths: &Paths) -> Result<Self> {
        let path = paths.config_file();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_secs(self.page_load_timeout_secs)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(50))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

/// Locations of everything persisted on disk.
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    /// Resolve the data directory: `$TEAMS_AGENT_HOME`, else the platform
    /// config directory.
    pub fn resolve() -> Result<Self> {
        if let Some(home) = std::env::var_os(HOME_ENV) {
            return Ok(Self::at(PathBuf::from(home)));
        }
        let proj_dirs = ProjectDirs::from("com", "teams-agent", "teams-agent")
            .context("Could not determine config directory")?;
        Ok(Self::at(proj_dirs.config_dir().to_path_buf()))
    }

    pub fn at(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn session_file(&self) -> PathBuf {
        self.root.join("session-state.enc")
    }

    pub fn token_cache_file(&self) -> PathBuf {
        self.root.join("token-cache.enc")
    }

    pub fn rejected_tokens_file(&self) -> PathBuf {
        self.root.join("rejected-tokens.enc")
    }

    pub fn key_file(&self) -> PathBuf {
        self.root.join("store.key")
    }

    pub fn browser_profile_dir(&self) -> PathBuf {
        self.root.join("browser-profile")
    }

    /// Create the data and browser profile directories with owner-only
    /// permissions.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.root.clone(), self.browser_profile_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = fs::Permissions::from_mode(0o700);
                fs::set_permissions(&dir, perms)
                    .with_context(|| format!("Failed to set permissions on {}", dir.display()))?;
            }
        }
        Ok(())
    }
}

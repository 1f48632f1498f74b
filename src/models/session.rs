//! Captured browser session state
//!
//! Field names follow the browser `storageState` JSON layout so snapshots
//! exported by earlier tooling deserialize unchanged.

use serde::{Deserialize, Serialize};

/// Teams web client origin; its local storage holds most tokens.
pub const TEAMS_ORIGIN: &str = "https://teams.microsoft.com";

/// Cookie domain suffix for Teams-scoped cookies.
pub const TEAMS_COOKIE_DOMAIN: &str = "teams.microsoft.com";

/// A single browser cookie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Unix seconds; absent or negative for session cookies.
    #[serde(default, alias = "expiry", skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn default_path() -> String {
    "/".to_string()
}

impl SessionCookie {
    /// Whether this cookie is scoped to the Teams web domain.
    pub fn is_teams(&self) -> bool {
        self.domain
            .trim_start_matches('.')
            .ends_with(TEAMS_COOKIE_DOMAIN)
    }
}

/// One local-storage key/value pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub name: String,
    pub value: String,
}

/// Local storage captured for one origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginStorage {
    pub origin: String,
    #[serde(default)]
    pub local_storage: Vec<StorageEntry>,
}

/// Everything that makes up "being logged in".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub cookies: Vec<SessionCookie>,
    #[serde(default)]
    pub origins: Vec<OriginStorage>,
}

impl SessionSnapshot {
    /// Merge duplicate origins so each origin appears once.
    ///
    /// Entries of later duplicates are appended to the first occurrence.
    pub fn normalize(mut self) -> Self {
        let mut merged: Vec<OriginStorage> = Vec::with_capacity(self.origins.len());
        for origin in self.origins.drain(..) {
            match merged.iter_mut().find(|o| o.origin == origin.origin) {
                Some(existing) => existing.local_storage.extend(origin.local_storage),
                None => merged.push(origin),
            }
        }
        self.origins = merged;
        self
    }

    /// Local storage of the given origin, if captured.
    pub fn origin(&self, origin: &str) -> Option<&OriginStorage> {
        let wanted = origin.trim_end_matches('/');
        self.origins
            .iter()
            .find(|o| o.origin.trim_end_matches('/') == wanted)
    }

    /// Local-storage entries of the Teams origin (empty if not captured).
    pub fn teams_entries(&self) -> &[StorageEntry] {
        self.origin(TEAMS_ORIGIN)
            .map(|o| o.local_storage.as_slice())
            .unwrap_or(&[])
    }

    /// Local-storage entries across every origin.
    pub fn all_entries(&self) -> impl Iterator<Item = &StorageEntry> {
        self.origins.iter().flat_map(|o| o.local_storage.iter())
    }

    /// First Teams-scoped cookie with the given name.
    pub fn teams_cookie(&self, name: &str) -> Option<&SessionCookie> {
        self.cookies.iter().find(|c| c.name == name && c.is_teams())
    }
}

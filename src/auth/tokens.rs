//! Cached token record and clock helpers

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in seconds.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Persisted search token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedToken {
    pub token: String,
    pub expires_at_ms: u64,
    /// When the token was pulled out of the snapshot. Informational only.
    pub extracted_at_ms: u64,
}

impl CachedToken {
    /// Build a cache record from a token expiring at `expires_at` (unix
    /// seconds). Returns `None` if it is already expired at `now_ms`.
    pub fn new(token: String, expires_at: u64, now_ms: u64) -> Option<Self> {
        let expires_at_ms = expires_at.saturating_mul(1000);
        if expires_at_ms <= now_ms {
            return None;
        }
        Some(Self {
            token,
            expires_at_ms,
            extracted_at_ms: now_ms,
        })
    }

    pub fn is_valid_at(&self, now_ms: u64) -> bool {
        self.expires_at_ms > now_ms
    }

    /// Expiry in unix seconds.
    pub fn expires_at(&self) -> u64 {
        self.expires_at_ms / 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_token_is_not_cached() {
        assert!(CachedToken::new("t".into(), 100, 100_000).is_none());
        assert!(CachedToken::new("t".into(), 99, 100_000).is_none());
    }

    #[test]
    fn test_validity_ignores_extraction_time() {
        let mut cached = CachedToken::new("t".into(), 200, 100_000).unwrap();
        // Extraction timestamp in the future must not matter.
        cached.extracted_at_ms = 10_000_000;
        assert!(cached.is_valid_at(150_000));
        assert!(!cached.is_valid_at(200_000));
        assert_eq!(cached.expires_at(), 200);
    }
}

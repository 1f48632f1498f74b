//! Search token cache
//!
//! The search credential is the one requested most often, so a valid copy is
//! kept on disk and extraction only runs on a miss. Validity is purely
//! claim-based: only `expires_at_ms` decides.

use anyhow::Result;

use super::extract::extract_search_token;
use super::tokens::CachedToken;
use crate::models::{SearchCredential, SessionSnapshot};
use crate::store::SecureStore;

pub struct TokenCache {
    store: SecureStore<CachedToken>,
}

impl TokenCache {
    pub fn new(store: SecureStore<CachedToken>) -> Self {
        Self { store }
    }

    /// The cached record, regardless of validity.
    pub fn cached(&self) -> Option<CachedToken> {
        self.store.read()
    }

    /// A usable search credential at `now_ms`.
    ///
    /// `load_snapshot` is only called on a cache miss. A freshly extracted
    /// token is persisted before being returned.
    pub fn get_valid_search_token<F>(&self, load_snapshot: F, now_ms: u64) -> Option<SearchCredential>
    where
        F: FnOnce() -> Option<SessionSnapshot>,
    {
        if let Some(cached) = self.store.read() {
            if cached.is_valid_at(now_ms) {
                tracing::debug!("Search token cache hit");
                return Some(SearchCredential {
                    expires_at: cached.expires_at(),
                    token: cached.token,
                });
            }
            tracing::debug!("Cached search token expired");
        }

        let snapshot = load_snapshot()?;
        let credential = extract_search_token(&snapshot, now_ms / 1000)?;

        match CachedToken::new(credential.token.clone(), credential.expires_at, now_ms) {
            Some(record) => {
                if let Err(e) = self.store.write(&record) {
                    tracing::warn!("Failed to cache search token: {:#}", e);
                }
                Some(credential)
            }
            // Expired between extraction and caching: not usable either.
            None => None,
        }
    }

    /// Drop the cached token. Safe when nothing is cached.
    pub fn invalidate(&self) -> Result<()> {
        tracing::debug!("Invalidating search token cache");
        self.store.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::super::extract::test_support::{search_entry, teams_snapshot, NOW};
    use super::*;
    use crate::store::Sealer;
    use std::cell::Cell;

    const NOW_MS: u64 = NOW * 1000;

    fn cache(dir: &std::path::Path) -> TokenCache {
        TokenCache::new(SecureStore::new(
            dir.join("token-cache.enc"),
            Sealer::from_master_key(&[9u8; 32]),
        ))
    }

    #[test]
    fn test_second_call_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let loads = Cell::new(0);
        let loader = || {
            loads.set(loads.get() + 1);
            Some(teams_snapshot(vec![search_entry(NOW + 3600)]))
        };

        let first = cache.get_valid_search_token(loader, NOW_MS).unwrap();
        let second = cache
            .get_valid_search_token(loader, NOW_MS + 60_000)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(loads.get(), 1);
    }

    #[test]
    fn test_expired_cache_reextracts() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        cache
            .get_valid_search_token(|| Some(teams_snapshot(vec![search_entry(NOW + 60)])), NOW_MS)
            .unwrap();

        let later = NOW_MS + 120_000;
        let fresh = cache
            .get_valid_search_token(
                || Some(teams_snapshot(vec![search_entry(NOW + 7200)])),
                later,
            )
            .unwrap();
        assert_eq!(fresh.expires_at, NOW + 7200);
        assert_eq!(cache.cached().unwrap().expires_at(), NOW + 7200);
    }

    #[test]
    fn test_invalidate_forces_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let loads = Cell::new(0);
        let loader = || {
            loads.set(loads.get() + 1);
            Some(teams_snapshot(vec![search_entry(NOW + 3600)]))
        };
        cache.get_valid_search_token(loader, NOW_MS).unwrap();
        cache.invalidate().unwrap();
        cache.get_valid_search_token(loader, NOW_MS).unwrap();
        assert_eq!(loads.get(), 2);
    }

    #[test]
    fn test_invalidate_without_cache() {
        let dir = tempfile::tempdir().unwrap();
        cache(dir.path()).invalidate().unwrap();
    }

    #[test]
    fn test_nothing_cached_when_extraction_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let result = cache
            .get_valid_search_token(|| Some(teams_snapshot(vec![search_entry(NOW - 10)])), NOW_MS);
        assert!(result.is_none());
        assert!(cache.cached().is_none());

        assert!(cache.get_valid_search_token(|| None, NOW_MS).is_none());
    }

    #[test]
    fn test_cached_record_tracks_extraction_time() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        cache
            .get_valid_search_token(|| Some(teams_snapshot(vec![search_entry(NOW + 10)])), NOW_MS)
            .unwrap();
        let record = cache.cached().unwrap();
        assert_eq!(record.extracted_at_ms, NOW_MS);
        assert_eq!(record.expires_at_ms, (NOW + 10) * 1000);
    }
}

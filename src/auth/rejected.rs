//! Credentials a service has refused
//!
//! A 401 does not change the session on disk, so re-extraction would hand
//! out the same token again. Refused credentials are remembered by
//! fingerprint until the next session capture replaces them.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::{Audience, CredentialBundle};
use crate::store::SecureStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    audience: Audience,
    /// SHA-256 of the credential's secrets, hex encoded.
    fingerprint: String,
}

pub struct RejectedTokens {
    store: SecureStore<Vec<Rejection>>,
}

impl RejectedTokens {
    pub fn new(store: SecureStore<Vec<Rejection>>) -> Self {
        Self { store }
    }

    /// Remember `bundle` as refused by its service.
    pub fn reject(&self, bundle: &CredentialBundle) -> Result<()> {
        let rejection = Rejection {
            audience: bundle.audience(),
            fingerprint: fingerprint(bundle),
        };
        let mut entries = self.store.read().unwrap_or_default();
        if entries.contains(&rejection) {
            return Ok(());
        }
        entries.push(rejection);
        tracing::debug!("Marked {} credential as rejected", bundle.audience());
        self.store.write(&entries)
    }

    pub fn is_rejected(&self, bundle: &CredentialBundle) -> bool {
        let Some(entries) = self.store.read() else {
            return false;
        };
        let audience = bundle.audience();
        let print = fingerprint(bundle);
        entries
            .iter()
            .any(|r| r.audience == audience && r.fingerprint == print)
    }

    /// Forget every rejection. Called whenever a new session is captured.
    pub fn clear(&self) -> Result<()> {
        self.store.clear()
    }
}

fn fingerprint(bundle: &CredentialBundle) -> String {
    let mut hasher = Sha256::new();
    match bundle {
        CredentialBundle::Search(c) => hasher.update(c.token.as_bytes()),
        CredentialBundle::Chat(c) => hasher.update(c.token.as_bytes()),
        CredentialBundle::Messaging(c) => {
            hasher.update(c.skype_token.as_bytes());
            hasher.update(b"\n");
            hasher.update(c.auth_token.as_bytes());
        }
        CredentialBundle::Favourites(c) => {
            hasher.update(c.skype_token.as_bytes());
            hasher.update(b"\n");
            hasher.update(c.favourites_token.as_bytes());
        }
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

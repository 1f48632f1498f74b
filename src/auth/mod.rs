//! Authentication for Microsoft Teams
//!
//! Credentials are never requested from an identity provider directly.
//! Instead the Teams web client signs in inside a browser, its storage is
//! captured as a session snapshot, and each internal service audience gets
//! its token extracted from that snapshot.

pub mod cache;
pub mod extract;
pub mod jwt;
pub mod login;
pub mod mri;
pub mod orchestrator;
pub mod rejected;
pub mod tokens;

pub use login::{login, logout, status};
pub use orchestrator::{AuthState, Authenticator};

use crate::models::Audience;

/// Authentication failures callers can act on.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// No usable credential and no browser cycle attempted yet.
    #[error("No valid {audience} credential. Run 'teams-agent login'.")]
    AuthRequired { audience: Audience },

    /// The remote service rejected the credential.
    #[error("The {audience} credential was rejected as expired. Run 'teams-agent login'.")]
    AuthExpired { audience: Audience },

    /// Interactive sign-in did not complete in time.
    #[error("Sign-in did not complete within {secs}s. Run 'teams-agent login' to try again.")]
    LoginTimeout { secs: u64 },

    /// A saved session exists but could not be decrypted or parsed.
    #[error("Saved session is unreadable. Run 'teams-agent login --force'.")]
    SessionUnreadable,

    /// The browser failed during an authentication cycle.
    #[error("Browser authentication failed: {0}")]
    Browser(String),

    /// A freshly captured session could not be saved.
    #[error("Failed to save session: {0}")]
    Storage(String),
}

//! Unverified JWT claim decoding
//!
//! Tokens found in browser storage were already validated by the Teams web
//! client. We only need their claims, so signatures are not checked.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::Deserialize;

/// Claims we care about. Unknown claims are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Claims {
    /// Expiry, unix seconds.
    pub exp: Option<u64>,
    /// AAD object id.
    pub oid: Option<String>,
    pub name: Option<String>,
    pub upn: Option<String>,
    pub preferred_username: Option<String>,
    pub unique_name: Option<String>,
    pub email: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub tid: Option<String>,
    /// Skype identity carried by the `skypetoken_asm` cookie.
    pub skypeid: Option<String>,
}

impl Claims {
    /// Best available sign-in address.
    pub fn email(&self) -> Option<&str> {
        self.upn
            .as_deref()
            .or(self.preferred_username.as_deref())
            .or(self.email.as_deref())
            .or(self.unique_name.as_deref())
    }
}

/// Decode the payload segment of a JWT without verifying it.
///
/// Returns `None` for anything that is not three non-empty dot-separated
/// segments with a base64 JSON object in the middle.
pub fn decode_unverified(token: &str) -> Option<Claims> {
    let mut parts = token.trim().split('.');
    let (header, payload, signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || header.is_empty() || payload.is_empty() || signature.is_empty()
    {
        return None;
    }

    let trimmed = payload.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD.decode(pad(trimmed)))
        .ok()?;

    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    if !value.is_object() {
        return None;
    }
    serde_json::from_value(value).ok()
}

fn pad(segment: &str) -> String {
    let mut padded = segment.to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }
    padded
}

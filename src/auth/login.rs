//! `login`, `logout` and `status` commands

use anyhow::Result;
use chrono::{DateTime, Local};

use super::{AuthError, Authenticator};
use crate::models::Audience;

/// Sign in through the browser unless a usable session already exists.
pub async fn login(auth: &Authenticator, force: bool) -> Result<()> {
    if force {
        tracing::info!("Forcing a fresh sign-in");
        auth.force_new_login().await?;
    } else if auth.has_usable_session() {
        println!("Already logged in. Use --force to sign in again.");
        return Ok(());
    } else {
        auth.ensure_authenticated().await?;
    }
    tracing::debug!("Auth state after login: {:?}", auth.state());

    match auth.user_identity() {
        Some(user) if !user.display_name.is_empty() => {
            println!("Logged in as {}.", user.display_name)
        }
        Some(user) if !user.email.is_empty() => println!("Logged in as {}.", user.email),
        Some(user) => println!("Logged in ({}).", user.mri),
        None => println!("Logged in."),
    }
    Ok(())
}

/// Remove the saved session and cached tokens.
pub fn logout(auth: &Authenticator) -> Result<()> {
    auth.logout()?;
    println!("Logged out.");
    Ok(())
}

/// Print the saved session and per-audience credential state.
pub fn status(auth: &Authenticator) -> Result<()> {
    let snapshot = match auth.check_session() {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => {
            println!("Session:     none");
            println!("Run 'teams-agent login' to sign in.");
            return Ok(());
        }
        Err(AuthError::SessionUnreadable) => {
            println!("Session:     unreadable");
            println!("{}", AuthError::SessionUnreadable);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let age = auth.session_age_hours().unwrap_or_default();
    if auth.is_session_stale() {
        println!("Session:     stale ({:.1}h old, will not be restored)", age);
    } else {
        println!("Session:     saved {:.1}h ago", age);
    }
    println!(
        "  cookies: {}, origins: {}",
        snapshot.cookies.len(),
        snapshot.origins.len()
    );

    for audience in Audience::ALL {
        let label = format!("{}:", audience);
        match auth.get_credential(audience) {
            Ok(bundle) => {
                println!("{:<12} valid", label);
                if let Some(exp) = bundle.expires_at() {
                    println!("  expires_at: {}", format_expiry(exp));
                }
            }
            Err(_) => println!("{:<12} none", label),
        }
    }

    match auth.cached_search_token() {
        Some(cached) => println!(
            "Search cache: present, expires_at: {}",
            format_expiry(cached.expires_at())
        ),
        None => println!("Search cache: empty"),
    }

    let region = auth.region_config();
    println!("Region:      {}", region.region_partition);
    Ok(())
}

fn format_expiry(unix_secs: u64) -> String {
    DateTime::from_timestamp(unix_secs as i64, 0)
        .map(|utc| utc.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| unix_secs.to_string())
}

//! Presence API for Microsoft Teams

use anyhow::{bail, Context, Result};
use reqwest::Method;
use serde::Deserialize;

use super::client::{RequestAuth, TeamsClient};
use crate::auth::mri::normalize_mri;
use crate::models::Audience;

const PRESENCE_BASE: &str = "https://presence.teams.microsoft.com/v1";

#[derive(Debug, Deserialize)]
struct PresenceEntry {
    mri: String,
    presence: Option<PresenceDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresenceDetail {
    availability: Option<String>,
    activity: Option<String>,
}

/// Availability and activity of one user.
#[derive(Debug, Clone, PartialEq)]
pub struct Presence {
    pub mri: String,
    pub availability: String,
    pub activity: String,
}

/// Map a user-facing status to the service's availability value.
fn availability_for(status: &str) -> Result<&'static str> {
    Ok(match status.to_lowercase().as_str() {
        "available" => "Available",
        "busy" => "Busy",
        "dnd" | "donotdisturb" => "DoNotDisturb",
        "brb" | "berightback" => "BeRightBack",
        "away" => "Away",
        "offline" => "Offline",
        other => bail!(
            "Unknown status: {}. Use: available, busy, dnd, brb, away, offline",
            other
        ),
    })
}

fn parse_presence(entries: Vec<PresenceEntry>) -> Vec<Presence> {
    entries
        .into_iter()
        .map(|entry| {
            let (availability, activity) = match entry.presence {
                Some(detail) => (detail.availability, detail.activity),
                None => (None, None),
            };
            Presence {
                mri: entry.mri,
                availability: availability.unwrap_or_else(|| "Unknown".to_string()),
                activity: activity.unwrap_or_else(|| "Unknown".to_string()),
            }
        })
        .collect()
}

/// Presence of `user` (any MRI or object id form), or of the signed-in user.
pub async fn get_presence_data(client: &TeamsClient, user: Option<&str>) -> Result<Presence> {
    let cred = client.chat_credential().await?;
    let mri = match user {
        Some(raw) => normalize_mri(raw).with_context(|| format!("Not a user id: {}", raw))?,
        None => cred.user.mri.clone(),
    };

    let url = format!("{}/presence/getpresence/", PRESENCE_BASE);
    let body = serde_json::json!([{ "mri": mri }]);
    let resp = client
        .send(
            Audience::Chat,
            Method::POST,
            &url,
            RequestAuth::Bearer(&cred.token),
            Some(&body),
        )
        .await?;
    let entries: Vec<PresenceEntry> = resp
        .json()
        .await
        .context("Failed to parse presence response")?;

    parse_presence(entries)
        .into_iter()
        .next()
        .with_context(|| format!("No presence returned for {}", mri))
}

/// Get presence status (prints to stdout).
pub async fn get_presence(client: &TeamsClient, user: Option<&str>) -> Result<()> {
    let presence = get_presence_data(client, user).await?;

    println!("\nPresence Status ({}):", presence.mri);
    println!("  Availability: {}", presence.availability);
    println!("  Activity: {}", presence.activity);
    Ok(())
}

/// Set presence status
pub async fn set_presence(client: &TeamsClient, status: &str) -> Result<()> {
    let availability = availability_for(status)?;
    let cred = client.chat_credential().await?;

    let url = format!("{}/me/forceavailability/", PRESENCE_BASE);
    let body = serde_json::json!({ "availability": availability });
    client
        .send(
            Audience::Chat,
            Method::PUT,
            &url,
            RequestAuth::Bearer(&cred.token),
            Some(&body),
        )
        .await?;

    println!("Presence set to: {}", availability);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_availability_mapping() {
        assert_eq!(availability_for("DND").unwrap(), "DoNotDisturb");
        assert_eq!(availability_for("brb").unwrap(), "BeRightBack");
        assert!(availability_for("lunch").is_err());
    }

    #[test]
    fn test_parse_presence() {
        let json = r#"[
            {"mri": "8:orgid:abc", "presence": {"availability": "Busy", "activity": "InACall"}},
            {"mri": "8:orgid:def"}
        ]"#;
        let parsed = parse_presence(serde_json::from_str(json).unwrap());
        assert_eq!(parsed[0].availability, "Busy");
        assert_eq!(parsed[0].activity, "InACall");
        assert_eq!(parsed[1].availability, "Unknown");
    }
}

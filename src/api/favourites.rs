//! Favourite conversations (conversation folders API)

use anyhow::{bail, Context, Result};
use chrono::DateTime;
use reqwest::Method;
use serde::Deserialize;

use super::client::{RequestAuth, TeamsClient};
use crate::models::{Audience, FavouritesCredential};

const FAVOURITES_FOLDER_TYPE: &str = "Favorites";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FoldersResponse {
    folder_hierarchy_version: Option<u64>,
    #[serde(default)]
    conversation_folders: Vec<ConversationFolder>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationFolder {
    id: String,
    name: Option<String>,
    folder_type: Option<String>,
    #[serde(default)]
    conversation_folder_items: Vec<FolderItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FolderItem {
    conversation_id: String,
    created_time: Option<u64>,
}

/// A conversation pinned to the favourites folder.
#[derive(Debug, Clone, PartialEq)]
pub struct Favourite {
    pub conversation_id: String,
    pub added_at: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
enum FolderAction {
    Add,
    Remove,
}

impl FolderAction {
    fn as_str(self) -> &'static str {
        match self {
            FolderAction::Add => "AddItem",
            FolderAction::Remove => "RemoveItem",
        }
    }
}

fn folders_url(client: &TeamsClient) -> String {
    format!(
        "{}/api/v1/teams/users/me/conversationFolders?supportsAdditionalSystemGeneratedFolders=true&supportsSliceItems=true",
        client.csa_url()
    )
}

/// The favourites folder and the hierarchy version needed to modify it.
fn favourites_folder(resp: FoldersResponse) -> Result<(ConversationFolder, Option<u64>)> {
    let version = resp.folder_hierarchy_version;
    let folder = resp
        .conversation_folders
        .into_iter()
        .find(|f| f.folder_type.as_deref() == Some(FAVOURITES_FOLDER_TYPE))
        .context("No favourites folder in conversation folders response")?;
    Ok((folder, version))
}

fn action_body(
    action: FolderAction,
    folder_id: &str,
    conversation: &str,
    version: Option<u64>,
) -> serde_json::Value {
    let mut body = serde_json::json!({
        "actions": [{
            "action": action.as_str(),
            "folderId": folder_id,
            "itemId": conversation,
        }]
    });
    if let Some(version) = version {
        body["folderHierarchyVersion"] = version.into();
    }
    body
}

async fn fetch_folders(client: &TeamsClient, cred: &FavouritesCredential) -> Result<FoldersResponse> {
    let url = folders_url(client);
    let resp = client
        .send(
            Audience::Favourites,
            Method::GET,
            &url,
            RequestAuth::Favourites(cred),
            None,
        )
        .await?;
    resp.json()
        .await
        .context("Failed to parse conversation folders response")
}

/// List favourite conversations.
pub async fn get_favourites_data(client: &TeamsClient) -> Result<Vec<Favourite>> {
    let cred = client.favourites_credential().await?;
    let (folder, _) = favourites_folder(fetch_folders(client, &cred).await?)?;
    tracing::debug!(
        "Favourites folder {} ({})",
        folder.id,
        folder.name.as_deref().unwrap_or("unnamed")
    );
    Ok(folder
        .conversation_folder_items
        .into_iter()
        .map(|item| Favourite {
            conversation_id: item.conversation_id,
            added_at: item.created_time,
        })
        .collect())
}

async fn modify(client: &TeamsClient, action: FolderAction, conversation: &str) -> Result<()> {
    if conversation.trim().is_empty() {
        bail!("Conversation id is empty");
    }
    let cred = client.favourites_credential().await?;
    let (folder, version) = favourites_folder(fetch_folders(client, &cred).await?)?;
    let body = action_body(action, &folder.id, conversation, version);

    tracing::debug!("{} {} in folder {}", action.as_str(), conversation, folder.id);
    client
        .send(
            Audience::Favourites,
            Method::POST,
            &folders_url(client),
            RequestAuth::Favourites(&cred),
            Some(&body),
        )
        .await?;
    Ok(())
}

pub async fn add_favourite(client: &TeamsClient, conversation: &str) -> Result<()> {
    modify(client, FolderAction::Add, conversation).await?;
    println!("Added {} to favourites.", conversation);
    Ok(())
}

pub async fn remove_favourite(client: &TeamsClient, conversation: &str) -> Result<()> {
    modify(client, FolderAction::Remove, conversation).await?;
    println!("Removed {} from favourites.", conversation);
    Ok(())
}

/// List favourites (prints to stdout).
pub async fn get_favourites(client: &TeamsClient) -> Result<()> {
    let favourites = get_favourites_data(client).await?;

    println!("\nFavourites:");
    println!("{:-<60}", "");
    if favourites.is_empty() {
        println!("  (none)");
    }
    for fav in &favourites {
        match fav.added_at.and_then(|ms| DateTime::from_timestamp_millis(ms as i64)) {
            Some(added) => println!(
                "  {}  (added {})",
                fav.conversation_id,
                added.format("%Y-%m-%d")
            ),
            None => println!("  {}", fav.conversation_id),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOLDERS: &str = r#"{
        "folderHierarchyVersion": 17,
        "conversationFolders": [
            {"id": "tenant~user~Chats", "name": "Chats", "folderType": "Chats"},
            {"id": "tenant~user~Favorites", "name": "Favorites", "folderType": "Favorites",
             "conversationFolderItems": [
                {"conversationId": "19:abc@thread.v2", "createdTime": 1700000000000}
             ]}
        ]
    }"#;

    #[test]
    fn test_favourites_folder_is_found() {
        let (folder, version) = favourites_folder(serde_json::from_str(FOLDERS).unwrap()).unwrap();
        assert_eq!(folder.id, "tenant~user~Favorites");
        assert_eq!(version, Some(17));
        assert_eq!(folder.conversation_folder_items.len(), 1);
    }

    #[test]
    fn test_missing_favourites_folder_is_an_error() {
        let resp: FoldersResponse = serde_json::from_str(r#"{"conversationFolders": []}"#).unwrap();
        assert!(favourites_folder(resp).is_err());
    }

    #[test]
    fn test_action_body() {
        let body = action_body(FolderAction::Remove, "fav", "19:abc@thread.v2", Some(3));
        assert_eq!(body["actions"][0]["action"], "RemoveItem");
        assert_eq!(body["actions"][0]["itemId"], "19:abc@thread.v2");
        assert_eq!(body["folderHierarchyVersion"], 3);

        let body = action_body(FolderAction::Add, "fav", "x", None);
        assert!(body.get("folderHierarchyVersion").is_none());
    }
}

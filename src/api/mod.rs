//! API client module for Microsoft Teams

mod chat;
pub mod client;
mod favourites;
mod html;
mod me;
mod presence;
mod search;

use anyhow::Result;

pub use client::TeamsClient;

/// Search messages through Substrate
pub async fn search(client: &TeamsClient, query: &str, from: usize, size: usize) -> Result<()> {
    search::search(client, query, from, size).await
}

/// Read messages from a conversation
pub async fn get_messages(client: &TeamsClient, conversation: &str, limit: usize) -> Result<()> {
    chat::get_messages(client, conversation, limit).await
}

/// Send a message to a conversation
pub async fn send_message(client: &TeamsClient, to: &str, message: &str) -> Result<()> {
    chat::send_message(client, to, message).await
}

/// List favourite conversations
pub async fn get_favourites(client: &TeamsClient) -> Result<()> {
    favourites::get_favourites(client).await
}

/// Pin a conversation to favourites
pub async fn add_favourite(client: &TeamsClient, conversation: &str) -> Result<()> {
    favourites::add_favourite(client, conversation).await
}

/// Unpin a conversation from favourites
pub async fn remove_favourite(client: &TeamsClient, conversation: &str) -> Result<()> {
    favourites::remove_favourite(client, conversation).await
}

/// Get presence status of a user, or of the signed-in user
pub async fn get_presence(client: &TeamsClient, user: Option<&str>) -> Result<()> {
    presence::get_presence(client, user).await
}

/// Set presence status
pub async fn set_presence(client: &TeamsClient, status: &str) -> Result<()> {
    presence::set_presence(client, status).await
}

/// Show current user info
pub fn whoami(client: &TeamsClient) -> Result<()> {
    me::whoami(client.auth())
}

//! Chat service messages (send and read)
//!
//! Uses the messaging credential: the `skypetoken_asm` cookie in the
//! `Authentication` header plus the `authtoken` cookie as bearer.

use anyhow::{Context, Result};
use reqwest::Method;
use serde::Deserialize;

use super::client::{RequestAuth, TeamsClient};
use super::html::{html_escape, strip_html};
use crate::models::Audience;

#[derive(Debug, Deserialize)]
struct NativeMessage {
    #[serde(rename = "composetime")]
    compose_time: Option<String>,
    #[serde(rename = "originalarrivaltime")]
    original_arrival_time: Option<String>,
    #[serde(rename = "imdisplayname")]
    im_display_name: Option<String>,
    content: Option<String>,
    messagetype: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    messages: Option<Vec<NativeMessage>>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(rename = "OriginalArrivalTime")]
    original_arrival_time: Option<u64>,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageInfo {
    pub sender: String,
    pub timestamp: String,
    pub content: String,
}

/// Acknowledgement of a sent message.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub client_message_id: String,
    pub arrival_time: Option<u64>,
}

fn messages_url(base: &str, conversation: &str) -> String {
    format!("{}/v1/users/ME/conversations/{}/messages", base, conversation)
}

fn message_body(message: &str, display_name: &str, client_message_id: &str) -> serde_json::Value {
    serde_json::json!({
        "content": format!("<p>{}</p>", html_escape(message)),
        "messagetype": "RichText/Html",
        "contenttype": "text",
        "imdisplayname": display_name,
        "clientmessageid": client_message_id,
    })
}

fn to_message_infos(messages: Vec<NativeMessage>) -> Vec<MessageInfo> {
    // Newest first on the wire; chronological for display.
    messages
        .into_iter()
        .rev()
        .filter(|msg| {
            let msgtype = msg.messagetype.as_deref().unwrap_or("");
            // Skip non-text messages (e.g. ThreadActivity/*)
            msgtype.contains("Text")
        })
        .filter_map(|msg| {
            let text = strip_html(msg.content.as_deref().unwrap_or(""));
            if text.trim().is_empty() {
                return None;
            }
            Some(MessageInfo {
                sender: msg.im_display_name.unwrap_or_else(|| "?".to_string()),
                timestamp: msg
                    .original_arrival_time
                    .or(msg.compose_time)
                    .unwrap_or_default(),
                content: text.trim().to_string(),
            })
        })
        .collect()
}

/// Send a message using an existing client.
pub async fn send_message_data(
    client: &TeamsClient,
    conversation: &str,
    message: &str,
) -> Result<SentMessage> {
    let cred = client.messaging_credential().await?;
    let url = messages_url(&client.chat_service_url(), conversation);
    let client_message_id = (uuid::Uuid::new_v4().as_u128() as u64).to_string();
    let body = message_body(message, &cred.user.display_name, &client_message_id);

    tracing::debug!("Sending message to {}", url);
    let resp = client
        .send(
            Audience::Messaging,
            Method::POST,
            &url,
            RequestAuth::Messaging(&cred),
            Some(&body),
        )
        .await?;

    let ack: Option<SendResponse> = resp.json().await.ok();
    Ok(SentMessage {
        client_message_id,
        arrival_time: ack.and_then(|a| a.original_arrival_time),
    })
}

/// Read the latest messages of a conversation.
pub async fn get_messages_data(
    client: &TeamsClient,
    conversation: &str,
    limit: usize,
) -> Result<Vec<MessageInfo>> {
    let cred = client.messaging_credential().await?;
    let url = format!(
        "{}?pageSize={}",
        messages_url(&client.chat_service_url(), conversation),
        limit
    );

    tracing::debug!("Reading messages from {}", url);
    let resp = client
        .send(
            Audience::Messaging,
            Method::GET,
            &url,
            RequestAuth::Messaging(&cred),
            None,
        )
        .await?;
    let body: MessagesResponse = resp
        .json()
        .await
        .context("Failed to parse messages response")?;

    Ok(to_message_infos(body.messages.unwrap_or_default()))
}

/// Send a message (prints to stdout).
pub async fn send_message(client: &TeamsClient, conversation: &str, message: &str) -> Result<()> {
    let sent = send_message_data(client, conversation, message).await?;
    match sent.arrival_time {
        Some(ms) => println!("Message sent ({}, arrived {}).", sent.client_message_id, ms),
        None => println!("Message sent ({}).", sent.client_message_id),
    }
    Ok(())
}

/// Read messages from a conversation (prints to stdout).
pub async fn get_messages(client: &TeamsClient, conversation: &str, limit: usize) -> Result<()> {
    let msgs = get_messages_data(client, conversation, limit).await?;

    if msgs.is_empty() {
        println!("(no messages)");
        return Ok(());
    }

    for msg in &msgs {
        println!("[{}] {}: {}", msg.timestamp, msg.sender, msg.content);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_body_escapes_content() {
        let body = message_body("<script>", "Ada", "123");
        assert_eq!(body["content"], "<p>&lt;script&gt;</p>");
        assert_eq!(body["messagetype"], "RichText/Html");
        assert_eq!(body["imdisplayname"], "Ada");
        assert_eq!(body["clientmessageid"], "123");
    }

    #[test]
    fn test_messages_url() {
        assert_eq!(
            messages_url("https://teams.microsoft.com/api/chatsvc/amer", "19:abc@thread.v2"),
            "https://teams.microsoft.com/api/chatsvc/amer/v1/users/ME/conversations/19:abc@thread.v2/messages"
        );
    }

    #[test]
    fn test_messages_are_chronological_text_only() {
        let json = r#"{"messages": [
            {"id": "3", "messagetype": "RichText/Html", "content": "<p>third</p>",
             "imdisplayname": "Ada", "originalarrivaltime": "t3",
             "from": "https://amer.ng.msg.teams.microsoft.com/v1/users/ME/contacts/8:orgid:abc"},
            {"id": "2", "messagetype": "ThreadActivity/AddMember", "content": "<addmember/>"},
            {"id": "1", "messagetype": "Text", "content": "first", "composetime": "t1"}
        ]}"#;
        let body: MessagesResponse = serde_json::from_str(json).unwrap();
        let msgs = to_message_infos(body.messages.unwrap());

        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].content, "first");
        assert_eq!(msgs[0].sender, "?");
        assert_eq!(msgs[0].timestamp, "t1");
        assert_eq!(msgs[1].sender, "Ada");
        assert_eq!(msgs[1].content, "third");
    }
}

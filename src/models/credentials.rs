//! Credential bundles derived from a session snapshot

use serde::{Deserialize, Serialize};
use std::fmt;

/// Internal Teams service audience a credential is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    Search,
    Chat,
    Messaging,
    Favourites,
}

impl Audience {
    pub const ALL: [Audience; 4] = [
        Audience::Search,
        Audience::Chat,
        Audience::Messaging,
        Audience::Favourites,
    ];
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Audience::Search => "search",
            Audience::Chat => "chat",
            Audience::Messaging => "messaging",
            Audience::Favourites => "favourites",
        };
        f.write_str(name)
    }
}

/// The signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub object_id: String,
    /// `8:orgid:<object_id>`
    pub mri: String,
    pub email: String,
    pub display_name: String,
    pub given_name: Option<String>,
    pub surname: Option<String>,
    pub tenant_id: Option<String>,
}

impl UserIdentity {
    /// Identity known only by its object id (no profile claims available).
    pub fn from_object_id(object_id: &str) -> Self {
        Self {
            mri: format!("8:orgid:{}", object_id),
            object_id: object_id.to_string(),
            email: String::new(),
            display_name: String::new(),
            given_name: None,
            surname: None,
            tenant_id: None,
        }
    }
}

/// Regional routing for chat and middle-tier endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionConfig {
    /// e.g. `amer`, `emea`, `apac`
    pub region: String,
    /// Numeric partition suffix for partitioned tenants, e.g. `02`.
    pub partition: Option<String>,
    /// `amer-02` for partitioned tenants, otherwise the bare region.
    pub region_partition: String,
    pub middle_tier_url: Option<String>,
    pub chat_service_url: Option<String>,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            region: "amer".to_string(),
            partition: None,
            region_partition: "amer".to_string(),
            middle_tier_url: None,
            chat_service_url: None,
        }
    }
}

/// Bearer token for Substrate search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCredential {
    pub token: String,
    /// Unix seconds.
    pub expires_at: u64,
}

/// Bearer token for the chat aggregator (or Skype spaces) audience.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCredential {
    pub token: String,
    pub expires_at: u64,
    pub user: UserIdentity,
}

/// Cookie pair used by the chat service for sending and reading messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagingCredential {
    /// `skypetoken_asm` cookie.
    pub skype_token: String,
    /// `authtoken` cookie with the `Bearer=` prefix removed.
    pub auth_token: String,
    pub user: UserIdentity,
}

/// Credentials for the conversation folders (favourites) API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FavouritesCredential {
    pub skype_token: String,
    pub favourites_token: String,
}

/// One credential per audience.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialBundle {
    Search(SearchCredential),
    Chat(ChatCredential),
    Messaging(MessagingCredential),
    Favourites(FavouritesCredential),
}

impl CredentialBundle {
    pub fn audience(&self) -> Audience {
        match self {
            CredentialBundle::Search(_) => Audience::Search,
            CredentialBundle::Chat(_) => Audience::Chat,
            CredentialBundle::Messaging(_) => Audience::Messaging,
            CredentialBundle::Favourites(_) => Audience::Favourites,
        }
    }

    /// Expiry in unix seconds, for the audiences that carry one.
    pub fn expires_at(&self) -> Option<u64> {
        match self {
            CredentialBundle::Search(c) => Some(c.expires_at),
            CredentialBundle::Chat(c) => Some(c.expires_at),
            CredentialBundle::Messaging(_) | CredentialBundle::Favourites(_) => None,
        }
    }
}

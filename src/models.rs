use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    #[serde(default)]
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Directory entry for one conversation, as pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub photo: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    pub created_at: DateTime<Utc>,
}

/// Partial summary carried by a `new-conversation` push.
///
/// A missing key leaves the stored field alone. For the nullable fields an
/// explicit `null` arrives as `Some(None)` and clears the stored value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::option_option)]
pub struct ConversationPatch {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub photo: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_message: Option<Option<LastMessage>>,
    pub created_at: DateTime<Utc>,
}

impl ConversationPatch {
    /// Overlays the fields present in the patch. Unread counts are not
    /// touched; the directory applies those as a delta.
    pub fn merge_into(self, summary: &mut ConversationSummary) {
        if let Some(name) = self.name {
            summary.name = name;
        }
        if let Some(photo) = self.photo {
            summary.photo = photo;
        }
        if let Some(is_active) = self.is_active {
            summary.is_active = is_active;
        }
        if let Some(last_message) = self.last_message {
            summary.last_message = last_message;
        }
        summary.created_at = self.created_at;
    }

    /// Summary for a room the directory has not seen yet.
    pub fn into_summary(self, unread_count: u32) -> ConversationSummary {
        ConversationSummary {
            id: self.id,
            name: self.name.unwrap_or_default(),
            photo: self.photo.flatten(),
            is_active: self.is_active.unwrap_or_default(),
            unread_count,
            last_message: self.last_message.flatten(),
            created_at: self.created_at,
        }
    }
}

impl From<ConversationSummary> for ConversationPatch {
    fn from(summary: ConversationSummary) -> Self {
        ConversationPatch {
            id: summary.id,
            name: Some(summary.name),
            photo: Some(summary.photo),
            is_active: Some(summary.is_active),
            last_message: Some(summary.last_message),
            created_at: summary.created_at,
        }
    }
}

// With `default`, a missing key stays `None` while `null` becomes `Some(None)`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub content: Option<String>,
    pub sender_id: String,
    pub room_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub file_url: Vec<String>,
    #[serde(default)]
    pub is_read: bool,
}

impl Message {
    pub fn preview(&self) -> LastMessage {
        LastMessage {
            content: self.content.clone(),
            created_at: self.created_at,
        }
    }
}

/// Credential and user id handed to the session by the auth provider.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub token: String,
    pub user_id: String,
}

impl Identity {
    pub fn new(token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Identity {
            token: token.into(),
            user_id: user_id.into(),
        }
    }

    pub fn is_present(&self) -> bool {
        !self.token.trim().is_empty()
    }
}

// The token never ends up in logs.
impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

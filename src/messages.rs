use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ChatError, Result};
use crate::models::{ConversationPatch, ConversationSummary, Message};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "subscribe")]
    Subscribe {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    #[serde(rename = "send-message")]
    SendMessage {
        content: Option<String>,
        #[serde(rename = "fileUrl")]
        file_url: Vec<String>,
        #[serde(rename = "roomId")]
        room_id: String,
    },
    #[serde(rename = "read-message")]
    ReadMessage,
}

/// Payload of a `new-conversation` push: the changed summary fields plus how
/// much the unread count moved. Any `unreadCount` in the push is ignored.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationUpsert {
    #[serde(flatten)]
    pub patch: ConversationPatch,
    #[serde(default)]
    pub count_increase_by: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "conversation-list")]
    ConversationList {
        conversations: Vec<ConversationSummary>,
    },
    #[serde(rename = "past-messages")]
    PastMessages {
        #[serde(rename = "roomId")]
        room_id: String,
        messages: Vec<Message>,
    },
    #[serde(rename = "new-message")]
    NewMessage { message: Message },
    #[serde(rename = "new-conversation")]
    NewConversation { conversations: ConversationUpsert },
    #[serde(rename = "error")]
    Error { message: String },
}

const KNOWN_SERVER_TYPES: [&str; 5] = [
    "conversation-list",
    "past-messages",
    "new-message",
    "new-conversation",
    "error",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Event(ServerMessage),
    /// Well-formed frame whose `type` this client does not understand.
    Unknown(String),
}

pub fn encode(message: &ClientMessage) -> Result<String> {
    serde_json::to_string(message).map_err(|e| ChatError::Encode(e.to_string()))
}

/// Parses one inbound text frame.
///
/// Frames with an unrecognised `type` come back as [`Decoded::Unknown`];
/// anything that is not a JSON object with a string `type`, or that fails to
/// match the shape of its type, is a [`ChatError::MalformedFrame`].
pub fn decode(text: &str) -> Result<Decoded> {
    let value: Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ChatError::MalformedFrame("missing string field `type`".to_string()))?;

    if !KNOWN_SERVER_TYPES.contains(&kind) {
        return Ok(Decoded::Unknown(kind.to_string()));
    }

    let message = serde_json::from_value(value)?;
    Ok(Decoded::Event(message))
}

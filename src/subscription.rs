use log::debug;

use crate::buffer::MessageBuffer;
use crate::error::{ChatError, Result};
use crate::messages::ClientMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSubscription {
    pub room_id: String,
    /// Subscribe requested but not yet sent on the current connection.
    pub pending: bool,
}

/// Holds the single active room and the messages buffered for it.
///
/// The subscribe intent survives disconnects: whenever the connection comes
/// (back) up, `on_connected` yields the subscribe frame for the latest room.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    current: Option<RoomSubscription>,
    buffer: MessageBuffer,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_room(&self) -> Option<&str> {
        self.current.as_ref().map(|s| s.room_id.as_str())
    }

    pub fn subscription(&self) -> Option<&RoomSubscription> {
        self.current.as_ref()
    }

    pub fn is_active(&self, room_id: &str) -> bool {
        self.active_room() == Some(room_id)
    }

    pub fn buffer(&self) -> &MessageBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut MessageBuffer {
        &mut self.buffer
    }

    /// Switches the active room. The buffer is emptied before anything else
    /// happens; the returned frame must be sent right away when `connected`.
    pub fn select_room(&mut self, room_id: &str, connected: bool) -> Option<ClientMessage> {
        self.buffer.clear();

        if let Some(previous) = &self.current {
            if previous.pending && previous.room_id != room_id {
                debug!("Dropping pending subscribe for room {}", previous.room_id);
            }
        }

        self.current = Some(RoomSubscription {
            room_id: room_id.to_string(),
            pending: !connected,
        });

        connected.then(|| ClientMessage::Subscribe {
            room_id: room_id.to_string(),
        })
    }

    /// Replays the subscribe for the active room, if one is owed.
    pub fn on_connected(&mut self) -> Option<ClientMessage> {
        let current = self.current.as_mut()?;
        if !current.pending {
            return None;
        }
        current.pending = false;
        Some(ClientMessage::Subscribe {
            room_id: current.room_id.clone(),
        })
    }

    /// A new connection has no server-side subscription yet.
    pub fn on_connection_lost(&mut self) {
        if let Some(current) = self.current.as_mut() {
            current.pending = true;
        }
    }

    pub fn send_message(
        &self,
        content: Option<String>,
        attachment_urls: Vec<String>,
        connected: bool,
    ) -> Result<ClientMessage> {
        let room_id = self.active_room().ok_or(ChatError::NoRoomSelected)?;
        if !connected {
            return Err(ChatError::NotConnected);
        }
        let content = content.filter(|c| !c.trim().is_empty());
        if content.is_none() && attachment_urls.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        Ok(ClientMessage::SendMessage {
            content,
            file_url: attachment_urls,
            room_id: room_id.to_string(),
        })
    }

    pub fn mark_read(&self, connected: bool) -> Result<ClientMessage> {
        if self.current.is_none() {
            return Err(ChatError::NoRoomSelected);
        }
        if !connected {
            return Err(ChatError::NotConnected);
        }
        Ok(ClientMessage::ReadMessage)
    }

    /// Session teardown.
    pub fn clear(&mut self) {
        self.current = None;
        self.buffer.clear();
    }
}

use std::collections::HashSet;

use crate::models::Message;

/// Messages of the active room, oldest first, at most one entry per id.
#[derive(Debug, Default, Clone)]
pub struct MessageBuffer {
    messages: Vec<Message>,
    ids: HashSet<String>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Replaces the contents with a history batch.
    ///
    /// The server sends history newest first; the batch is reversed before a
    /// stable sort so that entries sharing a timestamp stay chronological.
    pub fn replace_history(&mut self, mut history: Vec<Message>) {
        history.reverse();
        history.sort_by_key(|m| m.created_at);

        self.clear();
        for message in history {
            if self.ids.insert(message.id.clone()) {
                self.messages.push(message);
            }
        }
    }

    /// Inserts `message` at its chronological position. Returns `false` when
    /// an entry with the same id is already buffered.
    pub fn insert(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id.clone()) {
            return false;
        }
        let pos = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(pos, message);
        true
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.ids.clear();
    }
}

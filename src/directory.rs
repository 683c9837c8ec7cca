use std::collections::HashSet;

use log::debug;

use crate::models::{ConversationPatch, ConversationSummary, Message};

/// Conversation summaries ordered by recency, most recently active first.
///
/// Invariants: ids are unique, and every upsert moves its entry to the front
/// without disturbing the relative order of the others.
#[derive(Debug, Default, Clone)]
pub struct ConversationDirectory {
    entries: Vec<ConversationSummary>,
}

impl ConversationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&ConversationSummary> {
        self.entries.iter().find(|c| c.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Full resync. Server order is kept; a repeated id keeps its first
    /// position.
    pub fn replace_all(&mut self, summaries: Vec<ConversationSummary>) {
        let mut seen = HashSet::with_capacity(summaries.len());
        self.entries = summaries
            .into_iter()
            .filter(|s| seen.insert(s.id.clone()))
            .collect();
    }

    /// Merges a pushed summary and moves it to the front. Fields missing from
    /// the push keep their stored values; the unread count moves by
    /// `unread_delta` and never drops below zero.
    pub fn upsert(&mut self, patch: impl Into<ConversationPatch>, unread_delta: i64) {
        let patch = patch.into();
        let entry = match self.take(&patch.id) {
            Some(mut existing) => {
                existing.unread_count = apply_delta(existing.unread_count, unread_delta);
                patch.merge_into(&mut existing);
                existing
            }
            None => patch.into_summary(apply_delta(0, unread_delta)),
        };
        self.entries.insert(0, entry);
    }

    /// Unread cue for a message that arrived for a room other than the active
    /// one. Returns `false` if the room is not in the directory.
    pub fn note_incoming(&mut self, message: &Message) -> bool {
        let Some(mut entry) = self.take(&message.room_id) else {
            debug!("No directory entry for room {}, ignoring unread cue", message.room_id);
            return false;
        };
        entry.unread_count = entry.unread_count.saturating_add(1);
        entry.last_message = Some(message.preview());
        self.entries.insert(0, entry);
        true
    }

    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.entries.iter_mut().find(|c| c.id == id) {
            Some(entry) if entry.unread_count > 0 => {
                entry.unread_count = 0;
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn take(&mut self, id: &str) -> Option<ConversationSummary> {
        let pos = self.entries.iter().position(|c| c.id == id)?;
        Some(self.entries.remove(pos))
    }
}

fn apply_delta(count: u32, delta: i64) -> u32 {
    let next = i64::from(count).saturating_add(delta).max(0);
    u32::try_from(next).unwrap_or(u32::MAX)
}

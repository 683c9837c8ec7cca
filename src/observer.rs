use log::{info, warn};

use crate::error::ChatError;
use crate::models::{ConversationSummary, Message};
use crate::transport::ConnectionState;

/// Callbacks fired by the session as its state changes.
///
/// Callbacks run while the session holds its internal lock; an observer must
/// not call back into the session.
pub trait SessionObserver: Send {
    fn on_state_changed(&mut self, _state: ConnectionState) {}

    fn on_error(&mut self, _error: &ChatError) {}

    /// Full ordered message list of the active room after every change.
    fn on_messages(&mut self, _messages: &[Message]) {}

    fn on_conversations(&mut self, _conversations: &[ConversationSummary]) {}
}

#[derive(Debug, Default)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Writes every event to the `log` facade.
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl SessionObserver for LoggingObserver {
    fn on_state_changed(&mut self, state: ConnectionState) {
        info!("Connection state: {:?}", state);
    }

    fn on_error(&mut self, error: &ChatError) {
        warn!("Session error: {}", error);
    }

    fn on_messages(&mut self, messages: &[Message]) {
        if let Some(last) = messages.last() {
            info!(
                "{} messages buffered, latest from {}: {}",
                messages.len(),
                last.sender_id,
                last.content.as_deref().unwrap_or("<attachment>")
            );
        } else {
            info!("Message buffer empty");
        }
    }

    fn on_conversations(&mut self, conversations: &[ConversationSummary]) {
        let unread: u32 = conversations.iter().map(|c| c.unread_count).sum();
        info!("{} conversations, {} unread", conversations.len(), unread);
    }
}

/// Forwards each event to several observers in order.
#[derive(Default)]
pub struct Fanout {
    observers: Vec<Box<dyn SessionObserver>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: impl SessionObserver + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn push(&mut self, observer: Box<dyn SessionObserver>) {
        self.observers.push(observer);
    }
}

impl SessionObserver for Fanout {
    fn on_state_changed(&mut self, state: ConnectionState) {
        for observer in &mut self.observers {
            observer.on_state_changed(state);
        }
    }

    fn on_error(&mut self, error: &ChatError) {
        for observer in &mut self.observers {
            observer.on_error(error);
        }
    }

    fn on_messages(&mut self, messages: &[Message]) {
        for observer in &mut self.observers {
            observer.on_messages(messages);
        }
    }

    fn on_conversations(&mut self, conversations: &[ConversationSummary]) {
        for observer in &mut self.observers {
            observer.on_conversations(conversations);
        }
    }
}

//! Sans-IO chat client.
//!
//! [`ChatClient`] owns every piece of protocol state for one session: the
//! connection lifecycle, the active room subscription and its message
//! buffer, and the conversation directory. Inputs are consumer actions and
//! lifecycle/frame events from the runtime; outputs are [`Command`]s the
//! runtime executes, plus observer callbacks.

use log::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::directory::ConversationDirectory;
use crate::error::{ChatError, Result};
use crate::messages::{self, ClientMessage, Decoded, ServerMessage};
use crate::models::{ConversationSummary, Identity, Message};
use crate::observer::{NoopObserver, SessionObserver};
use crate::subscription::SubscriptionManager;
use crate::transport::{CloseReason, Command, ConnectionState, Step, TransportSession};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_received: u64,
    pub frames_sent: u64,
    pub malformed_frames: u64,
    pub unknown_frames: u64,
    pub server_errors: u64,
    pub reconnects_scheduled: u64,
    pub frames_dropped: u64,
}

pub struct ChatClient {
    transport: TransportSession,
    subscriptions: SubscriptionManager,
    directory: ConversationDirectory,
    observer: Box<dyn SessionObserver>,
    last_error: Option<ChatError>,
    stats: SessionStats,
}

impl ChatClient {
    pub fn new(config: SessionConfig, identity: Option<Identity>) -> Self {
        ChatClient {
            transport: TransportSession::new(config, identity),
            subscriptions: SubscriptionManager::new(),
            directory: ConversationDirectory::new(),
            observer: Box::new(NoopObserver),
            last_error: None,
            stats: SessionStats::default(),
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: impl SessionObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn set_observer(&mut self, observer: Box<dyn SessionObserver>) {
        self.observer = observer;
    }

    pub fn seed_jitter(&mut self, seed: u64) {
        self.transport.seed_jitter(seed);
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.transport.epoch() == epoch
    }

    pub fn conversations(&self) -> &[ConversationSummary] {
        self.directory.conversations()
    }

    pub fn messages(&self) -> &[Message] {
        self.subscriptions.buffer().messages()
    }

    pub fn active_room(&self) -> Option<&str> {
        self.subscriptions.active_room()
    }

    pub fn has_pending_subscribe(&self) -> bool {
        self.subscriptions.subscription().is_some_and(|s| s.pending)
    }

    pub fn last_error(&self) -> Option<&ChatError> {
        self.last_error.as_ref()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    // ---- consumer actions ----

    /// Starts connecting. Fails synchronously when no credential is set.
    pub fn connect(&mut self) -> Result<Vec<Command>> {
        let before = self.transport.state();
        let step = self.transport.connect();
        let failure = step.error.clone();
        let commands = self.apply(before, step);
        match failure {
            Some(err) => Err(err),
            None => Ok(commands),
        }
    }

    /// Intentional teardown: closes the connection, cancels any retry, and
    /// forgets the room, messages, and directory.
    pub fn disconnect(&mut self) -> Vec<Command> {
        let before = self.transport.state();
        let step = self.transport.disconnect();
        let commands = self.apply(before, step);
        self.teardown();
        commands
    }

    pub fn set_identity(&mut self, identity: Option<Identity>) -> Vec<Command> {
        let logout = !identity.as_ref().is_some_and(Identity::is_present);
        let before = self.transport.state();
        let step = self.transport.set_identity(identity);
        let commands = self.apply(before, step);
        if logout {
            self.teardown();
        }
        commands
    }

    /// Makes `room_id` the active room. The message buffer is empty when this
    /// returns; the subscribe goes out now if connected, otherwise on the
    /// next transition into `Connected`.
    pub fn select_room(&mut self, room_id: &str) -> Vec<Command> {
        let connected = self.transport.is_connected();
        let subscribe = self.subscriptions.select_room(room_id, connected);
        self.observer.on_messages(&[]);
        info!("Selected room {}", room_id);

        subscribe
            .and_then(|frame| self.transmit(&frame).ok())
            .into_iter()
            .collect()
    }

    pub fn send_message(
        &mut self,
        content: Option<String>,
        attachment_urls: Vec<String>,
    ) -> Result<Vec<Command>> {
        let frame = self.subscriptions.send_message(
            content,
            attachment_urls,
            self.transport.is_connected(),
        )?;
        Ok(vec![self.transmit(&frame)?])
    }

    pub fn mark_read(&mut self) -> Result<Vec<Command>> {
        let frame = self.subscriptions.mark_read(self.transport.is_connected())?;
        let command = self.transmit(&frame)?;

        if let Some(room_id) = self.subscriptions.active_room().map(str::to_owned) {
            if self.directory.mark_read(&room_id) {
                self.observer.on_conversations(self.directory.conversations());
            }
        }
        Ok(vec![command])
    }

    // ---- runtime inputs ----

    pub fn on_open(&mut self, epoch: u64) -> Vec<Command> {
        let before = self.transport.state();
        let step = self.transport.on_open(epoch);
        self.apply(before, step)
    }

    pub fn on_open_failed(&mut self, epoch: u64, reason: &str) -> Vec<Command> {
        let before = self.transport.state();
        let step = self.transport.on_open_failed(epoch, reason);
        self.apply(before, step)
    }

    pub fn on_closed(&mut self, epoch: u64, close: &CloseReason) -> Vec<Command> {
        let before = self.transport.state();
        let step = self.transport.on_closed(epoch, close);
        self.apply(before, step)
    }

    pub fn on_reconnect_timer(&mut self, epoch: u64) -> Vec<Command> {
        let before = self.transport.state();
        let step = self.transport.on_reconnect_timer(epoch);
        self.apply(before, step)
    }

    /// Applies one inbound text frame. Frames from a stale connection and
    /// frames that fail to parse leave all state untouched.
    pub fn handle_frame(&mut self, epoch: u64, text: &str) -> Vec<Command> {
        if !self.is_current(epoch) || !self.transport.is_connected() {
            debug!("Ignoring frame from inactive connection (epoch {})", epoch);
            return Vec::new();
        }
        self.stats.frames_received += 1;

        match messages::decode(text) {
            Ok(Decoded::Event(event)) => self.handle_event(event),
            Ok(Decoded::Unknown(kind)) => {
                self.stats.unknown_frames += 1;
                info!("Ignoring frame of unknown type {:?}", kind);
            }
            Err(e) => {
                self.stats.malformed_frames += 1;
                warn!("Dropping malformed frame: {}", e);
            }
        }
        Vec::new()
    }

    /// The runtime had no open connection left for a frame produced while
    /// connected, so the consumer's send never reached the server.
    pub fn on_frame_dropped(&mut self, reason: &str) {
        self.stats.frames_dropped += 1;
        warn!("Outbound frame not delivered: {}", reason);
        self.report(ChatError::ConnectionLost(format!(
            "outbound frame not delivered: {reason}"
        )));
    }

    fn handle_event(&mut self, event: ServerMessage) {
        match event {
            ServerMessage::ConversationList { conversations } => {
                debug!("Directory resync with {} conversations", conversations.len());
                self.directory.replace_all(conversations);
                self.observer.on_conversations(self.directory.conversations());
            }
            ServerMessage::PastMessages { room_id, messages } => {
                if !self.subscriptions.is_active(&room_id) {
                    debug!("Discarding history for inactive room {}", room_id);
                    return;
                }
                self.subscriptions.buffer_mut().replace_history(messages);
                self.observer.on_messages(self.subscriptions.buffer().messages());
            }
            ServerMessage::NewMessage { message } => {
                if self.subscriptions.is_active(&message.room_id) {
                    let id = message.id.clone();
                    if self.subscriptions.buffer_mut().insert(message) {
                        self.observer.on_messages(self.subscriptions.buffer().messages());
                    } else {
                        debug!("Duplicate message {} ignored", id);
                    }
                } else if self.directory.note_incoming(&message) {
                    self.observer.on_conversations(self.directory.conversations());
                }
            }
            ServerMessage::NewConversation { conversations } => {
                self.directory
                    .upsert(conversations.patch, conversations.count_increase_by);
                self.observer.on_conversations(self.directory.conversations());
            }
            ServerMessage::Error { message } => {
                self.stats.server_errors += 1;
                warn!("Server reported: {}", message);
                self.report(ChatError::ServerReported(message));
            }
        }
    }

    // ---- internals ----

    fn transmit(&mut self, frame: &ClientMessage) -> Result<Command> {
        match messages::encode(frame) {
            Ok(text) => {
                self.stats.frames_sent += 1;
                Ok(Command::Transmit(text))
            }
            Err(e) => {
                error!("Failed to encode {:?}: {}", frame, e);
                Err(e)
            }
        }
    }

    fn report(&mut self, err: ChatError) {
        self.observer.on_error(&err);
        self.last_error = Some(err);
    }

    /// Notifies observers about the transition and replays the pending
    /// subscribe when the connection has just come up.
    fn apply(&mut self, before: ConnectionState, step: Step) -> Vec<Command> {
        let Step {
            mut commands,
            error,
        } = step;

        self.stats.reconnects_scheduled += commands
            .iter()
            .filter(|c| matches!(c, Command::ScheduleReconnect { .. }))
            .count() as u64;

        let after = self.transport.state();
        if after == ConnectionState::Connected && before != after {
            self.last_error = None;
        }
        if let Some(err) = error {
            self.report(err);
        }

        if before != after {
            self.observer.on_state_changed(after);
            if before == ConnectionState::Connected {
                self.subscriptions.on_connection_lost();
            }
            if after == ConnectionState::Connected {
                if let Some(frame) = self.subscriptions.on_connected() {
                    if let Ok(command) = self.transmit(&frame) {
                        commands.push(command);
                    }
                }
            }
        }

        commands
    }

    fn teardown(&mut self) {
        let had_messages = !self.subscriptions.buffer().is_empty();
        self.subscriptions.clear();
        if had_messages {
            self.observer.on_messages(&[]);
        }
        if !self.directory.is_empty() {
            self.directory.clear();
            self.observer.on_conversations(&[]);
        }
    }
}

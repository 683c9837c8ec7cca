//! Connection lifecycle.
//!
//! [`TransportSession`] decides *when* to open, close, and retry the single
//! server connection; it never touches a socket. The runtime executes the
//! [`Command`]s it returns and reports results back tagged with the epoch of
//! the attempt they belong to, so late results from a superseded attempt are
//! recognised and released.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use url::Url;

use crate::config::SessionConfig;
use crate::error::{ChatError, Result};
use crate::models::Identity;

/// Close code the client sends, and accepts from the server, for an
/// intentional shutdown. Any other close triggers the reconnect policy.
pub const GOING_AWAY: u16 = 1001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// `None` when the socket died without a close frame.
    pub code: Option<u16>,
    pub reason: String,
}

impl CloseReason {
    pub fn going_away() -> Self {
        CloseReason {
            code: Some(GOING_AWAY),
            reason: "going away".to_string(),
        }
    }

    pub fn abnormal(reason: impl Into<String>) -> Self {
        CloseReason {
            code: None,
            reason: reason.into(),
        }
    }

    pub fn is_intentional(&self) -> bool {
        self.code == Some(GOING_AWAY)
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "closed with code {code}: {}", self.reason),
            None => write!(f, "dropped: {}", self.reason),
        }
    }
}

/// Instructions for the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Open { epoch: u64, url: Url },
    Transmit(String),
    Close { epoch: u64 },
    ScheduleReconnect { epoch: u64, delay: Duration, attempt: u32 },
    CancelReconnect,
}

/// What a lifecycle input produced.
#[derive(Debug, Default)]
pub struct Step {
    pub commands: Vec<Command>,
    pub error: Option<ChatError>,
}

impl Step {
    fn command(command: Command) -> Self {
        Step {
            commands: vec![command],
            error: None,
        }
    }

    fn failed(error: ChatError) -> Self {
        Step {
            commands: Vec::new(),
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Closed(CloseReason),
}

/// Factory for server connections, injected into the session.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>>;
}

#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, text: String) -> Result<()>;

    /// Next text frame, or the reason the connection ended. Must be
    /// cancel-safe.
    async fn recv(&mut self) -> Inbound;

    /// Sends a going-away close and releases the socket.
    async fn close(&mut self);
}

pub struct TransportSession {
    config: SessionConfig,
    identity: Option<Identity>,
    state: ConnectionState,
    epoch: u64,
    attempt: u32,
    rng: StdRng,
}

impl TransportSession {
    pub fn new(config: SessionConfig, identity: Option<Identity>) -> Self {
        TransportSession {
            config,
            identity,
            state: ConnectionState::Disconnected,
            epoch: 0,
            attempt: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Makes backoff jitter reproducible.
    pub fn seed_jitter(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    fn has_identity(&self) -> bool {
        self.identity.as_ref().is_some_and(Identity::is_present)
    }

    fn is_current(&self, epoch: u64) -> bool {
        epoch == self.epoch
    }

    pub fn connect(&mut self) -> Step {
        if !self.has_identity() {
            warn!("Refusing to connect without a credential");
            self.state = ConnectionState::Disconnected;
            return Step::failed(ChatError::AuthenticationMissing);
        }

        match self.state {
            ConnectionState::Connected | ConnectionState::Connecting => Step::default(),
            ConnectionState::Reconnecting => {
                // manual retry skips the remaining backoff
                let mut step = Step::command(Command::CancelReconnect);
                step.commands.push(Command::Close { epoch: self.epoch });
                let next = self.begin_attempt(ConnectionState::Reconnecting);
                step.commands.extend(next.commands);
                step.error = next.error;
                step
            }
            ConnectionState::Disconnected => {
                self.attempt = 0;
                self.begin_attempt(ConnectionState::Connecting)
            }
        }
    }

    fn begin_attempt(&mut self, state: ConnectionState) -> Step {
        let Some(identity) = self.identity.as_ref() else {
            self.state = ConnectionState::Disconnected;
            return Step::failed(ChatError::AuthenticationMissing);
        };

        let url = match self.config.connect_url(identity) {
            Ok(url) => url,
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                return Step::failed(e);
            }
        };

        self.epoch += 1;
        self.state = state;
        info!(
            "Opening connection to {} (epoch {}, attempt {})",
            self.config.server_url, self.epoch, self.attempt
        );
        Step::command(Command::Open {
            epoch: self.epoch,
            url,
        })
    }

    pub fn on_open(&mut self, epoch: u64) -> Step {
        let opening = matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        );
        if !self.is_current(epoch) || !opening {
            debug!("Releasing connection from stale epoch {}", epoch);
            return Step::command(Command::Close { epoch });
        }

        info!("Connected (epoch {})", epoch);
        self.state = ConnectionState::Connected;
        self.attempt = 0;
        Step::default()
    }

    pub fn on_open_failed(&mut self, epoch: u64, reason: &str) -> Step {
        if !self.is_current(epoch) || self.state == ConnectionState::Disconnected {
            return Step::default();
        }
        warn!("Connection attempt failed: {}", reason);
        let mut step = self.schedule_reconnect();
        step.error = step
            .error
            .or_else(|| Some(ChatError::ConnectionFailed(reason.to_string())));
        step
    }

    pub fn on_closed(&mut self, epoch: u64, close: &CloseReason) -> Step {
        if !self.is_current(epoch) || self.state != ConnectionState::Connected {
            return Step::default();
        }

        if close.is_intentional() || !self.has_identity() {
            info!("Connection closed intentionally ({})", close);
            self.state = ConnectionState::Disconnected;
            return Step::default();
        }

        warn!("Connection lost ({})", close);
        let mut step = self.schedule_reconnect();
        step.error = step
            .error
            .or_else(|| Some(ChatError::ConnectionLost(close.to_string())));
        step
    }

    fn schedule_reconnect(&mut self) -> Step {
        if !self.has_identity() {
            self.state = ConnectionState::Disconnected;
            return Step::failed(ChatError::AuthenticationMissing);
        }

        self.attempt += 1;
        match self.config.reconnect.delay_for(self.attempt, &mut self.rng) {
            Some(delay) => {
                info!("Reconnecting in {:?} (attempt {})", delay, self.attempt);
                self.state = ConnectionState::Reconnecting;
                Step::command(Command::ScheduleReconnect {
                    epoch: self.epoch,
                    delay,
                    attempt: self.attempt,
                })
            }
            None => {
                let attempts = self.attempt - 1;
                warn!("Giving up after {} reconnect attempts", attempts);
                self.state = ConnectionState::Disconnected;
                self.attempt = 0;
                Step::failed(ChatError::PersistentFailure { attempts })
            }
        }
    }

    pub fn on_reconnect_timer(&mut self, epoch: u64) -> Step {
        if !self.is_current(epoch) || self.state != ConnectionState::Reconnecting {
            return Step::default();
        }
        self.begin_attempt(ConnectionState::Reconnecting)
    }

    /// Intentional teardown. Safe in every state; always asks the runtime to
    /// drop the timer and whatever socket belongs to the current epoch.
    pub fn disconnect(&mut self) -> Step {
        let commands = vec![
            Command::CancelReconnect,
            Command::Close { epoch: self.epoch },
        ];
        if self.state != ConnectionState::Disconnected {
            info!("Disconnecting (epoch {})", self.epoch);
        }
        // results still in flight for the old epoch become stale
        self.epoch += 1;
        self.state = ConnectionState::Disconnected;
        self.attempt = 0;
        Step {
            commands,
            error: None,
        }
    }

    /// Installs a new credential. Removing it tears the connection down; a
    /// changed credential on a live connection forces a fresh connect.
    pub fn set_identity(&mut self, identity: Option<Identity>) -> Step {
        let changed = self.identity.as_ref().map(|i| &i.token) != identity.as_ref().map(|i| &i.token);
        self.identity = identity;

        if !self.has_identity() {
            return if self.state == ConnectionState::Disconnected {
                Step::default()
            } else {
                self.disconnect()
            };
        }

        match self.state {
            ConnectionState::Connected | ConnectionState::Connecting if changed => {
                info!("Credential changed, reconnecting");
                let mut step = self.disconnect();
                let next = self.connect();
                step.commands.extend(next.commands);
                step.error = next.error;
                step
            }
            _ => Step::default(),
        }
    }
}

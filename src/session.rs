//! Tokio runtime around [`ChatClient`].
//!
//! A [`ChatSession`] is the consumer-facing handle. It owns the client core
//! behind a mutex that is never held across an `.await`, and one driver task
//! that performs all I/O: opening connections, reading frames in arrival
//! order, writing outbound frames, and sleeping through reconnect backoff.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use url::Url;
use uuid::Uuid;

use crate::client::{ChatClient, SessionStats};
use crate::config::SessionConfig;
use crate::error::{ChatError, Result};
use crate::models::{ConversationSummary, Identity, Message};
use crate::observer::{Fanout, SessionObserver};
use crate::transport::{CloseReason, Command, Connection, ConnectionState, Connector, Inbound};

type Shared = Arc<Mutex<ChatClient>>;
type OpenFuture = Pin<Box<dyn Future<Output = Result<Box<dyn Connection>>> + Send>>;

enum DriverMsg {
    Run(Vec<Command>),
    Shutdown,
}

/// Publishes session state on watch channels.
struct WatchObserver {
    state: watch::Sender<ConnectionState>,
    messages: watch::Sender<Vec<Message>>,
    conversations: watch::Sender<Vec<ConversationSummary>>,
    errors: watch::Sender<Option<ChatError>>,
}

impl SessionObserver for WatchObserver {
    fn on_state_changed(&mut self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn on_error(&mut self, error: &ChatError) {
        self.errors.send_replace(Some(error.clone()));
    }

    fn on_messages(&mut self, messages: &[Message]) {
        self.messages.send_replace(messages.to_vec());
    }

    fn on_conversations(&mut self, conversations: &[ConversationSummary]) {
        self.conversations.send_replace(conversations.to_vec());
    }
}

pub struct ChatSession {
    id: Uuid,
    core: Shared,
    commands: mpsc::UnboundedSender<DriverMsg>,
    driver: Option<JoinHandle<()>>,
    state_rx: watch::Receiver<ConnectionState>,
    messages_rx: watch::Receiver<Vec<Message>>,
    conversations_rx: watch::Receiver<Vec<ConversationSummary>>,
    errors_rx: watch::Receiver<Option<ChatError>>,
}

impl ChatSession {
    /// Creates a session and spawns its driver on the current tokio runtime.
    /// Nothing connects until [`ChatSession::connect`] is called.
    pub fn new(
        config: SessionConfig,
        identity: Option<Identity>,
        connector: impl Connector + 'static,
    ) -> Self {
        Self::with_observer(config, identity, connector, None)
    }

    pub fn with_observer(
        config: SessionConfig,
        identity: Option<Identity>,
        connector: impl Connector + 'static,
        observer: Option<Box<dyn SessionObserver>>,
    ) -> Self {
        Self::from_client(ChatClient::new(config.clone(), identity), &config, connector, observer)
    }

    /// Wraps an already configured client core, e.g. one with seeded jitter.
    pub fn from_client(
        mut client: ChatClient,
        config: &SessionConfig,
        connector: impl Connector + 'static,
        observer: Option<Box<dyn SessionObserver>>,
    ) -> Self {
        let id = Uuid::new_v4();
        let (state_tx, state_rx) = watch::channel(client.connection_state());
        let (messages_tx, messages_rx) = watch::channel(Vec::new());
        let (conversations_tx, conversations_rx) = watch::channel(Vec::new());
        let (errors_tx, errors_rx) = watch::channel(None);

        let mut fanout = Fanout::new().with(WatchObserver {
            state: state_tx,
            messages: messages_tx,
            conversations: conversations_tx,
            errors: errors_tx,
        });
        if let Some(observer) = observer {
            fanout.push(observer);
        }
        client.set_observer(Box::new(fanout));

        let core = Arc::new(Mutex::new(client));
        let (commands, command_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            session: id,
            core: Arc::clone(&core),
            connector: Arc::new(connector),
            connect_timeout: config.connect_timeout,
            commands: command_rx,
            live: None,
            opening: None,
            timer: None,
        };
        let driver = tokio::spawn(driver.run());
        info!("Session {} created", id);

        ChatSession {
            id,
            core,
            commands,
            driver: Some(driver),
            state_rx,
            messages_rx,
            conversations_rx,
            errors_rx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn core(&self) -> MutexGuard<'_, ChatClient> {
        lock(&self.core)
    }

    fn run(&self, commands: Vec<Command>) {
        if commands.is_empty() {
            return;
        }
        if self.commands.send(DriverMsg::Run(commands)).is_err() {
            warn!("Session {}: driver has stopped, commands dropped", self.id);
        }
    }

    pub fn connect(&self) -> Result<()> {
        let commands = self.core().connect()?;
        self.run(commands);
        Ok(())
    }

    pub fn disconnect(&self) {
        let commands = self.core().disconnect();
        self.run(commands);
    }

    pub fn set_identity(&self, identity: Option<Identity>) {
        let commands = self.core().set_identity(identity);
        self.run(commands);
    }

    pub fn select_room(&self, room_id: &str) {
        let commands = self.core().select_room(room_id);
        self.run(commands);
    }

    pub fn send_message(&self, content: Option<String>, attachment_urls: Vec<String>) -> Result<()> {
        let commands = self.core().send_message(content, attachment_urls)?;
        self.run(commands);
        Ok(())
    }

    pub fn mark_read(&self) -> Result<()> {
        let commands = self.core().mark_read()?;
        self.run(commands);
        Ok(())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.core().connection_state()
    }

    pub fn conversations(&self) -> Vec<ConversationSummary> {
        self.core().conversations().to_vec()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.core().messages().to_vec()
    }

    pub fn active_room(&self) -> Option<String> {
        self.core().active_room().map(str::to_owned)
    }

    pub fn last_error(&self) -> Option<ChatError> {
        self.core().last_error().cloned()
    }

    pub fn stats(&self) -> SessionStats {
        self.core().stats()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Full ordered message list of the active room, republished on every
    /// change.
    pub fn watch_messages(&self) -> watch::Receiver<Vec<Message>> {
        self.messages_rx.clone()
    }

    pub fn watch_conversations(&self) -> watch::Receiver<Vec<ConversationSummary>> {
        self.conversations_rx.clone()
    }

    pub fn watch_errors(&self) -> watch::Receiver<Option<ChatError>> {
        self.errors_rx.clone()
    }

    /// Disconnects and waits for the driver to release the socket.
    pub async fn shutdown(mut self) {
        self.disconnect();
        let _ = self.commands.send(DriverMsg::Shutdown);
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                warn!("Session {}: driver ended abnormally: {}", self.id, e);
            }
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            lock(&self.core).disconnect();
            // aborting drops the live connection and any pending timer
            driver.abort();
            debug!("Session {} dropped", self.id);
        }
    }
}

fn lock(core: &Shared) -> MutexGuard<'_, ChatClient> {
    core.lock().unwrap_or_else(PoisonError::into_inner)
}

struct PendingOpen {
    epoch: u64,
    future: OpenFuture,
}

struct Timer {
    epoch: u64,
    sleep: Pin<Box<Sleep>>,
}

enum Wake {
    Command(Option<DriverMsg>),
    Opened(u64, Result<Box<dyn Connection>>),
    Inbound(u64, Inbound),
    Timer(u64),
}

struct Driver {
    session: Uuid,
    core: Shared,
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    commands: mpsc::UnboundedReceiver<DriverMsg>,
    live: Option<(u64, Box<dyn Connection>)>,
    opening: Option<PendingOpen>,
    timer: Option<Timer>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let wake = tokio::select! {
                biased;
                msg = self.commands.recv() => Wake::Command(msg),
                (epoch, result) = finish_open(&mut self.opening) => Wake::Opened(epoch, result),
                (epoch, inbound) = next_inbound(&mut self.live) => Wake::Inbound(epoch, inbound),
                epoch = fire_timer(&mut self.timer) => Wake::Timer(epoch),
            };

            match wake {
                Wake::Command(Some(DriverMsg::Run(commands))) => self.execute(commands).await,
                Wake::Command(Some(DriverMsg::Shutdown) | None) => break,
                Wake::Opened(epoch, Ok(connection)) => {
                    if let Some((_, mut previous)) = self.live.replace((epoch, connection)) {
                        previous.close().await;
                    }
                    let commands = lock(&self.core).on_open(epoch);
                    self.execute(commands).await;
                }
                Wake::Opened(epoch, Err(e)) => {
                    let commands = lock(&self.core).on_open_failed(epoch, &e.to_string());
                    self.execute(commands).await;
                }
                Wake::Inbound(epoch, Inbound::Text(text)) => {
                    let commands = lock(&self.core).handle_frame(epoch, &text);
                    self.execute(commands).await;
                }
                Wake::Inbound(epoch, Inbound::Closed(close)) => {
                    self.live = None;
                    let commands = lock(&self.core).on_closed(epoch, &close);
                    self.execute(commands).await;
                }
                Wake::Timer(epoch) => {
                    let commands = lock(&self.core).on_reconnect_timer(epoch);
                    self.execute(commands).await;
                }
            }
        }

        self.release().await;
        debug!("Session {}: driver stopped", self.session);
    }

    async fn execute(&mut self, commands: Vec<Command>) {
        let mut queue = std::collections::VecDeque::from(commands);
        while let Some(command) = queue.pop_front() {
            match command {
                Command::Open { epoch, url } => self.open(epoch, url),
                Command::Transmit(text) => {
                    if let Some(follow_up) = self.transmit(text).await {
                        queue.extend(follow_up);
                    }
                }
                Command::Close { epoch } => self.close(epoch).await,
                Command::ScheduleReconnect { epoch, delay, attempt } => {
                    debug!(
                        "Session {}: reconnect attempt {} armed for {:?}",
                        self.session, attempt, delay
                    );
                    self.timer = Some(Timer {
                        epoch,
                        sleep: Box::pin(tokio::time::sleep(delay)),
                    });
                }
                Command::CancelReconnect => self.timer = None,
            }
        }
    }

    fn open(&mut self, epoch: u64, url: Url) {
        let connector = Arc::clone(&self.connector);
        let timeout = self.connect_timeout;
        let future: OpenFuture = Box::pin(async move {
            match tokio::time::timeout(timeout, connector.connect(&url)).await {
                Ok(result) => result,
                Err(_) => Err(ChatError::ConnectionFailed(format!(
                    "timed out after {timeout:?}"
                ))),
            }
        });
        // a newer attempt supersedes whatever was still opening
        self.opening = Some(PendingOpen { epoch, future });
    }

    /// Writes one frame. A failed write means the connection is gone; the
    /// commands the core returns for that are handed back to the caller.
    async fn transmit(&mut self, text: String) -> Option<Vec<Command>> {
        let Some((epoch, connection)) = self.live.as_mut() else {
            warn!("Session {}: no live connection, frame dropped", self.session);
            lock(&self.core).on_frame_dropped("connection already closed");
            return None;
        };
        let epoch = *epoch;
        match connection.send(text).await {
            Ok(()) => None,
            Err(e) => {
                warn!("Session {}: write failed: {}", self.session, e);
                self.live = None;
                Some(lock(&self.core).on_closed(epoch, &CloseReason::abnormal(e.to_string())))
            }
        }
    }

    async fn close(&mut self, epoch: u64) {
        if self.opening.as_ref().is_some_and(|p| p.epoch == epoch) {
            self.opening = None;
        }
        if self.live.as_ref().is_some_and(|(live, _)| *live == epoch) {
            if let Some((_, mut connection)) = self.live.take() {
                connection.close().await;
            }
        }
    }

    async fn release(&mut self) {
        self.timer = None;
        self.opening = None;
        if let Some((_, mut connection)) = self.live.take() {
            connection.close().await;
        }
    }
}

async fn finish_open(opening: &mut Option<PendingOpen>) -> (u64, Result<Box<dyn Connection>>) {
    let Some(pending) = opening.as_mut() else {
        return std::future::pending().await;
    };
    let result = pending.future.as_mut().await;
    let epoch = pending.epoch;
    *opening = None;
    (epoch, result)
}

async fn next_inbound(live: &mut Option<(u64, Box<dyn Connection>)>) -> (u64, Inbound) {
    match live.as_mut() {
        Some((epoch, connection)) => (*epoch, connection.recv().await),
        None => std::future::pending().await,
    }
}

async fn fire_timer(timer: &mut Option<Timer>) -> u64 {
    let Some(armed) = timer.as_mut() else {
        return std::future::pending().await;
    };
    armed.sleep.as_mut().await;
    let epoch = armed.epoch;
    *timer = None;
    epoch
}

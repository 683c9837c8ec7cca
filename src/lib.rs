//! Real-time chat synchronization client.
//!
//! Keeps one WebSocket connection to a chat server, follows a single active
//! room, and maintains a local conversation directory and message buffer
//! from server pushes.
//!
//! - [`ChatClient`]: sans-IO core, driven by lifecycle events and frames
//! - [`ChatSession`]: tokio runtime handle that performs the I/O
//! - [`WebSocketConnector`]: tokio-tungstenite transport

pub mod backoff;
pub mod buffer;
pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod messages;
pub mod models;
pub mod observer;
pub mod session;
pub mod subscription;
pub mod transport;
pub mod websocket;

pub use backoff::ReconnectPolicy;
pub use client::{ChatClient, SessionStats};
pub use config::SessionConfig;
pub use error::{ChatError, Result};
pub use models::{ConversationPatch, ConversationSummary, Identity, LastMessage, Message};
pub use observer::{LoggingObserver, SessionObserver};
pub use session::ChatSession;
pub use transport::{CloseReason, Command, Connection, ConnectionState, Connector, Inbound};
pub use websocket::WebSocketConnector;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatError>;

/// Everything that can go wrong between the consumer and the chat server.
///
/// Transport failures (`ConnectionFailed`, `ConnectionLost`, `PersistentFailure`)
/// are reported through the session observer; action failures are returned
/// directly from the call that caused them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("not authenticated: no credential available")]
    AuthenticationMissing,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("gave up reconnecting after {attempts} attempts")]
    PersistentFailure { attempts: u32 },

    #[error("message not sent: no room selected")]
    NoRoomSelected,

    #[error("not connected to the chat server")]
    NotConnected,

    #[error("message has neither content nor attachments")]
    EmptyMessage,

    #[error("server error: {0}")]
    ServerReported(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    #[error("failed to encode frame: {0}")]
    Encode(String),
}

impl ChatError {
    /// Whether the session recovers from this error on its own.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ChatError::ConnectionFailed(_) | ChatError::ConnectionLost(_))
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::MalformedFrame(err.to_string())
    }
}

impl From<url::ParseError> for ChatError {
    fn from(err: url::ParseError) -> Self {
        ChatError::InvalidUrl(err.to_string())
    }
}

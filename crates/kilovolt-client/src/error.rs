//! Client error types

use thiserror::Error;

/// Result type alias for Kilovolt client operations
pub type Result<T> = std::result::Result<T, KilovoltError>;

/// Kilovolt client errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KilovoltError {
    /// Malformed inbound frame
    #[error("Protocol decode error: {0}")]
    ProtocolDecode(String),

    /// Response carried a request id nobody is waiting for
    #[error("Unroutable response for request id: {0}")]
    UnroutableResponse(String),

    #[error("Duplicate request id: {0}")]
    DuplicateRequestId(String),

    #[error("Not subscribed: {0}")]
    NotSubscribed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Request timed out")]
    RequestTimeout,

    #[error("Timed out waiting for server hello")]
    HandshakeTimeout,

    #[error("Session is already connected")]
    AlreadyConnected,

    #[error("Transport error: {0}")]
    Transport(String),

    /// Server answered a command with `ok: false`
    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for KilovoltError {
    fn from(err: serde_json::Error) -> Self {
        KilovoltError::Serialization(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for KilovoltError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        KilovoltError::Transport(err.to_string())
    }
}

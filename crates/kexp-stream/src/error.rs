//! Error types for the stream protocol.
//!
//! Errors fall into two groups: message-local failures that are logged and
//! absorbed (decode errors, unknown methods, handler failures) and
//! connection-fatal failures that tear the connection down (transport read
//! and write errors).

use thiserror::Error;

/// Main error type for the stream protocol.
#[derive(Debug, Error)]
pub enum StreamError {
    // Envelope errors
    #[error("Decode error: {message}")]
    Decode {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Invalid params for {method}: {message}")]
    InvalidParams { method: String, message: String },

    // Connection errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Reply channel closed")]
    ReplyChannelClosed,

    #[error("Operation was cancelled")]
    Cancelled,

    // Call registry errors
    #[error("Call ID already active: {id}")]
    DuplicateCall { id: String },

    #[error("Too many active calls (limit {limit})")]
    TooManyCalls { limit: usize },

    #[error("Call handler failed: {message}")]
    Handler { message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for stream operations.
pub type Result<T> = std::result::Result<T, StreamError>;

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Decode {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl StreamError {
    /// Create a transport error from any displayable cause.
    pub fn transport(cause: impl std::fmt::Display) -> Self {
        StreamError::Transport {
            message: cause.to_string(),
        }
    }

    /// Create a handler failure from any displayable cause.
    pub fn handler(cause: impl std::fmt::Display) -> Self {
        StreamError::Handler {
            message: cause.to_string(),
        }
    }

    /// Whether this error ends the connection it happened on.
    ///
    /// Everything else is local to one message or one call.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, StreamError::Transport { .. })
    }
}

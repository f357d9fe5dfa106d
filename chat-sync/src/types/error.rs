//! Unified error types for the sync engine
//!
//! Errors are serializable so a renderer can receive them as `{type, message}`
//! objects. Only a few of them ever reach a caller: reconciliation anomalies are
//! logged and swallowed, and transport failures are absorbed by the send queue
//! until the retry bound is exhausted.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "message")]
pub enum SyncError {
    /// No connection at send time. The send stays queued.
    #[error("Transport unavailable")]
    TransportUnavailable,

    /// The transport did not acknowledge a send within the configured bound.
    #[error("No acknowledgement for {0} within timeout")]
    AckTimeout(String),

    /// A confirmation that matched no local message.
    #[error("Orphan confirmation event: {0}")]
    OrphanEvent(String),

    /// A sender field whose shape could not be recognized.
    #[error("Ambiguous sender shape: {0}")]
    OwnershipAmbiguous(String),

    /// Terminal send failure. The owning message is now in `error`.
    #[error("Send {client_id} failed after {attempts} attempts")]
    RetryExhausted { client_id: String, attempts: u32 },

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Parse(err.to_string())
    }
}

/// Result type alias using SyncError
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serializes_tagged() {
        let err = SyncError::RetryExhausted {
            client_id: "temp_1".to_string(),
            attempts: 3,
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "RetryExhausted");
        assert_eq!(json["message"]["client_id"], "temp_1");
    }
}

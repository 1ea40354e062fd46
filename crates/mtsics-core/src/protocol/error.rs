//! Protocol errors

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors that can occur while talking to a balance
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Command '{command}' timed out, want: {expected}, got: {observed:?}")]
    Timeout {
        command: String,
        expected: String,
        observed: String,
    },

    #[error("Could not parse {field} from {text:?}")]
    Parse { field: &'static str, text: String },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Command '{command}' rejected by device: {reply:?}")]
    Rejected { command: String, reply: String },

    #[error("Command '{command}' cancelled")]
    Cancelled { command: String },

    #[error("Unexpected reply for operation {operation}")]
    UnexpectedReply { operation: String },

    #[error("Config file error: {0}")]
    Config(String),
}

impl ProtocolError {
    /// True for errors the caller may reasonably retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProtocolError::Timeout { .. })
    }
}

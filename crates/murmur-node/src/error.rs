//! Error types for the node runtime.

use murmur_core::NodeId;
use thiserror::Error;

/// Errors that can occur while running a node.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Input closed before init")]
    NotInitialized,

    #[error("Expected init as the first message, got {0}")]
    UnexpectedFirstMessage(String),

    #[error("No reply from {dest} before the timeout")]
    Timeout { dest: NodeId },

    #[error("Transport closed")]
    Closed,

    #[error("Remote error {code}: {text}")]
    Rpc { code: u32, text: String },

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
}

pub type Result<T> = std::result::Result<T, NodeError>;

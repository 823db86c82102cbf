//! Error types for the protocol layer.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors produced while encoding or decoding protocol messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The payload is not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// A write request carried a missing or non-string key.
    #[error("key must be a string")]
    InvalidKey,

    /// The payload is valid JSON but has the wrong shape.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

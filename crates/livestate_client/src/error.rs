//! Error types for the sync client.

use livestate_protocol::ProtocolError;
use thiserror::Error;

/// Result type for client operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while reading, writing or streaming shared state.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server answered with a non-success status.
    #[error("HTTP error! status: {status}")]
    Http {
        /// HTTP status code.
        status: u16,
    },

    /// The server sent a payload that could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A local value could not be converted to or from JSON.
    #[error("codec error: {0}")]
    Codec(String),

    /// The network is known to be unreachable.
    #[error("cannot update while offline")]
    Offline,

    /// The operation was superseded or aborted.
    #[error("operation cancelled")]
    Cancelled,

    /// The environment lacks a required capability.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Http { status } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true if this is a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection refused").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Http { status: 503 }.is_retryable());
        assert!(!SyncError::Http { status: 400 }.is_retryable());
        assert!(!SyncError::Offline.is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }

    #[test]
    fn cancellation_is_distinct() {
        assert!(SyncError::Cancelled.is_cancelled());
        assert!(!SyncError::Offline.is_cancelled());
    }

    #[test]
    fn error_display() {
        assert_eq!(SyncError::Http { status: 500 }.to_string(), "HTTP error! status: 500");
        assert_eq!(SyncError::Offline.to_string(), "cannot update while offline");
    }
}

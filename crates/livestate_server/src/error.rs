//! Error types for the state server.

use livestate_protocol::{ErrorResponse, ProtocolError};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the state server.
///
/// The display text of client errors is the `error` field of the response
/// body.
#[derive(Error, Debug)]
pub enum ServerError {
    /// A read without a `key` parameter.
    #[error("Key parameter is required")]
    MissingKey,

    /// A write whose key is missing or not a string.
    #[error("Key must be a string")]
    InvalidKey,

    /// A body that is not valid JSON.
    #[error("Invalid JSON")]
    InvalidJson,

    /// Valid JSON of the wrong shape.
    #[error("Invalid data")]
    InvalidData,

    /// The stream subscriber limit is reached.
    #[error("Too many subscribers (limit {limit})")]
    TooManySubscribers {
        /// Configured limit.
        limit: usize,
    },

    /// No endpoint at this path.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::MissingKey
            | ServerError::InvalidKey
            | ServerError::InvalidJson
            | ServerError::InvalidData => 400,
            ServerError::NotFound(_) => 404,
            ServerError::TooManySubscribers { .. } => 503,
            ServerError::Internal(_) => 500,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// JSON body `{"error": "..."}` for this error.
    pub fn to_body(&self) -> Vec<u8> {
        ErrorResponse::new(self.to_string())
            .encode()
            .unwrap_or_default()
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidJson(_) => ServerError::InvalidJson,
            ProtocolError::InvalidKey => ServerError::InvalidKey,
            ProtocolError::InvalidData(_) => ServerError::InvalidData,
        }
    }
}

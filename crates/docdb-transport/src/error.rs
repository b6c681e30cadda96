//! Transport error types

use std::time::Duration;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors raised below the HTTP status line: the request never produced a
/// response, or the response could not be read.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// HTTP protocol error
    #[error("HTTP error: {0}")]
    Http(String),

    /// Connection could not be established or was reset
    #[error("Connection error: {0}")]
    Connection(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The wire call did not complete within the configured timeout
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Body could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The request was malformed before it reached the wire
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Generic transport error
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if the wire call timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Classify a reqwest failure, using `timeout` as the reported limit.
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout)
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else if err.is_body() || err.is_decode() {
            Self::Serialization(err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

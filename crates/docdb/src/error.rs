//! Error types for the docdb client
//!
//! Three kinds of failure reach callers:
//!
//! - client-side validation errors, raised before anything touches the network;
//! - [`ServiceError`], the typed error built from a service response (or a wire
//!   timeout). It is the only error retry policies ever act on;
//! - everything else (transport faults, serialization, configuration), which is
//!   surfaced as-is and never retried.
//!
//! Terminal errors keep the typed error in their `source()` chain, so callers can
//! always branch on [`Error::status`] and [`Error::sub_status`].

use crate::constants::headers;
use docdb_core::retry::{RetryFailure, find_cause};
use docdb_transport::TransportError;
use http::{HeaderMap, StatusCode};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for docdb operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the docdb client.
#[derive(Debug, Error)]
pub enum Error {
    /// A required argument was missing or malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The client configuration is unusable.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The service answered with an error status, or the wire call timed out.
    #[error("{0}")]
    Service(#[from] ServiceError),

    /// The request never produced a response.
    #[error("Transport error: {0}")]
    Transport(#[source] TransportError),

    /// Failed to serialize a request body or deserialize a response.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The retry safety ceiling was reached.
    #[error("Gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Attempts made by the layer that gave up
        attempts: u32,
        /// The last failure
        #[source]
        source: Box<Error>,
    },

    /// The caller aborted the operation while a retry was pending.
    #[error("Aborted after {attempts} attempts")]
    Aborted {
        /// Attempts made before the abort
        attempts: u32,
        /// The failure that was about to be retried
        #[source]
        source: Box<Error>,
    },

    /// Other errors not covered by specific variants.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// The typed service error behind this error, if there is one.
    pub fn service_error(&self) -> Option<&ServiceError> {
        find_cause::<ServiceError>(self)
    }

    /// HTTP status of the underlying service error.
    pub fn status(&self) -> Option<StatusCode> {
        self.service_error().map(ServiceError::status)
    }

    /// Sub-status of the underlying service error.
    pub fn sub_status(&self) -> Option<u32> {
        self.service_error().and_then(ServiceError::sub_status)
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }
}

impl From<TransportError> for Error {
    /// Wire timeouts become 408 service errors so retry policies can see them.
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(after) => Error::Service(ServiceError::timeout(after)),
            other => Error::Transport(other),
        }
    }
}

impl From<RetryFailure<Error>> for Error {
    fn from(failure: RetryFailure<Error>) -> Self {
        match failure {
            RetryFailure::Terminal(err) => err,
            // an inner layer already gave up; don't wrap twice
            RetryFailure::Exhausted { last, .. } | RetryFailure::Aborted { last, .. }
                if matches!(
                    last,
                    Error::RetriesExhausted { .. } | Error::Aborted { .. }
                ) =>
            {
                last
            }
            RetryFailure::Exhausted { attempts, last } => Error::RetriesExhausted {
                attempts,
                source: Box::new(last),
            },
            RetryFailure::Aborted { attempts, last } => Error::Aborted {
                attempts,
                source: Box::new(last),
            },
        }
    }
}

/// Whether a [`ServiceError`] came from a response or from the client's own timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    /// The service returned an error status.
    Response,
    /// The wire call exceeded the request timeout.
    Timeout,
}

/// Typed error carrying everything the service told us about a failure.
#[derive(Debug, Clone)]
pub struct ServiceError {
    status: StatusCode,
    sub_status: Option<u32>,
    kind: ServiceErrorKind,
    message: String,
    code: Option<String>,
    activity_id: Option<String>,
    retry_after: Option<Duration>,
    headers: HeaderMap,
}

impl ServiceError {
    /// Build an error from a response status line, headers and body text.
    ///
    /// A JSON body of the form `{"code": "...", "message": "..."}` is unpacked;
    /// anything else becomes the message verbatim.
    pub fn from_response(status: StatusCode, headers: HeaderMap, body: &str) -> Self {
        let (code, message) = match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => (parsed.code, parsed.message.unwrap_or_default()),
            Err(_) => (None, body.trim().to_string()),
        };

        let message = if message.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            message
        };

        Self {
            status,
            sub_status: parse_header::<u32>(&headers, headers::SUB_STATUS),
            kind: ServiceErrorKind::Response,
            message,
            code,
            activity_id: header_string(&headers, headers::ACTIVITY_ID),
            retry_after: parse_header::<u64>(&headers, headers::RETRY_AFTER_MS)
                .map(Duration::from_millis),
            headers,
        }
    }

    /// A client-side timeout, reported as 408 Request Timeout.
    pub fn timeout(after: Duration) -> Self {
        Self {
            status: StatusCode::REQUEST_TIMEOUT,
            sub_status: None,
            kind: ServiceErrorKind::Timeout,
            message: format!("request timed out after {:?}", after),
            code: None,
            activity_id: None,
            retry_after: None,
            headers: HeaderMap::new(),
        }
    }

    /// Build an error from individual parts; mostly useful in tests.
    pub fn new(status: StatusCode, sub_status: Option<u32>, message: impl Into<String>) -> Self {
        Self {
            status,
            sub_status,
            kind: ServiceErrorKind::Response,
            message: message.into(),
            code: None,
            activity_id: None,
            retry_after: None,
            headers: HeaderMap::new(),
        }
    }

    /// Attach a retry-after hint.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// HTTP status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Service-specific sub-status code.
    pub fn sub_status(&self) -> Option<u32> {
        self.sub_status
    }

    /// Response error or client timeout.
    pub fn kind(&self) -> ServiceErrorKind {
        self.kind
    }

    /// Returns `true` for client-side timeouts.
    pub fn is_timeout(&self) -> bool {
        self.kind == ServiceErrorKind::Timeout
    }

    /// Error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Error code from the response body.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Activity id assigned by the service.
    pub fn activity_id(&self) -> Option<&str> {
        self.activity_id.as_deref()
    }

    /// Server-provided delay before the request may be retried.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// Session token reported alongside the failure.
    pub fn session_token(&self) -> Option<&str> {
        self.headers
            .get(headers::SESSION_TOKEN)
            .and_then(|v| v.to_str().ok())
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service error (status {}", self.status.as_u16())?;
        if let Some(sub_status) = self.sub_status {
            write!(f, ", sub-status {}", sub_status)?;
        }
        write!(f, "): {}", self.message)
    }
}

impl std::error::Error for ServiceError {}

#[derive(Debug, serde::Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

fn parse_header<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

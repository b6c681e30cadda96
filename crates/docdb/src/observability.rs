//! Structured logging for request execution
//!
//! Every logical operation gets an operation id, and the executor reports
//! each phase transition through [`RequestMetadata::log_phase`]. Completed
//! operations are logged once through [`ResponseMetadata`].

use crate::request::{OperationKind, ResourceType, ServiceRequest};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Phases of a logical operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationPhase {
    /// Headers, session token and signature are being prepared
    Building,
    /// The request is on the wire
    Dispatching,
    /// A failed attempt is waiting for its retry delay
    Retrying,
    /// A response was accepted
    Succeeded,
    /// The operation surfaced an error
    Failed,
}

impl OperationPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Building => "building",
            Self::Dispatching => "dispatching",
            Self::Retrying => "retrying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for OperationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one logical operation, attached to every log record it produces.
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    /// Client-side id shared by all attempts
    pub operation_id: Uuid,
    pub operation: OperationKind,
    pub resource_type: ResourceType,
    /// Normalized resource path
    pub path: String,
}

impl RequestMetadata {
    pub fn for_request(request: &ServiceRequest) -> Self {
        Self {
            operation_id: Uuid::new_v4(),
            operation: request.operation(),
            resource_type: request.resource_type(),
            path: request.address().path().to_string(),
        }
    }

    /// Log a phase transition.
    pub fn log_phase(&self, phase: OperationPhase, attempt: u32) {
        debug!(
            operation_id = %self.operation_id,
            operation = %self.operation,
            resource_type = %self.resource_type,
            path = %self.path,
            phase = %phase,
            attempt,
            "operation phase"
        );
    }
}

/// Outcome of a logical operation.
#[derive(Debug, Clone)]
pub struct ResponseMetadata {
    /// HTTP status of the final attempt, if one produced a response
    pub status: Option<u16>,
    /// Time from the first build to the outcome
    pub elapsed: Duration,
    /// Dispatches made, across all retry layers
    pub attempts: u32,
    /// Request units charged for the final attempt
    pub request_charge: Option<f64>,
}

impl ResponseMetadata {
    pub fn new(status: Option<u16>, elapsed: Duration, attempts: u32) -> Self {
        Self {
            status,
            elapsed,
            attempts,
            request_charge: None,
        }
    }

    pub fn with_request_charge(mut self, charge: Option<f64>) -> Self {
        self.request_charge = charge;
        self
    }

    /// Log successful completion
    pub fn log_success(&self, request: &RequestMetadata) {
        info!(
            operation_id = %request.operation_id,
            operation = %request.operation,
            path = %request.path,
            status = self.status,
            elapsed_ms = self.elapsed.as_millis() as u64,
            attempts = self.attempts,
            request_charge = self.request_charge,
            "request succeeded"
        );
    }

    /// Log terminal failure
    pub fn log_error(&self, request: &RequestMetadata, error: &dyn std::error::Error) {
        warn!(
            operation_id = %request.operation_id,
            operation = %request.operation,
            path = %request.path,
            status = self.status,
            elapsed_ms = self.elapsed.as_millis() as u64,
            attempts = self.attempts,
            error = %error,
            "request failed"
        );
    }
}

/// Timer for measuring operation duration
pub struct RequestTimer {
    start: Instant,
}

impl RequestTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Install a `fmt` subscriber filtered by `RUST_LOG`.
///
/// Does nothing if a global subscriber is already set.
#[cfg(feature = "trace")]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docdb=info")))
        .try_init();
}

//! Retry policies.
//!
//! A failed attempt is classified by its status and sub-status into at most one
//! [`RetryPolicyKind`]. Each kind has its own policy with its own counters and
//! limits; failures that match no kind are terminal.
//!
//! Two advisors drive the [`RetryDriver`](docdb_core::retry::RetryDriver):
//!
//! - [`RequestRetryPolicy`] handles endpoint discovery, throttling and
//!   session-read failures around a single dispatch;
//! - [`PartitionKeyMismatchPolicy`] wraps the whole operation for writes whose
//!   partition key was derived from a cached collection definition.

mod endpoint_discovery;
mod partition_key;
mod session_read;
mod throttle;

pub use endpoint_discovery::EndpointDiscoveryPolicy;
pub use partition_key::PartitionKeyMismatchPolicy;
pub use session_read::SessionReadNotAvailablePolicy;
pub use throttle::ResourceThrottlePolicy;

use crate::config::RetryOptions;
use crate::constants::sub_status;
use crate::endpoint::EndpointManager;
use crate::error::{Error, Result, ServiceError};
use crate::request::OperationKind;
use async_trait::async_trait;
use docdb_core::retry::{RetryAdvisor, RetryDecision};
use http::StatusCode;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which policy, if any, handles a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryPolicyKind {
    /// Not retryable
    None,
    /// 400 / 1001
    PartitionKeyMismatch,
    /// 403 / 3
    EndpointDiscovery,
    /// 429
    ResourceThrottle,
    /// 404 / 1002
    SessionReadNotAvailable,
}

impl RetryPolicyKind {
    /// Classify a failure.
    ///
    /// Partition key mismatches are only recoverable for document writes whose
    /// key was derived from the collection definition; a pinned key can't be
    /// fixed by refreshing the cache.
    pub fn select(
        status: StatusCode,
        sub_status: Option<u32>,
        operation: OperationKind,
        partition_key_pinned: bool,
    ) -> Self {
        match (status, sub_status) {
            (StatusCode::BAD_REQUEST, Some(sub_status::PARTITION_KEY_MISMATCH)) => {
                if operation.writes_document_body() && !partition_key_pinned {
                    Self::PartitionKeyMismatch
                } else {
                    Self::None
                }
            }
            (StatusCode::FORBIDDEN, Some(sub_status::WRITE_FORBIDDEN)) => Self::EndpointDiscovery,
            (StatusCode::TOO_MANY_REQUESTS, _) => Self::ResourceThrottle,
            (StatusCode::NOT_FOUND, Some(sub_status::READ_SESSION_NOT_AVAILABLE)) => {
                Self::SessionReadNotAvailable
            }
            _ => Self::None,
        }
    }

    /// Classify a typed error, routing client timeouts of reads to the
    /// throttle policy when `retry_read_timeouts` is set.
    pub fn for_error(
        error: &ServiceError,
        operation: OperationKind,
        partition_key_pinned: bool,
        retry_read_timeouts: bool,
    ) -> Self {
        if error.is_timeout() {
            return if retry_read_timeouts && operation.is_read_only() {
                Self::ResourceThrottle
            } else {
                Self::None
            };
        }
        Self::select(
            error.status(),
            error.sub_status(),
            operation,
            partition_key_pinned,
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::PartitionKeyMismatch => "partition_key_mismatch",
            Self::EndpointDiscovery => "endpoint_discovery",
            Self::ResourceThrottle => "resource_throttle",
            Self::SessionReadNotAvailable => "session_read_not_available",
        }
    }
}

impl fmt::Display for RetryPolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One per-dispatch retry policy with its per-operation state.
///
/// Partition key mismatches have no variant here: [`PartitionKeyMismatchPolicy`]
/// drives its own outer layer.
#[derive(Debug)]
pub enum RetryPolicy {
    EndpointDiscovery(EndpointDiscoveryPolicy),
    ResourceThrottle(ResourceThrottlePolicy),
    SessionReadNotAvailable(SessionReadNotAvailablePolicy),
}

impl RetryPolicy {
    pub fn kind(&self) -> RetryPolicyKind {
        match self {
            Self::EndpointDiscovery(_) => RetryPolicyKind::EndpointDiscovery,
            Self::ResourceThrottle(_) => RetryPolicyKind::ResourceThrottle,
            Self::SessionReadNotAvailable(_) => RetryPolicyKind::SessionReadNotAvailable,
        }
    }

    /// Decide what to do about `error`, the failure of attempt `attempt`.
    pub async fn on_failure(&mut self, error: &ServiceError, attempt: u32) -> Result<RetryDecision> {
        match self {
            Self::EndpointDiscovery(policy) => policy.on_failure(error, attempt).await,
            Self::ResourceThrottle(policy) => Ok(policy.on_failure(error, attempt)),
            Self::SessionReadNotAvailable(policy) => Ok(policy.on_failure(error, attempt)),
        }
    }
}

/// Advisor for a single dispatch: endpoint discovery, throttling and session reads.
///
/// Variant state is created on first use and lives for the whole operation.
/// Once the advisor declines it keeps declining.
pub struct RequestRetryPolicy {
    operation: OperationKind,
    partition_key_pinned: bool,
    endpoints: Arc<dyn EndpointManager>,
    options: RetryOptions,
    discovery_enabled: bool,
    policies: Vec<RetryPolicy>,
    denied: bool,
}

impl RequestRetryPolicy {
    pub fn new(
        operation: OperationKind,
        partition_key_pinned: bool,
        endpoints: Arc<dyn EndpointManager>,
        options: RetryOptions,
        discovery_enabled: bool,
    ) -> Self {
        Self {
            operation,
            partition_key_pinned,
            endpoints,
            options,
            discovery_enabled,
            policies: Vec::new(),
            denied: false,
        }
    }

    /// Whether a previous failure was declined.
    pub fn is_denied(&self) -> bool {
        self.denied
    }

    fn policy_for(&mut self, kind: RetryPolicyKind) -> Option<&mut RetryPolicy> {
        let index = match self.policies.iter().position(|p| p.kind() == kind) {
            Some(index) => index,
            None => {
                let policy = match kind {
                    RetryPolicyKind::EndpointDiscovery => {
                        RetryPolicy::EndpointDiscovery(EndpointDiscoveryPolicy::new(
                            Arc::clone(&self.endpoints),
                            self.options.endpoint_discovery.clone(),
                            self.discovery_enabled,
                        ))
                    }
                    RetryPolicyKind::ResourceThrottle => RetryPolicy::ResourceThrottle(
                        ResourceThrottlePolicy::new(self.options.throttle.clone()),
                    ),
                    RetryPolicyKind::SessionReadNotAvailable => {
                        let max_retries = self
                            .options
                            .session_read_max_retries
                            .unwrap_or_else(|| self.endpoints.read_location_count().max(1) as u32);
                        RetryPolicy::SessionReadNotAvailable(SessionReadNotAvailablePolicy::new(
                            Arc::clone(&self.endpoints),
                            max_retries,
                        ))
                    }
                    // handled by the outer layer, or not retryable
                    RetryPolicyKind::PartitionKeyMismatch | RetryPolicyKind::None => return None,
                };
                self.policies.push(policy);
                self.policies.len() - 1
            }
        };
        self.policies.get_mut(index)
    }
}

#[async_trait]
impl RetryAdvisor<Error> for RequestRetryPolicy {
    type Failure = ServiceError;

    async fn on_failure(&mut self, failure: &ServiceError, attempt: u32) -> Result<RetryDecision> {
        if self.denied {
            return Ok(RetryDecision::Stop);
        }

        let kind = RetryPolicyKind::for_error(
            failure,
            self.operation,
            self.partition_key_pinned,
            self.options.retry_read_timeouts,
        );

        let decision = match self.policy_for(kind) {
            Some(policy) => policy.on_failure(failure, attempt).await?,
            None => RetryDecision::Stop,
        };

        match decision {
            RetryDecision::Retry(delay) => warn!(
                policy = %kind,
                attempt,
                status = failure.status().as_u16(),
                sub_status = failure.sub_status(),
                delay_ms = delay.as_millis() as u64,
                "retrying request"
            ),
            RetryDecision::Stop => {
                self.denied = true;
                debug!(
                    policy = %kind,
                    attempt,
                    status = failure.status().as_u16(),
                    "request not retried"
                );
            }
        }
        Ok(decision)
    }
}

impl fmt::Debug for RequestRetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestRetryPolicy")
            .field("operation", &self.operation)
            .field("partition_key_pinned", &self.partition_key_pinned)
            .field("policies", &self.policies)
            .field("denied", &self.denied)
            .finish()
    }
}

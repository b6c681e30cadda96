use crate::endpoint::EndpointManager;
use crate::error::ServiceError;
use docdb_core::retry::RetryDecision;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Retries reads rejected with 404 / read-session-not-available on the next
/// read region.
///
/// The replica that served the attempt had not yet caught up with the session
/// token; another region may have.
pub struct SessionReadNotAvailablePolicy {
    endpoints: Arc<dyn EndpointManager>,
    max_retries: u32,
    retries: u32,
}

impl SessionReadNotAvailablePolicy {
    pub fn new(endpoints: Arc<dyn EndpointManager>, max_retries: u32) -> Self {
        Self {
            endpoints,
            max_retries,
            retries: 0,
        }
    }

    pub fn on_failure(&mut self, _error: &ServiceError, attempt: u32) -> RetryDecision {
        if self.retries >= self.max_retries {
            return RetryDecision::Stop;
        }

        self.endpoints.rotate_read_endpoint();
        self.retries += 1;
        debug!(
            attempt,
            retry = self.retries,
            read_endpoint = %self.endpoints.read_endpoint(),
            "session not yet available, trying next read region"
        );
        RetryDecision::retry_now()
    }
}

impl fmt::Debug for SessionReadNotAvailablePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionReadNotAvailablePolicy")
            .field("max_retries", &self.max_retries)
            .field("retries", &self.retries)
            .finish()
    }
}

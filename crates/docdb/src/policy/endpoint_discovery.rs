use crate::config::EndpointDiscoveryOptions;
use crate::endpoint::EndpointManager;
use crate::error::{Result, ServiceError};
use docdb_core::retry::RetryDecision;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Retries writes rejected with 403 / write-forbidden after refreshing the
/// regional topology, so the next attempt goes to the new write region.
pub struct EndpointDiscoveryPolicy {
    endpoints: Arc<dyn EndpointManager>,
    options: EndpointDiscoveryOptions,
    enabled: bool,
    retries: u32,
    observed_generation: u64,
}

impl EndpointDiscoveryPolicy {
    pub fn new(endpoints: Arc<dyn EndpointManager>, options: EndpointDiscoveryOptions, enabled: bool) -> Self {
        let observed_generation = endpoints.generation();
        Self {
            endpoints,
            options,
            enabled,
            retries: 0,
            observed_generation,
        }
    }

    pub async fn on_failure(&mut self, _error: &ServiceError, attempt: u32) -> Result<RetryDecision> {
        if !self.enabled || self.retries >= self.options.max_retries {
            return Ok(RetryDecision::Stop);
        }

        self.endpoints.refresh(self.observed_generation).await?;
        self.observed_generation = self.endpoints.generation();
        self.retries += 1;

        info!(
            attempt,
            retry = self.retries,
            write_endpoint = %self.endpoints.write_endpoint(),
            "write region changed, retrying"
        );
        Ok(RetryDecision::Retry(self.options.retry_interval))
    }
}

impl fmt::Debug for EndpointDiscoveryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointDiscoveryPolicy")
            .field("enabled", &self.enabled)
            .field("retries", &self.retries)
            .field("observed_generation", &self.observed_generation)
            .finish()
    }
}

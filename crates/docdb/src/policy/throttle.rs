use crate::config::ThrottleOptions;
use crate::error::ServiceError;
use docdb_core::retry::{BackoffStrategy, RetryDecision};
use std::time::Duration;
use tracing::debug;

/// Retries requests rejected with 429.
///
/// The delay is the service's retry-after hint scaled by `backoff_factor`, or
/// the fallback backoff when no hint was sent. Gives up once `max_attempts`
/// dispatches were throttled or the next delay would push the total wait past
/// `max_cumulative_wait`.
#[derive(Debug, Clone)]
pub struct ResourceThrottlePolicy {
    options: ThrottleOptions,
    retries: u32,
    cumulative_wait: Duration,
}

impl ResourceThrottlePolicy {
    pub fn new(options: ThrottleOptions) -> Self {
        Self {
            options,
            retries: 0,
            cumulative_wait: Duration::ZERO,
        }
    }

    /// Total time this policy has asked the driver to wait.
    pub fn cumulative_wait(&self) -> Duration {
        self.cumulative_wait
    }

    fn delay_for(&self, error: &ServiceError) -> Duration {
        match error.retry_after() {
            Some(hint) => {
                let scaled = hint.as_secs_f64() * self.options.backoff_factor;
                Duration::try_from_secs_f64(scaled).unwrap_or(Duration::MAX)
            }
            None => self
                .options
                .fallback_backoff
                .next_delay(self.retries)
                .unwrap_or_else(|| self.options.fallback_backoff.max_delay()),
        }
    }

    pub fn on_failure(&mut self, error: &ServiceError, attempt: u32) -> RetryDecision {
        // the failed dispatch counts against max_attempts
        if self.retries + 1 >= self.options.max_attempts {
            debug!(attempt, throttled = self.retries + 1, "throttle attempts exhausted");
            return RetryDecision::Stop;
        }

        let delay = self.delay_for(error);
        let total = self.cumulative_wait.saturating_add(delay);
        if total > self.options.max_cumulative_wait {
            debug!(
                attempt,
                waited_ms = self.cumulative_wait.as_millis() as u64,
                next_ms = delay.as_millis() as u64,
                "throttle wait budget exhausted"
            );
            return RetryDecision::Stop;
        }

        self.retries += 1;
        self.cumulative_wait = total;
        RetryDecision::Retry(delay)
    }
}

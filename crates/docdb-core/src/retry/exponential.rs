//! Exponential backoff with jitter.

use super::strategy::BackoffStrategy;
use std::time::Duration;

/// Exponential backoff strategy with configurable jitter.
///
/// For retry `n` (0-indexed after the first failure):
///
/// ```text
/// base   = initial_delay * multiplier^n
/// jitter = base * jitter_factor * random(-1.0, +1.0)
/// delay  = min(base + jitter, max_delay)
/// ```
///
/// Used by the throttling policy when the service does not send a retry-after hint.
///
/// ```rust
/// use docdb_core::retry::{BackoffStrategy, ExponentialBackoff};
/// use std::time::Duration;
///
/// let backoff = ExponentialBackoff::builder()
///     .max_retries(8)
///     .initial_delay(Duration::from_millis(100))
///     .max_delay(Duration::from_secs(5))
///     .build();
///
/// assert_eq!(backoff.max_retries(), 8);
/// ```
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: f64,
}

impl ExponentialBackoff {
    /// Create a new builder for configuring exponential backoff.
    pub fn builder() -> ExponentialBackoffBuilder {
        ExponentialBackoffBuilder::default()
    }

    /// Upper bound applied to every computed delay.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

impl Default for ExponentialBackoff {
    /// `max_retries` 8, `initial_delay` 100ms, `max_delay` 5s, `multiplier` 2.0,
    /// `jitter` 0.1.
    fn default() -> Self {
        ExponentialBackoffBuilder::default().build()
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let max = self.max_delay.as_secs_f64();
        // powi can overflow to inf for large attempts; cap before jitter so the sum stays finite
        let base = (self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent)).min(max);

        let jittered = if self.jitter > 0.0 {
            let spread = base * self.jitter * (rand::random::<f64>() - 0.5) * 2.0;
            base + spread
        } else {
            base
        };

        let capped = jittered.clamp(0.0, max);
        Some(Duration::from_secs_f64(capped))
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

/// Builder for [`ExponentialBackoff`]. Unset fields fall back to the defaults.
#[derive(Debug, Default)]
pub struct ExponentialBackoffBuilder {
    max_retries: Option<u32>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
    jitter: Option<f64>,
}

impl ExponentialBackoffBuilder {
    /// Maximum number of retries. Default: 8.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Delay before the first retry. Default: 100ms.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Cap for any single delay. Default: 5s.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Growth factor between retries. Default: 2.0.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Jitter factor, clamped to `0.0..=1.0`. Default: 0.1.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = Some(jitter.clamp(0.0, 1.0));
        self
    }

    /// Build the strategy.
    pub fn build(self) -> ExponentialBackoff {
        ExponentialBackoff {
            max_retries: self.max_retries.unwrap_or(8),
            initial_delay: self.initial_delay.unwrap_or(Duration::from_millis(100)),
            max_delay: self.max_delay.unwrap_or(Duration::from_secs(5)),
            multiplier: self.multiplier.unwrap_or(2.0),
            jitter: self.jitter.unwrap_or(0.1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn no_jitter() -> ExponentialBackoff {
        ExponentialBackoff::builder()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_secs(10))
            .jitter(0.0)
            .build()
    }

    #[test]
    fn test_delays_double() {
        let backoff = no_jitter();
        assert_eq!(backoff.next_delay(0), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_delay(1), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_delay(2), Some(Duration::from_millis(400)));
        assert_eq!(backoff.next_delay(3), Some(Duration::from_millis(800)));
    }

    #[test]
    fn test_delay_is_capped() {
        let backoff = ExponentialBackoff::builder()
            .initial_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(5))
            .multiplier(10.0)
            .jitter(0.0)
            .build();

        for attempt in 2..10 {
            assert_eq!(backoff.next_delay(attempt), Some(Duration::from_secs(5)));
        }
        // far past any sane attempt count the float math saturates, still capped
        assert_eq!(backoff.next_delay(u32::MAX), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let backoff = ExponentialBackoff::builder()
            .initial_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(60))
            .jitter(0.5)
            .build();

        for _ in 0..50 {
            let millis = backoff.next_delay(0).unwrap().as_millis();
            assert!((500..=1500).contains(&millis), "got {millis}ms");
        }
    }

    #[test]
    fn test_builder_defaults() {
        let backoff = ExponentialBackoff::default();
        assert_eq!(backoff.max_retries(), 8);
        assert_eq!(backoff.initial_delay, Duration::from_millis(100));
        assert_eq!(backoff.max_delay(), Duration::from_secs(5));
        assert_eq!(backoff.multiplier, 2.0);
        assert_eq!(backoff.jitter, 0.1);
    }

    proptest! {
        #[test]
        fn prop_delay_never_exceeds_cap(
            attempt in 0u32..64,
            initial_ms in 1u64..2_000,
            max_ms in 1u64..60_000,
            jitter in 0.0f64..1.0,
        ) {
            let backoff = ExponentialBackoff::builder()
                .initial_delay(Duration::from_millis(initial_ms))
                .max_delay(Duration::from_millis(max_ms))
                .jitter(jitter)
                .build();
            let delay = backoff.next_delay(attempt).unwrap();
            prop_assert!(delay <= Duration::from_millis(max_ms));
        }
    }

    #[test]
    fn test_jitter_clamped() {
        assert_eq!(ExponentialBackoff::builder().jitter(2.0).build().jitter, 1.0);
        assert_eq!(ExponentialBackoff::builder().jitter(-0.5).build().jitter, 0.0);
    }
}

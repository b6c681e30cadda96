//! Backoff strategies and the decision type shared by every retry advisor.

use std::time::Duration;

/// What a retry advisor wants the driver to do with a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-attempt the operation once the delay has elapsed.
    Retry(Duration),
    /// Surface the failure to the caller.
    Stop,
}

impl RetryDecision {
    /// Retry immediately.
    pub const fn retry_now() -> Self {
        Self::Retry(Duration::ZERO)
    }

    /// Returns `true` if the decision asks for another attempt.
    pub fn should_retry(&self) -> bool {
        matches!(self, Self::Retry(_))
    }

    /// The delay before the next attempt, if any.
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::Retry(delay) => Some(*delay),
            Self::Stop => None,
        }
    }
}

/// A source of delays between successive attempts.
///
/// Strategies are pure: they compute a delay for an attempt index and report how
/// many retries they allow, but never sleep themselves. Sleeping is the job of
/// [`RetryDriver`](super::RetryDriver), which keeps every suspension point in one
/// place.
///
/// # Examples
///
/// ```rust
/// use docdb_core::retry::{BackoffStrategy, ExponentialBackoff};
/// use std::time::Duration;
///
/// let backoff = ExponentialBackoff::builder()
///     .initial_delay(Duration::from_millis(50))
///     .jitter(0.0)
///     .build();
///
/// assert_eq!(backoff.next_delay(1), Some(Duration::from_millis(100)));
/// ```
pub trait BackoffStrategy: Send + Sync {
    /// Delay before retry number `attempt + 1` (0-indexed: `0` is the delay after
    /// the first failure). `None` means the strategy has nothing more to offer.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;

    /// Maximum number of retries after the initial attempt.
    fn max_retries(&self) -> u32;
}

//! The generic retry loop.
//!
//! [`RetryDriver`] runs an operation, hands every failure to a [`RetryAdvisor`]
//! and either sleeps and re-runs the operation or surfaces the failure. Policies
//! never loop on their own; the driver owns the attempt counter and the safety
//! ceiling so that a defective advisor cannot retry forever.

use super::abort::AbortSignal;
use super::strategy::RetryDecision;
use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Decides whether a typed failure is worth another attempt.
///
/// `Failure` is the error kind the advisor understands. The driver looks for it in
/// the failure's `source()` chain and never consults the advisor for errors that
/// do not carry one. `E` is the operation's own error type, which lets the advisor
/// substitute a different terminal error (for example when refreshing a cache
/// fails while deciding).
#[async_trait]
pub trait RetryAdvisor<E>: Send {
    /// The typed failure this advisor reacts to.
    type Failure: Error + Send + Sync + 'static;

    /// Called once per failed attempt with its 1-based index.
    async fn on_failure(&mut self, failure: &Self::Failure, attempt: u32)
    -> Result<RetryDecision, E>;
}

/// Counts dispatches across stacked retry layers of one logical operation.
///
/// Each layer has its own attempt counter, but only the innermost layer touches
/// the wire. Sharing a budget lets every layer enforce the ceiling against the
/// real number of dispatches.
#[derive(Debug, Clone, Default)]
pub struct AttemptBudget {
    spent: Arc<AtomicU32>,
}

impl AttemptBudget {
    /// A fresh budget with nothing spent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one dispatch and return the running total.
    pub fn record(&self) -> u32 {
        self.spent.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Dispatches recorded so far.
    pub fn spent(&self) -> u32 {
        self.spent.load(Ordering::SeqCst)
    }
}

/// Why the driver gave up.
#[derive(Debug)]
pub enum RetryFailure<E> {
    /// The advisor declined (or the failure was not retryable at all).
    Terminal(E),
    /// The safety ceiling was reached; `last` is the final failure.
    Exhausted {
        /// Attempts made by this driver.
        attempts: u32,
        /// The failure of the last attempt.
        last: E,
    },
    /// The caller aborted while a retry delay was pending.
    Aborted {
        /// Attempts made before the abort.
        attempts: u32,
        /// The failure that was about to be retried.
        last: E,
    },
}

impl<E> RetryFailure<E> {
    /// The underlying operation error, whatever the reason for giving up.
    pub fn into_inner(self) -> E {
        match self {
            Self::Terminal(err) => err,
            Self::Exhausted { last, .. } | Self::Aborted { last, .. } => last,
        }
    }

    /// Borrow the underlying operation error.
    pub fn inner(&self) -> &E {
        match self {
            Self::Terminal(err) => err,
            Self::Exhausted { last, .. } | Self::Aborted { last, .. } => last,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminal(err) => write!(f, "{}", err),
            Self::Exhausted { attempts, last } => {
                write!(f, "gave up after {} attempts: {}", attempts, last)
            }
            Self::Aborted { attempts, last } => {
                write!(f, "aborted after {} attempts: {}", attempts, last)
            }
        }
    }
}

impl<E: Error + 'static> Error for RetryFailure<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.inner())
    }
}

/// Walk an error's `source()` chain and return the innermost `T`.
pub fn find_cause<'a, T: Error + 'static>(error: &'a (dyn Error + 'static)) -> Option<&'a T> {
    let mut found = None;
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(typed) = err.downcast_ref::<T>() {
            found = Some(typed);
        }
        current = err.source();
    }
    found
}

/// Bounded, strictly sequential retry loop.
///
/// # Examples
///
/// ```rust
/// use docdb_core::retry::{RetryAdvisor, RetryDecision, RetryDriver};
/// use std::io;
///
/// struct Twice;
///
/// #[async_trait::async_trait]
/// impl RetryAdvisor<io::Error> for Twice {
///     type Failure = io::Error;
///
///     async fn on_failure(&mut self, _: &io::Error, attempt: u32) -> Result<RetryDecision, io::Error> {
///         Ok(if attempt < 2 { RetryDecision::retry_now() } else { RetryDecision::Stop })
///     }
/// }
///
/// # async fn example() {
/// let driver = RetryDriver::new(10);
/// let result = driver
///     .run(&mut Twice, |_attempt| async { Err::<(), _>(io::Error::other("boom")) })
///     .await;
/// assert!(result.is_err());
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RetryDriver {
    ceiling: u32,
    budget: Option<AttemptBudget>,
    abort: Option<AbortSignal>,
    label: &'static str,
}

impl RetryDriver {
    /// Default hard ceiling on attempts for one logical operation.
    pub const DEFAULT_CEILING: u32 = 200;

    /// Create a driver that never makes more than `ceiling` attempts.
    pub fn new(ceiling: u32) -> Self {
        Self {
            ceiling: ceiling.max(1),
            budget: None,
            abort: None,
            label: "retry",
        }
    }

    /// Enforce the ceiling against a budget shared with other layers.
    pub fn with_budget(mut self, budget: AttemptBudget) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Make pending retry delays cancellable.
    pub fn with_abort(mut self, signal: AbortSignal) -> Self {
        self.abort = Some(signal);
        self
    }

    /// Name used in log records emitted by this driver.
    pub fn with_label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    /// The configured ceiling.
    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    fn ceiling_reached(&self, attempt: u32) -> bool {
        attempt >= self.ceiling
            || self
                .budget
                .as_ref()
                .is_some_and(|budget| budget.spent() >= self.ceiling)
    }

    /// Run `operation` until it succeeds or the advisor or ceiling stop it.
    ///
    /// The operation receives the 1-based attempt index.
    pub async fn run<A, F, Fut, T, E>(
        &self,
        advisor: &mut A,
        mut operation: F,
    ) -> Result<T, RetryFailure<E>>
    where
        A: RetryAdvisor<E> + ?Sized,
        F: FnMut(u32) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: Error + Send + Sync + 'static,
    {
        let mut attempt: u32 = 1;
        loop {
            let err = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let Some(failure) = find_cause::<A::Failure>(&err) else {
                warn!(layer = self.label, attempt, error = %err, "unknown error, cannot retry");
                return Err(RetryFailure::Terminal(err));
            };

            if self.ceiling_reached(attempt) {
                warn!(
                    layer = self.label,
                    attempt,
                    ceiling = self.ceiling,
                    error = %err,
                    "retry ceiling reached"
                );
                return Err(RetryFailure::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = match advisor.on_failure(failure, attempt).await {
                Ok(RetryDecision::Retry(delay)) => delay,
                Ok(RetryDecision::Stop) => {
                    debug!(layer = self.label, attempt, "advisor declined retry");
                    return Err(RetryFailure::Terminal(err));
                }
                Err(substitute) => {
                    warn!(
                        layer = self.label,
                        attempt,
                        error = %substitute,
                        "retry decision failed"
                    );
                    return Err(RetryFailure::Terminal(substitute));
                }
            };

            debug!(
                layer = self.label,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "scheduling retry"
            );

            if self.wait(delay).await.is_err() {
                return Err(RetryFailure::Aborted {
                    attempts: attempt,
                    last: err,
                });
            }
            attempt += 1;
        }
    }

    async fn wait(&self, delay: Duration) -> Result<(), ()> {
        let Some(signal) = &self.abort else {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            return Ok(());
        };

        if signal.is_aborted() {
            return Err(());
        }
        let mut signal = signal.clone();
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = signal.aborted() => Err(()),
        }
    }
}

impl Default for RetryDriver {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CEILING)
    }
}

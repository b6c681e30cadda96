//! Retry primitives: backoff strategies, the retry driver and cancellation.
//!
//! # Key Types
//!
//! - [`BackoffStrategy`] / [`ExponentialBackoff`] - delay computation
//! - [`RetryAdvisor`] - per-operation policy consulted on every failure
//! - [`RetryDriver`] - bounded, sequential retry loop with a safety ceiling
//! - [`AttemptBudget`] - dispatch counter shared by stacked retry layers
//! - [`AbortHandle`] / [`AbortSignal`] - cancel pending retry delays

mod abort;
mod driver;
mod exponential;
mod strategy;

pub use abort::{AbortHandle, AbortSignal};
pub use driver::{AttemptBudget, RetryAdvisor, RetryDriver, RetryFailure, find_cause};
pub use exponential::{ExponentialBackoff, ExponentialBackoffBuilder};
pub use strategy::{BackoffStrategy, RetryDecision};

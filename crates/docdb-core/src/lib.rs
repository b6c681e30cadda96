#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Core retry abstractions for the docdb client crates.
//!
//! Nothing in here knows about HTTP or the database wire protocol:
//!
//! - **Backoff strategies** via the `BackoffStrategy` trait and `ExponentialBackoff`
//! - **A generic retry driver** that pairs each failure with its attempt index,
//!   asks a `RetryAdvisor` what to do, and enforces a hard attempt ceiling
//! - **Cancellation** of pending retry delays through `AbortHandle`
//!
//! # Examples
//!
//! ```rust
//! use docdb_core::prelude::*;
//! use std::time::Duration;
//!
//! let backoff = ExponentialBackoff::builder()
//!     .max_retries(3)
//!     .initial_delay(Duration::from_millis(100))
//!     .build();
//! assert_eq!(backoff.max_retries(), 3);
//! ```

pub mod retry;

/// Convenient re-exports of commonly used items.
pub mod prelude {
    pub use crate::retry::{
        AbortHandle, AbortSignal, AttemptBudget, BackoffStrategy, ExponentialBackoff,
        RetryAdvisor, RetryDecision, RetryDriver, RetryFailure,
    };
}

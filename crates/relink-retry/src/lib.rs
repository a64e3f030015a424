//! Backoff policies and retry timers for relink connections.
//!
//! A [`BackoffPolicy`] decides how long to wait before each reconnect attempt
//! and how many attempts to make. [`plan`] turns a policy and a retry number
//! into a delay, or [`RetriesExhausted`] once the limit is passed.
//! [`RetryScheduler`] owns the single retry timer a connection may have armed
//! on its serialized [`WorkQueue`](relink_core::WorkQueue).
//!
//! # Example
//!
//! ```rust
//! use relink_retry::{plan, BackoffPolicy};
//! use std::time::Duration;
//!
//! let policy = BackoffPolicy::new(Duration::from_millis(10))
//!     .multiplier(2.0)
//!     .max_delay(Duration::from_millis(50))
//!     .max_attempts(4);
//!
//! assert_eq!(plan(&policy, 1), Ok(Duration::from_millis(10)));
//! assert_eq!(plan(&policy, 3), Ok(Duration::from_millis(40)));
//! assert_eq!(plan(&policy, 4), Ok(Duration::from_millis(50)));
//! assert!(plan(&policy, 5).is_err());
//! ```
//!
//! # Backoff Strategies
//!
//! - [`FixedInterval`]: constant delay
//! - [`ExponentialBackoff`]: exponential growth with optional cap
//! - [`ExponentialRandomBackoff`]: exponential with jitter, never above the cap

pub mod backoff;
pub mod policy;
pub mod scheduler;

pub use backoff::{ExponentialBackoff, ExponentialRandomBackoff, FixedInterval, IntervalFunction};
pub use policy::{BackoffPolicy, DEFAULT_INITIAL_DELAY, DEFAULT_MULTIPLIER};
pub use scheduler::{plan, RetriesExhausted, RetryScheduler};

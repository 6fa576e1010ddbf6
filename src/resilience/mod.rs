//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Cycle ends in Busy, Timeout or rollback:
//!     → backoff.rs (delay with jitter, bounded attempt budget)
//!     → daemon schedules another cycle with the same desired state
//! ```
//!
//! Timeouts on individual control calls live in the reconciler itself.
//! An invalid configuration is never retried; it waits for the next edit.

pub mod backoff;

pub use backoff::RetryPolicy;

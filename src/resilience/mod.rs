//! Resilience helpers.
//!
//! # Data Flow
//! ```text
//! Log batch push fails:
//!     → backoff.rs (wait base * 2^n with jitter, capped)
//!     → retry until max_retries, then drop the batch and count it
//! ```

pub mod backoff;

pub use backoff::RetryPolicy;

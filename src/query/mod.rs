//! Query execution for sqlcmdr.
//!
//! Runs ad-hoc SQL batches under a row cap with cooperative cancellation.

pub mod executor;

pub use executor::{QueryExecutor, BATCH_TIMEOUT};

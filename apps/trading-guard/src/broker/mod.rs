//! Broker call resilience.
//!
//! Error classification and the retry policy applied around every broker API
//! call.

mod classify;
mod retry;

pub use classify::{Classify, ErrorKind, OperationError};
pub use retry::{RetryAttempt, RetryExecutor, RetryPolicy};

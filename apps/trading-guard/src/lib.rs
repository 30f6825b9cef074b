// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Trading Guard - reliability layer for broker calls
//!
//! Keeps a trading bot well-behaved when its broker misbehaves, and keeps
//! several bot processes from stepping on the same positions.
//!
//! # Components
//!
//! - `resilience`: persisted consecutive-failure circuit breaker
//! - `broker`: error classification and exponential-backoff retries
//! - `safety`: cross-process advisory lock for position-mutating operations
//! - `guard`: the breaker, retries and lock composed for application code
//! - `config`: YAML configuration with environment variable interpolation
//! - `observability`: metrics and log subscriber setup
//!
//! # Call Flow
//!
//! ```text
//! TradingGuard::run_exclusive ── position lock
//!   └─ ReliableCaller::call ──── circuit breaker gate
//!        └─ RetryExecutor::run ─ backoff + classification
//!             └─ broker API call
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Error classification and retry policy for broker calls.
pub mod broker;

/// Configuration loading and validation.
pub mod config;

/// Composition of breaker, retries and position lock.
pub mod guard;

/// Metrics and logging.
pub mod observability;

/// Circuit breaker with persisted state.
pub mod resilience;

/// Cross-process position lock.
pub mod safety;

pub use broker::{Classify, ErrorKind, OperationError, RetryExecutor, RetryPolicy};
pub use config::{ConfigError, ReliabilityConfig, load_config, load_config_from_string};
pub use guard::{GuardError, ReliableCaller, TradingGuard};
pub use resilience::{
    BreakerError, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState,
    InvalidBreakerName,
};
pub use safety::{ExclusiveOperationLock, LockError, OperationLockGuard};

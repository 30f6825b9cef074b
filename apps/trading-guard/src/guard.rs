//! Composition of the breaker, retry executor and position lock.
//!
//! Every broker call goes through a [`ReliableCaller`]: the circuit breaker
//! gates the call and the retry executor runs inside it, so one broker call
//! counts as a single breaker outcome no matter how many attempts it took.
//! Position-mutating sequences additionally run under the
//! [`ExclusiveOperationLock`] via [`TradingGuard::run_exclusive`].
//!
//! # Example
//!
//! ```rust,ignore
//! use trading_guard::{TradingGuard, config::load_config};
//!
//! let guard = TradingGuard::from_config(&load_config(None)?);
//! guard.run_exclusive(|caller| {
//!     let position = caller.call("get_position", || client.get_position("AAPL"))?;
//!     caller.call("close_position", || client.close_position(&position))
//! })?;
//! ```

use std::fmt::Display;
use std::sync::Arc;

use thiserror::Error;

use crate::broker::{Classify, RetryExecutor};
use crate::config::ReliabilityConfig;
use crate::resilience::{BreakerError, CircuitBreaker};
use crate::safety::{ExclusiveOperationLock, LockError};

/// A breaker-gated, retried caller for one broker.
#[derive(Debug, Clone)]
pub struct ReliableCaller {
    breaker: Arc<CircuitBreaker>,
    retry: RetryExecutor,
}

impl ReliableCaller {
    /// Combine a shared breaker and a retry executor.
    #[must_use]
    pub const fn new(breaker: Arc<CircuitBreaker>, retry: RetryExecutor) -> Self {
        Self { breaker, retry }
    }

    /// Build both halves from the application configuration.
    #[must_use]
    pub fn from_config(config: &ReliabilityConfig) -> Self {
        Self::new(
            Arc::new(CircuitBreaker::from_config(config)),
            RetryExecutor::from_config(config),
        )
    }

    /// The breaker guarding this caller.
    #[must_use]
    pub const fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// The retry executor.
    #[must_use]
    pub const fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    /// Run `f` with retries, gated by the circuit breaker.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Unavailable`] without running `f` while the
    /// circuit is open, otherwise the error of the final attempt.
    pub fn call<T, E, F>(&self, operation: &str, f: F) -> Result<T, BreakerError<E>>
    where
        E: Classify + Display,
        F: FnMut() -> Result<T, E>,
    {
        self.breaker.call(|| self.retry.run(operation, f))
    }
}

/// Errors from [`TradingGuard::run_exclusive`].
#[derive(Debug, Error)]
pub enum GuardError<E> {
    /// The position lock could not be acquired; nothing was run.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// The guarded operation failed.
    #[error(transparent)]
    Operation(E),
}

/// Everything a bot needs to talk to its broker safely.
#[derive(Debug, Clone)]
pub struct TradingGuard {
    caller: ReliableCaller,
    lock: ExclusiveOperationLock,
}

impl TradingGuard {
    /// Combine a caller with the position lock.
    #[must_use]
    pub const fn new(caller: ReliableCaller, lock: ExclusiveOperationLock) -> Self {
        Self { caller, lock }
    }

    /// Build the whole stack from the application configuration.
    #[must_use]
    pub fn from_config(config: &ReliabilityConfig) -> Self {
        Self::new(
            ReliableCaller::from_config(config),
            ExclusiveOperationLock::from_config(config),
        )
    }

    /// The reliable caller.
    #[must_use]
    pub const fn caller(&self) -> &ReliableCaller {
        &self.caller
    }

    /// The position lock.
    #[must_use]
    pub const fn lock(&self) -> &ExclusiveOperationLock {
        &self.lock
    }

    /// Run `f` while holding the position lock for the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Lock`] if the lock is not acquired in time, or
    /// [`GuardError::Operation`] with the error `f` returned.
    pub fn run_exclusive<T, E, F>(&self, f: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce(&ReliableCaller) -> Result<T, E>,
    {
        let _guard = self.lock.acquire(self.lock.timeout())?;
        f(&self.caller).map_err(GuardError::Operation)
    }
}

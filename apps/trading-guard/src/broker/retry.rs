//! Retry policy with exponential backoff for broker API calls.
//!
//! A call is attempted up to `max_retries + 1` times. Between attempts the
//! executor sleeps for
//!
//! ```text
//! min(backoff_factor * 2^attempt + uniform(0, 1), max_delay)   seconds
//! ```
//!
//! The jitter keeps several bot instances from retrying a rate-limited API in
//! lockstep. Errors classified as terminal (see [`super::ErrorKind`]) are
//! returned on first occurrence.
//!
//! # Example
//!
//! ```rust,ignore
//! use trading_guard::broker::{RetryExecutor, RetryPolicy};
//!
//! let retry = RetryExecutor::new(RetryPolicy::default());
//! let bars = retry.run("get_historical_prices", || client.get_bars(&request))?;
//! ```

use std::fmt::Display;
use std::time::Duration;

use rand::Rng;

use super::classify::Classify;
use crate::observability;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (default: 3).
    pub max_retries: u32,
    /// Base delay in seconds, doubled each attempt (default: 1.0).
    pub backoff_factor: f64,
    /// Upper bound on a single delay (default: 60s).
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 1.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy.
    #[must_use]
    pub const fn new(max_retries: u32, backoff_factor: f64, max_delay: Duration) -> Self {
        Self {
            max_retries,
            backoff_factor,
            max_delay,
        }
    }

    /// Total attempts including the first one.
    #[must_use]
    pub const fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Exponential component of the delay after `attempt` (0-indexed), in
    /// seconds.
    #[must_use]
    pub fn base_delay_secs(&self, attempt: u32) -> f64 {
        self.backoff_factor * 2f64.powi(i32::try_from(attempt).unwrap_or(i32::MAX))
    }

    /// Delay after `attempt` for a given jitter in `[0, 1]`.
    #[must_use]
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let secs = self.base_delay_secs(attempt) + jitter;
        let capped = secs.min(self.max_delay.as_secs_f64());
        if !capped.is_finite() || capped < 0.0 {
            return self.max_delay;
        }
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    /// Delay after `attempt` with fresh random jitter.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let jitter = rand::rng().random_range(0.0..=1.0);
        self.delay_with_jitter(attempt, jitter)
    }
}

/// One failed attempt and what the executor decided to do about it.
#[derive(Debug)]
pub struct RetryAttempt<'a, E> {
    /// Attempt index, starting at 0.
    pub attempt: u32,
    /// Sleep before the next attempt; `None` when no retry follows.
    pub delay: Option<Duration>,
    /// The error this attempt produced.
    pub error: &'a E,
    /// Whether the error's kind allows retrying.
    pub retryable: bool,
}

/// Runs fallible operations under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Create an executor for `policy`.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Create the executor described by the application configuration.
    #[must_use]
    pub fn from_config(config: &crate::config::ReliabilityConfig) -> Self {
        Self::new(config.retry.to_policy())
    }

    /// Get the policy.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Decide what follows a failed `attempt`.
    #[must_use]
    pub fn plan<'a, E: Classify>(&self, attempt: u32, error: &'a E) -> RetryAttempt<'a, E> {
        let retryable = error.error_kind().is_retryable();
        let delay = (retryable && attempt < self.policy.max_retries)
            .then(|| self.policy.next_delay(attempt));

        RetryAttempt {
            attempt,
            delay,
            error,
            retryable,
        }
    }

    /// Run `operation` until it succeeds, fails terminally, or runs out of
    /// attempts.
    ///
    /// The error from the final attempt is returned unchanged.
    pub fn run<T, E, F>(&self, operation: &str, mut f: F) -> Result<T, E>
    where
        E: Classify + Display,
        F: FnMut() -> Result<T, E>,
    {
        let total = self.policy.total_attempts();
        let mut attempt = 0;

        loop {
            let error = match f() {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let RetryAttempt {
                delay, retryable, ..
            } = self.plan(attempt, &error);

            if !retryable {
                observability::record_retry_outcome(operation, "non_retryable");
                tracing::error!(
                    operation,
                    kind = %error.error_kind(),
                    error = %error,
                    "Non-retryable error"
                );
                return Err(error);
            }

            let Some(delay) = delay else {
                observability::record_retry_outcome(operation, "exhausted");
                tracing::error!(
                    operation,
                    attempts = total,
                    error = %error,
                    "All attempts failed"
                );
                return Err(error);
            };

            observability::record_retry_attempt(operation);
            tracing::warn!(
                operation,
                attempt = attempt + 1,
                max_attempts = total,
                delay_secs = delay.as_secs_f64(),
                error = %error,
                "Attempt failed, retrying"
            );
            std::thread::sleep(delay);
            attempt += 1;
        }
    }
}

//! Circuit breaker for broker API calls.
//!
//! Stops calling a dependency that keeps failing, probes it again once a
//! cool-down has passed, and keeps its state on disk so a restarted bot does
//! not hammer a broker that was already known to be down.
//!
//! # State Machine
//!
//! ```text
//! CLOSED → OPEN (consecutive failures >= threshold)
//! OPEN → HALF_OPEN (open timeout elapsed since last failure)
//! HALF_OPEN → CLOSED (probe succeeds)
//! HALF_OPEN → OPEN (probe fails)
//! ```
//!
//! # Persistence
//!
//! State is loaded from `<state_dir>/circuit_breaker_<name>.json` when the
//! breaker is constructed. Every recorded outcome re-reads that file, applies
//! the transition and writes it back under one exclusive file lock, so bot
//! processes sharing a state directory never lose each other's failures.
//! The gate itself uses the in-memory view, which only refreshes at
//! construction, on recorded outcomes and on [`CircuitBreaker::reload`].
//!
//! # Example
//!
//! ```rust,ignore
//! use trading_guard::resilience::{CircuitBreaker, CircuitBreakerConfig};
//!
//! let breaker = CircuitBreaker::new("alpaca", CircuitBreakerConfig::default());
//! let account = breaker.call(|| broker.get_account())?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::state_store::{PersistedState, StateStore};
use crate::broker::{Classify, ErrorKind};
use crate::observability;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerState {
    /// Circuit is closed, calls flow normally.
    #[default]
    Closed,
    /// Circuit is open, calls are rejected.
    Open,
    /// Circuit is letting a probe call through.
    HalfOpen,
}

impl CircuitBreakerState {
    /// Numeric value exported on the `circuit_breaker_state` gauge.
    #[must_use]
    pub const fn gauge_value(self) -> f64 {
        match self {
            Self::Closed => observability::circuit_breaker_state::CLOSED,
            Self::Open => observability::circuit_breaker_state::OPEN,
            Self::HalfOpen => observability::circuit_breaker_state::HALF_OPEN,
        }
    }
}

impl std::fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time to stay `OPEN` before a probe call is allowed.
    pub open_timeout: Duration,
    /// Directory holding the state files.
    pub state_dir: PathBuf,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(300),
            state_dir: PathBuf::from("logs"),
        }
    }
}

/// Error returned from [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit is open and the call was not attempted.
    #[error("Circuit breaker '{name}' is OPEN - service unavailable")]
    Unavailable {
        /// Breaker name.
        name: String,
    },

    /// The wrapped operation failed; the error is passed through untouched.
    #[error(transparent)]
    Operation(E),
}

impl<E> BreakerError<E> {
    /// Whether the call was rejected without being attempted.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// The wrapped operation's error, if the operation ran.
    #[must_use]
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::Unavailable { .. } => None,
        }
    }

    /// Borrow the wrapped operation's error, if the operation ran.
    #[must_use]
    pub const fn operation(&self) -> Option<&E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::Unavailable { .. } => None,
        }
    }
}

impl<E: Classify> Classify for BreakerError<E> {
    fn error_kind(&self) -> ErrorKind {
        match self {
            // An open circuit clears by itself once the timeout passes.
            Self::Unavailable { .. } => ErrorKind::Transient,
            Self::Operation(e) => e.error_kind(),
        }
    }
}

/// A breaker name that cannot be embedded in its state file name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid circuit breaker name '{0}': use ASCII letters, digits, '_', '-' and '.', not starting with '.'")]
pub struct InvalidBreakerName(pub String);

/// Whether `name` is usable in `circuit_breaker_<name>.json`.
#[must_use]
pub fn is_valid_breaker_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Point-in-time view of a breaker, for status export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    /// Breaker name.
    pub name: String,
    /// Current state.
    pub state: CircuitBreakerState,
    /// Consecutive failures.
    pub failure_count: u32,
    /// Time of the most recent failure.
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Configured failure threshold.
    pub failure_threshold: u32,
    /// Configured open timeout in seconds.
    pub open_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    ForceOpen,
}

impl Outcome {
    fn apply(self, record: &mut PersistedState, threshold: u32, now: DateTime<Utc>) {
        match self {
            Self::Success => {
                record.failure_count = 0;
                record.state = CircuitBreakerState::Closed;
            }
            Self::Failure => {
                record.failure_count = record.failure_count.saturating_add(1);
                record.last_failure_time = Some(now);
                if record.failure_count >= threshold
                    || record.state == CircuitBreakerState::HalfOpen
                {
                    record.state = CircuitBreakerState::Open;
                }
            }
            Self::ForceOpen => {
                record.failure_count = record.failure_count.max(threshold);
                record.last_failure_time = Some(now);
                record.state = CircuitBreakerState::Open;
            }
        }
        record.last_updated = now;
    }
}

/// Why a call was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Permit {
    Normal,
    Probe,
}

/// Releases the `HALF_OPEN` probe slot if the probe call unwinds.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.abandon_probe();
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    record: PersistedState,
    /// Set while the single `HALF_OPEN` probe is running.
    probe_in_flight: bool,
}

/// Persisted consecutive-failure circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Service name for logging and the state file name.
    name: String,
    config: CircuitBreakerConfig,
    store: StateStore,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker, loading any state persisted under `name`.
    ///
    /// A missing or unreadable state file yields a fresh `CLOSED` breaker.
    ///
    /// # Panics
    ///
    /// Panics if `name` fails [`is_valid_breaker_name`]; use
    /// [`CircuitBreaker::try_new`] for names that are not known to be valid.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        assert!(
            is_valid_breaker_name(&name),
            "invalid circuit breaker name '{name}'"
        );
        Self::load(name, config)
    }

    /// Create a breaker, rejecting names that cannot be used as a file name.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidBreakerName`] if `name` fails [`is_valid_breaker_name`].
    pub fn try_new(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
    ) -> Result<Self, InvalidBreakerName> {
        let name = name.into();
        if !is_valid_breaker_name(&name) {
            return Err(InvalidBreakerName(name));
        }
        Ok(Self::load(name, config))
    }

    fn load(name: String, config: CircuitBreakerConfig) -> Self {
        let store = StateStore::new(&config.state_dir, &name);
        let record = load_record(&name, &store);
        observability::record_circuit_breaker_state(&name, record.state.gauge_value());

        Self {
            name,
            config,
            store,
            inner: Mutex::new(BreakerInner {
                record,
                probe_in_flight: false,
            }),
        }
    }

    /// Create the breaker described by the application configuration.
    #[must_use]
    pub fn from_config(config: &crate::config::ReliabilityConfig) -> Self {
        let settings = &config.circuit_breaker;
        Self::new(settings.name.clone(), settings.to_breaker_config())
    }

    /// Get the service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Path of the persisted state file.
    #[must_use]
    pub fn state_file(&self) -> &Path {
        self.store.state_file()
    }

    /// Current in-memory state. Does not apply the open timeout.
    #[must_use]
    pub fn state(&self) -> CircuitBreakerState {
        self.lock_inner().record.state
    }

    /// Consecutive failures since the last success.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.lock_inner().record.failure_count
    }

    /// Time of the most recent failure.
    #[must_use]
    pub fn last_failure_time(&self) -> Option<DateTime<Utc>> {
        self.lock_inner().record.last_failure_time
    }

    /// Status view of this breaker.
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock_inner();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.record.state,
            failure_count: inner.record.failure_count,
            last_failure_time: inner.record.last_failure_time,
            failure_threshold: self.config.failure_threshold,
            open_timeout_secs: self.config.open_timeout.as_secs(),
        }
    }

    /// Execute `operation` with circuit breaker protection.
    ///
    /// Fails with [`BreakerError::Unavailable`] without running `operation`
    /// while the circuit is open. Otherwise the outcome is recorded and any
    /// error from `operation` is returned as [`BreakerError::Operation`].
    pub fn call<T, E, F>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let Some(permit) = self.try_acquire_permit() else {
            return Err(BreakerError::Unavailable {
                name: self.name.clone(),
            });
        };

        let mut probe = ProbeGuard {
            breaker: self,
            armed: permit == Permit::Probe,
        };
        let result = operation();
        probe.armed = false;

        match result {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(BreakerError::Operation(e))
            }
        }
    }

    /// Record a successful call: reset to `CLOSED` with zero failures.
    pub fn on_success(&self) {
        observability::record_circuit_breaker_success(&self.name);
        self.record(Outcome::Success);
    }

    /// Record a failed call, opening the circuit at the threshold.
    pub fn on_failure(&self) {
        observability::record_circuit_breaker_failure(&self.name);
        self.record(Outcome::Failure);
    }

    /// Force the circuit closed and persist it (operator recovery).
    pub fn reset(&self) {
        self.record(Outcome::Success);
    }

    /// Force the circuit open as of now and persist it (operator kill switch).
    pub fn trip(&self) {
        self.record(Outcome::ForceOpen);
    }

    /// Re-read the persisted state, discarding the in-memory view.
    pub fn reload(&self) -> CircuitBreakerState {
        let record = load_record(&self.name, &self.store);
        let mut inner = self.lock_inner();
        inner.record = record;
        inner.probe_in_flight = false;
        inner.record.state
    }

    /// Decide whether a call may proceed, moving `OPEN` to `HALF_OPEN` once
    /// the open timeout has elapsed.
    ///
    /// Only one probe is admitted per `HALF_OPEN` period within a process;
    /// other callers are rejected until the probe's outcome is recorded.
    fn try_acquire_permit(&self) -> Option<Permit> {
        let mut inner = self.lock_inner();

        match inner.record.state {
            CircuitBreakerState::Closed => return Some(Permit::Normal),
            CircuitBreakerState::Open => {
                if self.open_timeout_elapsed(&inner.record) {
                    inner.record.state = CircuitBreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    drop(inner);

                    observability::record_circuit_breaker_state(
                        &self.name,
                        CircuitBreakerState::HalfOpen.gauge_value(),
                    );
                    tracing::info!(
                        name = %self.name,
                        from = "OPEN",
                        to = "HALF_OPEN",
                        "Circuit breaker entering HALF_OPEN state"
                    );
                    return Some(Permit::Probe);
                }
            }
            CircuitBreakerState::HalfOpen => {
                if !inner.probe_in_flight {
                    inner.probe_in_flight = true;
                    return Some(Permit::Probe);
                }
            }
        }
        drop(inner);

        observability::record_circuit_breaker_rejected(&self.name);
        tracing::debug!(name = %self.name, "Circuit breaker rejected call");
        None
    }

    /// Return to `OPEN` after a probe that never reported an outcome.
    ///
    /// The failure time is left alone, so the next caller probes again.
    fn abandon_probe(&self) {
        let mut inner = self.lock_inner();
        inner.probe_in_flight = false;
        if inner.record.state != CircuitBreakerState::HalfOpen {
            return;
        }
        inner.record.state = CircuitBreakerState::Open;
        drop(inner);

        observability::record_circuit_breaker_state(
            &self.name,
            CircuitBreakerState::Open.gauge_value(),
        );
        tracing::warn!(
            name = %self.name,
            from = "HALF_OPEN",
            to = "OPEN",
            "Circuit breaker probe unwound without an outcome"
        );
    }

    fn open_timeout_elapsed(&self, record: &PersistedState) -> bool {
        let Some(last_failure) = record.last_failure_time else {
            tracing::warn!(
                name = %self.name,
                "Circuit breaker OPEN without a failure time, allowing probe"
            );
            return true;
        };

        // A failure time in the future (clock step) counts as just failed.
        let elapsed = Utc::now()
            .signed_duration_since(last_failure)
            .to_std()
            .unwrap_or(Duration::ZERO);
        elapsed >= self.config.open_timeout
    }

    fn record(&self, outcome: Outcome) {
        let threshold = self.config.failure_threshold;
        // Same precision as the state file, so reloads compare equal.
        let now = Utc::now().trunc_subsecs(6);
        let mut inner = self.lock_inner();
        let previous = inner.record.state;
        let fallback = inner.record.clone();

        let record = match self.store.update(|on_disk| {
            let mut record = on_disk.unwrap_or(fallback);
            outcome.apply(&mut record, threshold, now);
            record
        }) {
            Ok(record) => {
                tracing::debug!(name = %self.name, "Circuit breaker state saved");
                record
            }
            Err(e) => {
                tracing::error!(
                    name = %self.name,
                    error = %e,
                    "Failed to save circuit breaker state"
                );
                let mut record = inner.record.clone();
                outcome.apply(&mut record, threshold, now);
                record
            }
        };

        inner.record = record;
        inner.probe_in_flight = false;
        let current = inner.record.state;
        let failures = inner.record.failure_count;
        drop(inner);

        observability::record_circuit_breaker_state(&self.name, current.gauge_value());
        self.log_transition(previous, current, failures);
    }

    fn log_transition(&self, from: CircuitBreakerState, to: CircuitBreakerState, failures: u32) {
        match (from, to) {
            (CircuitBreakerState::Closed, CircuitBreakerState::Open) => {
                tracing::warn!(
                    name = %self.name,
                    from = %from,
                    to = %to,
                    failures,
                    "Circuit breaker OPENED"
                );
            }
            (_, CircuitBreakerState::Open) => {
                tracing::warn!(
                    name = %self.name,
                    from = %from,
                    to = %to,
                    failures,
                    "Circuit breaker re-opened"
                );
            }
            (CircuitBreakerState::Open | CircuitBreakerState::HalfOpen, CircuitBreakerState::Closed) => {
                tracing::info!(
                    name = %self.name,
                    from = %from,
                    to = %to,
                    "Circuit breaker closing after successful call"
                );
            }
            _ => {}
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn load_record(name: &str, store: &StateStore) -> PersistedState {
    match store.load() {
        Ok(Some(record)) => {
            tracing::info!(
                name = %name,
                state = %record.state,
                failures = record.failure_count,
                "Circuit breaker state loaded"
            );
            record
        }
        Ok(None) => PersistedState::default(),
        Err(e) => {
            tracing::warn!(
                name = %name,
                error = %e,
                "Could not load circuit breaker state"
            );
            PersistedState::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::{TempDir, tempdir};

    fn breaker_in(dir: &TempDir, threshold: u32, open_timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                open_timeout,
                state_dir: dir.path().to_path_buf(),
            },
        )
    }

    fn fail() -> Result<(), &'static str> {
        Err("connection reset by peer")
    }

    #[test]
    fn test_default_config() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.open_timeout, Duration::from_secs(300));
        assert_eq!(config.state_dir, PathBuf::from("logs"));
    }

    #[test]
    fn test_initial_state_is_closed() {
        let dir = tempdir().unwrap();
        let breaker = breaker_in(&dir, 5, Duration::from_secs(300));
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert!(breaker.last_failure_time().is_none());
    }

    #[test]
    fn test_opens_at_threshold() {
        let dir = tempdir().unwrap();
        let breaker = breaker_in(&dir, 5, Duration::from_secs(300));

        for _ in 0..4 {
            breaker.on_failure();
        }
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.failure_count(), 4);

        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        assert_eq!(breaker.failure_count(), 5);
        assert!(breaker.last_failure_time().is_some());
    }

    #[test]
    fn test_success_resets_from_any_state() {
        let dir = tempdir().unwrap();
        let breaker = breaker_in(&dir, 2, Duration::from_secs(300));

        breaker.on_failure();
        breaker.on_success();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);

        breaker.on_failure();
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        breaker.on_success();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_open_rejects_without_invoking() {
        let dir = tempdir().unwrap();
        let breaker = breaker_in(&dir, 1, Duration::from_secs(300));
        let _ = breaker.call(fail);

        let invoked = Cell::new(0);
        let result = breaker.call(|| {
            invoked.set(invoked.get() + 1);
            Ok::<_, &str>(())
        });

        assert_eq!(invoked.get(), 0);
        let err = result.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(
            err.to_string(),
            "Circuit breaker 'test' is OPEN - service unavailable"
        );
    }

    #[test]
    fn test_operation_error_passes_through() {
        let dir = tempdir().unwrap();
        let breaker = breaker_in(&dir, 5, Duration::from_secs(300));

        let err = breaker.call(fail).unwrap_err();
        assert_eq!(err.into_operation(), Some("connection reset by peer"));
        assert_eq!(breaker.failure_count(), 1);
    }

    #[test]
    fn test_probe_allowed_after_timeout() {
        let dir = tempdir().unwrap();
        let breaker = breaker_in(&dir, 1, Duration::from_millis(20));
        let _ = breaker.call(fail);
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        std::thread::sleep(Duration::from_millis(40));

        let invoked = Cell::new(false);
        let result = breaker.call(|| {
            invoked.set(true);
            Ok::<_, &str>(42)
        });
        assert!(invoked.get());
        assert_eq!(result.unwrap(), 42);
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
    }

    #[test]
    fn test_failed_probe_reopens() {
        let dir = tempdir().unwrap();
        let breaker = breaker_in(&dir, 2, Duration::from_millis(20));
        breaker.on_failure();
        breaker.on_failure();
        let first_failure = breaker.last_failure_time().unwrap();

        std::thread::sleep(Duration::from_millis(40));
        let _ = breaker.call(fail);

        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        assert_eq!(breaker.failure_count(), 3);
        assert!(breaker.last_failure_time().unwrap() > first_failure);
        assert!(breaker.call(|| Ok::<_, &str>(())).unwrap_err().is_unavailable());
    }

    #[test]
    fn test_half_open_admits_single_probe() {
        let dir = tempdir().unwrap();
        let breaker = breaker_in(&dir, 1, Duration::from_millis(10));
        breaker.on_failure();
        std::thread::sleep(Duration::from_millis(30));

        let nested = breaker.call(|| {
            assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);
            // A second caller during the probe is turned away.
            Ok::<_, &str>(breaker.call(|| Ok::<_, &str>(())).is_err())
        });

        assert!(nested.unwrap());
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
    }

    #[test]
    fn test_state_survives_restart() {
        let dir = tempdir().unwrap();
        let first = breaker_in(&dir, 3, Duration::from_secs(300));
        for _ in 0..3 {
            first.on_failure();
        }

        let second = breaker_in(&dir, 3, Duration::from_secs(300));
        assert_eq!(second.state(), CircuitBreakerState::Open);
        assert_eq!(second.failure_count(), 3);
        assert_eq!(second.last_failure_time(), first.last_failure_time());
    }

    #[test]
    fn test_corrupt_state_file_fails_open() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("circuit_breaker_test.json"), "{{{").unwrap();

        let breaker = breaker_in(&dir, 3, Duration::from_secs(300));
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_unwritable_state_keeps_memory_authoritative() {
        let dir = tempdir().unwrap();
        // The state "directory" is a regular file, so every save fails.
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let breaker = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 2,
                open_timeout: Duration::from_secs(300),
                state_dir: blocker,
            },
        );

        breaker.on_failure();
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        assert_eq!(breaker.failure_count(), 2);
    }

    #[test]
    fn test_sibling_failures_are_not_lost() {
        let dir = tempdir().unwrap();
        let bot_a = breaker_in(&dir, 4, Duration::from_secs(300));
        let bot_b = breaker_in(&dir, 4, Duration::from_secs(300));

        bot_a.on_failure();
        bot_b.on_failure();
        bot_a.on_failure();
        bot_b.on_failure();

        assert_eq!(bot_b.failure_count(), 4);
        assert_eq!(bot_b.state(), CircuitBreakerState::Open);
        // bot_a has not recorded anything since, so its gate is stale.
        assert_eq!(bot_a.state(), CircuitBreakerState::Closed);
        assert_eq!(bot_a.reload(), CircuitBreakerState::Open);
    }

    #[test]
    fn test_trip_and_reset() {
        let dir = tempdir().unwrap();
        let breaker = breaker_in(&dir, 5, Duration::from_secs(300));

        breaker.trip();
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        assert_eq!(breaker.failure_count(), 5);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_snapshot() {
        let dir = tempdir().unwrap();
        let breaker = breaker_in(&dir, 5, Duration::from_secs(300));
        breaker.on_failure();

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.name, "test");
        assert_eq!(snapshot.state, CircuitBreakerState::Closed);
        assert_eq!(snapshot.failure_count, 1);
        assert_eq!(snapshot.failure_threshold, 5);
        assert_eq!(snapshot.open_timeout_secs, 300);
    }

    #[test]
    fn test_failure_time_matches_state_file() {
        let dir = tempdir().unwrap();
        let breaker = breaker_in(&dir, 3, Duration::from_secs(300));
        breaker.on_failure();

        let on_disk = StateStore::new(dir.path(), "test").load().unwrap().unwrap();
        assert_eq!(breaker.last_failure_time(), on_disk.last_failure_time);
        assert_eq!(breaker.snapshot(), breaker_in(&dir, 3, Duration::from_secs(300)).snapshot());
    }

    #[test]
    fn test_panic_in_half_open_does_not_wedge_breaker() {
        let dir = tempdir().unwrap();
        let breaker = breaker_in(&dir, 1, Duration::from_millis(10));
        breaker.on_failure();
        std::thread::sleep(Duration::from_millis(30));

        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            breaker.call(|| -> Result<(), &str> { panic!("broker client bug") })
        }));
        assert!(unwound.is_err());
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        let invoked = Cell::new(false);
        breaker
            .call(|| {
                invoked.set(true);
                Ok::<_, &str>(())
            })
            .unwrap();
        assert!(invoked.get());
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
    }

    #[test]
    fn test_panicking_closed_call_leaves_state_alone() {
        let dir = tempdir().unwrap();
        let breaker = breaker_in(&dir, 3, Duration::from_secs(300));

        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            breaker.call(|| -> Result<(), &str> { panic!("broker client bug") })
        }));
        assert!(unwound.is_err());
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert!(breaker.call(|| Ok::<_, &str>(())).is_ok());
    }

    #[test]
    fn test_breaker_name_validation() {
        assert!(is_valid_breaker_name("alpaca"));
        assert!(is_valid_breaker_name("alpaca-paper_v2.1"));
        assert!(!is_valid_breaker_name(""));
        assert!(!is_valid_breaker_name(".hidden"));
        assert!(!is_valid_breaker_name("../alpaca"));
        assert!(!is_valid_breaker_name("alp aca"));
    }

    #[test]
    fn test_try_new_rejects_path_like_name() {
        let dir = tempdir().unwrap();
        let config = CircuitBreakerConfig {
            state_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let err = CircuitBreaker::try_new("../escape", config.clone()).unwrap_err();
        assert_eq!(err, InvalidBreakerName("../escape".to_string()));
        assert!(CircuitBreaker::try_new("alpaca", config).is_ok());
    }

    #[test]
    #[should_panic(expected = "invalid circuit breaker name")]
    fn test_new_panics_on_path_like_name() {
        let _ = CircuitBreaker::new("a/b", CircuitBreakerConfig::default());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CircuitBreakerState::Closed.to_string(), "CLOSED");
        assert_eq!(CircuitBreakerState::Open.to_string(), "OPEN");
        assert_eq!(CircuitBreakerState::HalfOpen.to_string(), "HALF_OPEN");
    }
}

//! Cross-process exclusive lock for position-mutating operations.
//!
//! Every bot instance trading the same account points at the same lock file.
//! Opening or closing a position happens while holding an exclusive advisory
//! lock on that file, so two processes never adjust the same position
//! concurrently.
//!
//! Acquisition polls a non-blocking lock every [`LOCK_POLL_INTERVAL`] until
//! it succeeds or the timeout elapses. The lock is released when the
//! [`OperationLockGuard`] is dropped, on every exit path including panics.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use trading_guard::safety::ExclusiveOperationLock;
//!
//! let lock = ExclusiveOperationLock::new("logs/position.lock", Duration::from_secs(30));
//! lock.run(lock.timeout(), || client.close_position("AAPL"))??;
//! ```

use std::fs::{self, File, OpenOptions, TryLockError};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::observability;

/// Interval between non-blocking lock attempts.
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors acquiring the position lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another holder kept the lock for the whole timeout.
    #[error("Could not acquire position lock within {}s", .timeout.as_secs_f64())]
    Timeout {
        /// Lock file path.
        path: PathBuf,
        /// How long acquisition waited.
        timeout: Duration,
    },

    /// The lock file could not be opened or locked.
    #[error("position lock I/O error on '{}': {source}", .path.display())]
    Io {
        /// Lock file path.
        path: PathBuf,
        /// The underlying IO error.
        source: io::Error,
    },
}

/// Advisory file lock shared by every process using the same path.
#[derive(Debug, Clone)]
pub struct ExclusiveOperationLock {
    path: PathBuf,
    timeout: Duration,
}

impl ExclusiveOperationLock {
    /// Create a lock on `path` with a default acquisition timeout.
    ///
    /// Nothing touches the filesystem until the first acquisition.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    /// Create the lock described by the application configuration.
    #[must_use]
    pub fn from_config(config: &crate::config::ReliabilityConfig) -> Self {
        Self::new(config.lock.path.clone(), config.lock.timeout())
    }

    /// Lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configured acquisition timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Acquire the lock, waiting at most `timeout`.
    ///
    /// The lock file and its parent directories are created if missing.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if the lock is still held elsewhere
    /// when `timeout` elapses, or [`LockError::Io`] if the file cannot be
    /// opened or locked.
    pub fn acquire(&self, timeout: Duration) -> Result<OperationLockGuard, LockError> {
        let file = self.open()?;
        let started = Instant::now();

        loop {
            match file.try_lock() {
                Ok(()) => {
                    let waited = started.elapsed();
                    observability::record_operation_lock_wait(waited.as_secs_f64());
                    tracing::debug!(
                        path = %self.path.display(),
                        waited_ms = waited.as_millis(),
                        "Position lock acquired"
                    );
                    return Ok(OperationLockGuard {
                        file: Some(file),
                        path: self.path.clone(),
                        acquired_at: Instant::now(),
                    });
                }
                Err(TryLockError::WouldBlock) => {}
                Err(TryLockError::Error(source)) => {
                    return Err(LockError::Io {
                        path: self.path.clone(),
                        source,
                    });
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                observability::record_operation_lock_timeout();
                tracing::warn!(
                    path = %self.path.display(),
                    timeout_secs = timeout.as_secs_f64(),
                    "Timed out waiting for position lock"
                );
                return Err(LockError::Timeout {
                    path: self.path.clone(),
                    timeout,
                });
            }

            std::thread::sleep(LOCK_POLL_INTERVAL.min(timeout - elapsed));
        }
    }

    /// Run `f` while holding the lock, waiting at most `timeout` for it.
    ///
    /// # Errors
    ///
    /// Returns a [`LockError`] if the lock cannot be acquired; `f` is not run.
    pub fn run<T, F>(&self, timeout: Duration, f: F) -> Result<T, LockError>
    where
        F: FnOnce() -> T,
    {
        let _guard = self.acquire(timeout)?;
        Ok(f())
    }

    fn open(&self) -> Result<File, LockError> {
        let io_error = |source| LockError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error)?;
        }

        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .map_err(io_error)
    }
}

/// Holds the position lock until dropped.
#[derive(Debug)]
pub struct OperationLockGuard {
    file: Option<File>,
    path: PathBuf,
    acquired_at: Instant,
}

impl OperationLockGuard {
    /// Lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// How long the lock has been held.
    #[must_use]
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for OperationLockGuard {
    fn drop(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        if let Err(e) = file.unlock() {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to release position lock"
            );
        }
        drop(file);
        tracing::debug!(
            path = %self.path.display(),
            held_ms = self.acquired_at.elapsed().as_millis(),
            "Position lock released"
        );
    }
}

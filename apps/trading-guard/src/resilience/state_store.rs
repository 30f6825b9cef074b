//! Durable circuit breaker state.
//!
//! Each breaker owns one JSON document next to two companion files:
//!
//! ```text
//! <state_dir>/circuit_breaker_<name>.json        current state
//! <state_dir>/circuit_breaker_<name>.json.lock   advisory lock handle
//! <state_dir>/circuit_breaker_<name>.json.tmp    write intermediate
//! ```
//!
//! Readers hold a shared lock on the `.lock` file, writers an exclusive one.
//! Writes go to the `.tmp` file first and are renamed over the target, so a
//! reader never observes a half-written document.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::circuit_breaker::CircuitBreakerState;

/// Errors from reading or writing a breaker state file.
///
/// These never reach callers of [`super::CircuitBreaker::call`]; the breaker
/// logs them and carries on with its in-memory view.
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// Filesystem operation failed.
    #[error("state file I/O error on '{}': {source}", .path.display())]
    Io {
        /// File the operation was acting on.
        path: PathBuf,
        /// The underlying IO error.
        source: io::Error,
    },

    /// The document could not be encoded or decoded.
    #[error("state file '{}' is not a valid breaker record: {source}", .path.display())]
    Codec {
        /// File being read or written.
        path: PathBuf,
        /// The underlying JSON error.
        source: serde_json::Error,
    },
}

/// The on-disk breaker record.
///
/// Missing fields fall back to a fresh closed breaker, matching what older
/// bot versions expect when they read partial documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    /// Consecutive failures since the last success.
    pub failure_count: u32,
    /// Breaker state.
    pub state: CircuitBreakerState,
    /// Time of the most recent failure.
    #[serde(with = "iso_timestamp::option")]
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Time this record was written.
    #[serde(with = "iso_timestamp")]
    pub last_updated: DateTime<Utc>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            failure_count: 0,
            state: CircuitBreakerState::Closed,
            last_failure_time: None,
            last_updated: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// File-backed store for a single named breaker.
#[derive(Debug, Clone)]
pub struct StateStore {
    state_file: PathBuf,
    lock_file: PathBuf,
    temp_file: PathBuf,
}

impl StateStore {
    /// Create a store for breaker `name` inside `state_dir`.
    ///
    /// Nothing is touched on disk until the first load or update.
    #[must_use]
    pub fn new(state_dir: impl AsRef<Path>, name: &str) -> Self {
        let state_file = state_dir
            .as_ref()
            .join(format!("circuit_breaker_{name}.json"));
        Self {
            lock_file: with_suffix(&state_file, ".lock"),
            temp_file: with_suffix(&state_file, ".tmp"),
            state_file,
        }
    }

    /// Path of the JSON document.
    #[must_use]
    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    /// Path of the companion lock file.
    #[must_use]
    pub fn lock_file(&self) -> &Path {
        &self.lock_file
    }

    /// Read the persisted record under a shared lock.
    ///
    /// Returns `Ok(None)` when no state file exists yet.
    pub fn load(&self) -> Result<Option<PersistedState>, StateStoreError> {
        if !self.state_file.exists() {
            return Ok(None);
        }

        let lock = self.open_lock_file()?;
        lock.lock_shared().map_err(io_error(&self.lock_file))?;
        let result = self.read_record();
        release(&lock, &self.lock_file);
        result.map(Some)
    }

    /// Read, transform and write the record as one critical section.
    ///
    /// `apply` receives the record currently on disk (`None` when the file is
    /// missing or unreadable) and returns the record to persist. Holding the
    /// exclusive lock across the whole cycle keeps concurrent processes from
    /// losing each other's updates.
    pub fn update<F>(&self, apply: F) -> Result<PersistedState, StateStoreError>
    where
        F: FnOnce(Option<PersistedState>) -> PersistedState,
    {
        let lock = self.open_lock_file()?;
        lock.lock().map_err(io_error(&self.lock_file))?;

        let current = if self.state_file.exists() {
            match self.read_record() {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(
                        path = %self.state_file.display(),
                        error = %e,
                        "Ignoring unreadable circuit breaker state"
                    );
                    None
                }
            }
        } else {
            None
        };

        let record = apply(current);
        let result = self.write_record(&record).map(|()| record);
        release(&lock, &self.lock_file);
        result
    }

    fn read_record(&self) -> Result<PersistedState, StateStoreError> {
        let contents =
            fs::read_to_string(&self.state_file).map_err(io_error(&self.state_file))?;
        serde_json::from_str(&contents).map_err(|source| StateStoreError::Codec {
            path: self.state_file.clone(),
            source,
        })
    }

    fn write_record(&self, record: &PersistedState) -> Result<(), StateStoreError> {
        let result = self.write_temp_and_rename(record);
        if result.is_err() && self.temp_file.exists() {
            let _ = fs::remove_file(&self.temp_file);
        }
        result
    }

    fn write_temp_and_rename(&self, record: &PersistedState) -> Result<(), StateStoreError> {
        let mut file = File::create(&self.temp_file).map_err(io_error(&self.temp_file))?;
        serde_json::to_writer_pretty(&mut file, record).map_err(|source| {
            StateStoreError::Codec {
                path: self.temp_file.clone(),
                source,
            }
        })?;
        file.write_all(b"\n")
            .and_then(|()| file.sync_all())
            .map_err(io_error(&self.temp_file))?;
        drop(file);

        fs::rename(&self.temp_file, &self.state_file).map_err(io_error(&self.state_file))
    }

    fn open_lock_file(&self) -> Result<File, StateStoreError> {
        if let Some(dir) = self.lock_file.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir).map_err(io_error(dir))?;
        }

        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_file)
            .map_err(io_error(&self.lock_file))
    }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StateStoreError {
    let path = path.to_path_buf();
    move |source| StateStoreError::Io { path, source }
}

fn release(lock: &File, path: &Path) {
    if let Err(e) = lock.unlock() {
        tracing::warn!(path = %path.display(), error = %e, "Failed to release state file lock");
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// ISO-8601 timestamps.
///
/// Written as RFC 3339 UTC. Read as RFC 3339, or as a naive
/// `YYYY-MM-DDTHH:MM:SS[.ffffff]` string taken to be UTC, which is what
/// earlier bot releases wrote.
pub(crate) mod iso_timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }

    pub fn format(value: &DateTime<Utc>) -> String {
        value.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid ISO-8601 timestamp: {raw}")))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer, de};

        #[allow(clippy::ref_option)]
        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(ts) => serializer.serialize_some(&super::format(ts)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| {
                    super::parse(&raw).ok_or_else(|| {
                        de::Error::custom(format!("invalid ISO-8601 timestamp: {raw}"))
                    })
                })
                .transpose()
        }
    }
}

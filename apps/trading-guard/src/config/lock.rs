//! Position lock configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for the cross-process position lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSettings {
    /// Lock file shared by every bot instance trading the same account.
    #[serde(default = "default_path")]
    pub path: PathBuf,
    /// Seconds to wait for the lock before giving up.
    #[serde(default = "default_timeout")]
    pub timeout_secs: f64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            path: default_path(),
            timeout_secs: default_timeout(),
        }
    }
}

impl LockSettings {
    /// Acquisition timeout as a `Duration`.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_timeout()))
    }
}

fn default_path() -> PathBuf {
    PathBuf::from("logs/position.lock")
}

const fn default_timeout() -> f64 {
    30.0
}

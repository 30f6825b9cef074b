//! Circuit breaker configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Circuit breaker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Protected service name; also names the state file.
    #[serde(default = "default_name")]
    pub name: String,
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds in OPEN before a probe is allowed.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Directory holding the persisted state.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            failure_threshold: default_failure_threshold(),
            timeout_secs: default_timeout(),
            state_dir: default_state_dir(),
        }
    }
}

impl CircuitBreakerSettings {
    /// Convert config settings to the resilience module's `CircuitBreakerConfig`.
    #[must_use]
    pub fn to_breaker_config(&self) -> crate::resilience::CircuitBreakerConfig {
        crate::resilience::CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            open_timeout: Duration::from_secs(self.timeout_secs),
            state_dir: self.state_dir.clone(),
        }
    }
}

fn default_name() -> String {
    "alpaca".to_string()
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_timeout() -> u64 {
    300
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("logs")
}

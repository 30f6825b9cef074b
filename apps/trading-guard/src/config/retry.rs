//! Retry policy configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry settings for broker calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff in seconds, doubled each attempt.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Cap on a single backoff, in seconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_factor: default_backoff_factor(),
            max_delay_secs: default_max_delay(),
        }
    }
}

impl RetrySettings {
    /// Convert to the broker module's `RetryPolicy`.
    ///
    /// Out-of-range delays are clamped; `validate_config` rejects them on load.
    #[must_use]
    pub fn to_policy(&self) -> crate::broker::RetryPolicy {
        let max_delay = Duration::try_from_secs_f64(self.max_delay_secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_max_delay()));
        crate::broker::RetryPolicy::new(self.max_retries, self.backoff_factor, max_delay)
    }
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_backoff_factor() -> f64 {
    1.0
}

const fn default_max_delay() -> f64 {
    60.0
}

//! Configuration for the reliability layer.
//!
//! Loads a YAML file with environment variable interpolation and validates
//! it before any breaker, retry executor or lock is built from it.
//!
//! # Usage
//!
//! ```rust,ignore
//! use trading_guard::config::load_config;
//!
//! // Load from default path (trading-guard.yaml)
//! let config = load_config(None)?;
//!
//! let breaker = CircuitBreaker::from_config(&config);
//! ```
//!
//! # Example file
//!
//! ```yaml
//! circuit_breaker:
//!   name: alpaca
//!   failure_threshold: 5
//!   timeout_secs: 300
//!   state_dir: ${TRADING_GUARD_STATE_DIR:-logs}
//! retry:
//!   max_retries: 3
//!   backoff_factor: 1.0
//!   max_delay_secs: 60
//! lock:
//!   path: logs/position.lock
//!   timeout_secs: 30
//! observability:
//!   logging:
//!     level: info
//!     format: json
//! ```

mod circuit_breaker;
mod lock;
mod observability;
mod retry;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use circuit_breaker::CircuitBreakerSettings;
pub use lock::LockSettings;
pub use observability::{LoggingConfig, ObservabilityConfig};
pub use retry::RetrySettings;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "trading-guard.yaml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    /// Circuit breaker configuration.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    /// Retry configuration.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Position lock configuration.
    #[serde(default)]
    pub lock: LockSettings,
    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to [`DEFAULT_CONFIG_PATH`].
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<ReliabilityConfig, ConfigError> {
    let path = path.unwrap_or(DEFAULT_CONFIG_PATH);

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string (useful for testing).
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<ReliabilityConfig, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    // An empty document means "all defaults".
    if interpolated.trim().is_empty() {
        let config = ReliabilityConfig::default();
        validate_config(&config)?;
        return Ok(config);
    }
    let config: ReliabilityConfig = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax. Unset or empty
/// variables without a default become empty strings.
#[allow(clippy::expect_used)] // Regex is compile-time constant; expect() is safe here
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    re.replace_all(input, |cap: &regex::Captures<'_>| {
        let default_value = cap.get(2).map_or("", |m| m.as_str());
        match std::env::var(&cap[1]) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.to_string(),
        }
    })
    .into_owned()
}

/// Validate configuration values.
fn validate_config(config: &ReliabilityConfig) -> Result<(), ConfigError> {
    let cb = &config.circuit_breaker;
    if cb.name.is_empty() {
        return Err(ConfigError::ValidationError(
            "circuit_breaker.name must not be empty".to_string(),
        ));
    }

    if !crate::resilience::is_valid_breaker_name(&cb.name) {
        return Err(ConfigError::ValidationError(format!(
            "circuit_breaker.name '{}' may only contain ASCII letters, digits, '_', '-' and '.'",
            cb.name
        )));
    }

    if cb.failure_threshold == 0 {
        return Err(ConfigError::ValidationError(
            "circuit_breaker.failure_threshold must be at least 1".to_string(),
        ));
    }

    let retry = &config.retry;
    if !retry.backoff_factor.is_finite() || retry.backoff_factor < 0.0 {
        return Err(ConfigError::ValidationError(
            "retry.backoff_factor must be a non-negative number".to_string(),
        ));
    }

    if !retry.max_delay_secs.is_finite() || retry.max_delay_secs < 0.0 {
        return Err(ConfigError::ValidationError(
            "retry.max_delay_secs must be a non-negative number".to_string(),
        ));
    }

    let lock = &config.lock;
    if !lock.timeout_secs.is_finite() || lock.timeout_secs <= 0.0 {
        return Err(ConfigError::ValidationError(
            "lock.timeout_secs must be positive".to_string(),
        ));
    }

    if lock.path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "lock.path must not be empty".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config = ReliabilityConfig::default();

        assert_eq!(config.circuit_breaker.name, "alpaca");
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.timeout_secs, 300);
        assert_eq!(config.circuit_breaker.state_dir, PathBuf::from("logs"));
        assert_eq!(config.retry.max_retries, 3);
        assert!((config.retry.backoff_factor - 1.0).abs() < f64::EPSILON);
        assert!((config.retry.max_delay_secs - 60.0).abs() < f64::EPSILON);
        assert_eq!(config.lock.path, PathBuf::from("logs/position.lock"));
        assert_eq!(config.lock.timeout(), Duration::from_secs(30));
        assert_eq!(config.observability.logging.level, "info");
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_load_empty_config() {
        let config = match load_config_from_string("") {
            Ok(c) => c,
            Err(e) => panic!("should load empty config: {e}"),
        };
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
    }

    #[test]
    fn test_load_minimal_config() {
        let yaml = r"
circuit_breaker:
  name: polygon
  failure_threshold: 3
";

        let config = match load_config_from_string(yaml) {
            Ok(c) => c,
            Err(e) => panic!("should load minimal config: {e}"),
        };
        assert_eq!(config.circuit_breaker.name, "polygon");
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.timeout_secs, 300); // Default value
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_full_config_parse() {
        let yaml = r#"
circuit_breaker:
  name: alpaca
  failure_threshold: 4
  timeout_secs: 120
  state_dir: "/var/lib/bot"
retry:
  max_retries: 5
  backoff_factor: 0.5
  max_delay_secs: 10
lock:
  path: "/var/lib/bot/position.lock"
  timeout_secs: 2.5
observability:
  logging:
    level: debug
    format: json
"#;

        let config = match load_config_from_string(yaml) {
            Ok(c) => c,
            Err(e) => panic!("should parse full config: {e}"),
        };
        assert_eq!(config.circuit_breaker.timeout_secs, 120);
        assert_eq!(config.circuit_breaker.state_dir, PathBuf::from("/var/lib/bot"));
        assert_eq!(config.retry.max_retries, 5);
        assert!((config.retry.max_delay_secs - 10.0).abs() < f64::EPSILON);
        assert_eq!(config.lock.timeout(), Duration::from_millis(2500));
        assert_eq!(config.observability.logging.format, "json");
    }

    #[test]
    fn test_env_var_with_default_when_missing() {
        let input = "state_dir: ${TRADING_GUARD_TEST_NONEXISTENT_VAR:-logs}";
        let result = interpolate_env_vars(input);

        assert_eq!(result, "state_dir: logs");
    }

    #[test]
    #[expect(clippy::literal_string_with_formatting_args)] // ${...} is env var syntax, not format args
    fn test_env_var_with_default_uses_existing() {
        // PATH should always exist
        let input = "path: ${PATH:-default}";
        let result = interpolate_env_vars(input);

        assert_ne!(result, "path: default");
        assert!(result.starts_with("path: "));
    }

    #[test]
    fn test_env_var_without_default_becomes_empty() {
        let input = "name: ${TRADING_GUARD_TEST_UNLIKELY_TO_EXIST}";
        let result = interpolate_env_vars(input);

        assert_eq!(result, "name: ");
    }

    #[test]
    fn test_validation_zero_threshold() {
        let yaml = r"
circuit_breaker:
  failure_threshold: 0
";

        let Err(err) = load_config_from_string(yaml) else {
            panic!("expected error for zero threshold");
        };
        assert!(err.to_string().contains("failure_threshold"));
    }

    #[test]
    fn test_validation_unsafe_name() {
        let yaml = r#"
circuit_breaker:
  name: "../alpaca"
"#;

        let Err(err) = load_config_from_string(yaml) else {
            panic!("expected error for path-like name");
        };
        assert!(err.to_string().contains("circuit_breaker.name"));
    }

    #[test]
    fn test_validation_negative_backoff() {
        let yaml = r"
retry:
  backoff_factor: -1.0
";

        let Err(err) = load_config_from_string(yaml) else {
            panic!("expected error for negative backoff");
        };
        assert!(err.to_string().contains("backoff_factor"));
    }

    #[test]
    fn test_validation_zero_lock_timeout() {
        let yaml = r"
lock:
  timeout_secs: 0
";

        let Err(err) = load_config_from_string(yaml) else {
            panic!("expected error for zero lock timeout");
        };
        assert!(err.to_string().contains("lock.timeout_secs"));
    }

    #[test]
    fn test_load_missing_file() {
        let Err(err) = load_config(Some("/nonexistent/trading-guard.yaml")) else {
            panic!("expected read error");
        };
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }
}

//! Log subscriber setup for the `trading-guard` binary.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the host process.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Error type for tracing operations.
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    /// Unknown `observability.logging.format` value.
    #[error("unknown log format '{0}' (expected full, compact, pretty or json)")]
    UnknownFormat(String),
    /// Level directive could not be parsed.
    #[error("invalid log directive: {0}")]
    InvalidDirective(String),
    /// Failed to initialize tracing subscriber.
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberError(String),
}

/// Output format of the fmt subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Default multi-field single-line output.
    Full,
    /// Abbreviated single-line output.
    Compact,
    /// Multi-line human-readable output.
    Pretty,
    /// Newline-delimited JSON.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = TracingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" | "text" => Ok(Self::Full),
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(TracingError::UnknownFormat(other.to_string())),
        }
    }
}

/// Build the filter: `RUST_LOG` when set, otherwise `trading_guard=<level>`.
///
/// # Errors
///
/// Returns an error if the chosen directives do not parse.
pub fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, TracingError> {
    let from_env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    filter_from(from_env.as_deref(), config)
}

fn filter_from(from_env: Option<&str>, config: &LoggingConfig) -> Result<EnvFilter, TracingError> {
    let directives = match from_env {
        Some(env) if !env.trim().is_empty() => env.to_string(),
        _ => format!("trading_guard={}", config.level),
    };
    EnvFilter::try_new(directives).map_err(|e| TracingError::InvalidDirective(e.to_string()))
}

/// Install the global fmt subscriber described by `config`.
///
/// # Errors
///
/// Returns an error if the format or level is invalid, or if a global
/// subscriber is already set.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TracingError> {
    let format: LogFormat = config.format.parse()?;
    let filter = build_env_filter(config)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match format {
        LogFormat::Full => builder.try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| TracingError::SubscriberError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_format() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Full);
        assert!(matches!(
            "xml".parse::<LogFormat>(),
            Err(TracingError::UnknownFormat(f)) if f == "xml"
        ));
    }

    #[test]
    fn test_build_env_filter() {
        let config = LoggingConfig {
            level: "debug".to_string(),
            ..Default::default()
        };
        assert!(build_env_filter(&config).is_ok());
    }

    #[test]
    fn test_rust_log_takes_precedence() {
        let config = LoggingConfig {
            level: "debug".to_string(),
            ..Default::default()
        };

        let filter = filter_from(Some("trading_guard=warn"), &config).unwrap().to_string();
        assert!(filter.contains("trading_guard=warn"));
        assert!(!filter.contains("debug"));

        let filter = filter_from(None, &config).unwrap().to_string();
        assert!(filter.contains("trading_guard=debug"));

        let filter = filter_from(Some("  "), &config).unwrap().to_string();
        assert!(filter.contains("trading_guard=debug"));
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        let config = LoggingConfig {
            level: "loud".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            filter_from(None, &config),
            Err(TracingError::InvalidDirective(_))
        ));
    }

    #[test]
    fn test_tracing_error_display() {
        let err = TracingError::SubscriberError("already initialized".to_string());
        assert!(err.to_string().contains("already initialized"));
    }
}

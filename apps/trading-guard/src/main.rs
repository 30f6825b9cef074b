//! Trading Guard Binary
//!
//! Operator tool for the reliability layer shared by the trading bots.
//!
//! # Usage
//!
//! ```bash
//! trading-guard status                 # breaker snapshot as JSON
//! trading-guard reset                  # force the breaker CLOSED
//! trading-guard trip                   # force the breaker OPEN
//! trading-guard lock-check --timeout-secs 5
//! ```
//!
//! # Environment Variables
//!
//! - `TRADING_GUARD_CONFIG`: Config file path (default: trading-guard.yaml if present)
//! - `RUST_LOG`: Log filter, replaces `observability.logging.level` when set

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use trading_guard::config::{self, DEFAULT_CONFIG_PATH, ReliabilityConfig};
use trading_guard::observability::init_tracing;
use trading_guard::{CircuitBreaker, ExclusiveOperationLock, LockError};

#[derive(Parser, Debug)]
#[command(name = "trading-guard", version, about = "Circuit breaker and position lock administration")]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, env = "TRADING_GUARD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the circuit breaker state as JSON
    Status,
    /// Close the circuit breaker and clear its failure count
    Reset,
    /// Open the circuit breaker immediately
    Trip,
    /// Acquire and release the position lock
    LockCheck {
        /// Seconds to wait for the lock (default: lock.timeout_secs)
        #[arg(long)]
        timeout_secs: Option<f64>,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    load_dotenv();
    let cli = Cli::parse();

    let config = load(cli.config.as_deref())?;
    init_tracing(&config.observability.logging).context("failed to initialize logging")?;

    match cli.command {
        Command::Status => {
            let breaker = CircuitBreaker::from_config(&config);
            println!("{}", serde_json::to_string_pretty(&breaker.snapshot())?);
        }
        Command::Reset => {
            let breaker = CircuitBreaker::from_config(&config);
            breaker.reset();
            println!("{}: {}", breaker.name(), breaker.state());
        }
        Command::Trip => {
            let breaker = CircuitBreaker::from_config(&config);
            breaker.trip();
            println!("{}: {}", breaker.name(), breaker.state());
        }
        Command::LockCheck { timeout_secs } => {
            let lock = ExclusiveOperationLock::from_config(&config);
            let timeout = match timeout_secs {
                Some(secs) => Duration::try_from_secs_f64(secs)
                    .with_context(|| format!("invalid --timeout-secs {secs}"))?,
                None => lock.timeout(),
            };
            return match lock.acquire(timeout) {
                Ok(guard) => {
                    println!("acquired {}", guard.path().display());
                    Ok(ExitCode::SUCCESS)
                }
                Err(e @ LockError::Timeout { .. }) => {
                    eprintln!("{e}");
                    Ok(ExitCode::from(2))
                }
                Err(e) => Err(e.into()),
            };
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Load the given config file, else the default file if present, else defaults.
fn load(path: Option<&Path>) -> anyhow::Result<ReliabilityConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => PathBuf::from(DEFAULT_CONFIG_PATH),
        None => return Ok(ReliabilityConfig::default()),
    };
    let path = path.to_string_lossy();
    config::load_config(Some(&*path)).with_context(|| format!("loading {path}"))
}

/// Load `.env` from the working directory or its nearest ancestor.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

//! Observability module for metrics and logging.

mod logging;
mod metrics;

pub use logging::{LogFormat, TracingError, build_env_filter, init_tracing};
pub use metrics::{
    circuit_breaker_state, record_circuit_breaker_failure, record_circuit_breaker_rejected,
    record_circuit_breaker_state, record_circuit_breaker_success, record_operation_lock_timeout,
    record_operation_lock_wait, record_retry_attempt, record_retry_outcome,
};

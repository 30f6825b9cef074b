//! Metrics for the reliability layer.
//!
//! Recorded through the `metrics` facade. The host process decides which
//! exporter (if any) is installed; without one every call is a no-op.
//!
//! # Example
//!
//! ```ignore
//! use trading_guard::observability::{circuit_breaker_state, record_circuit_breaker_state};
//!
//! record_circuit_breaker_state("alpaca", circuit_breaker_state::OPEN);
//! ```

use metrics::{counter, gauge, histogram};

// ============================================================================
// Circuit Breaker Metrics
// ============================================================================

/// Circuit breaker states for metrics.
pub mod circuit_breaker_state {
    /// Circuit is closed (healthy).
    pub const CLOSED: f64 = 0.0;
    /// Circuit is open (failing).
    pub const OPEN: f64 = 1.0;
    /// Circuit is half-open (testing).
    pub const HALF_OPEN: f64 = 2.0;
}

/// Update circuit breaker state gauge.
///
/// # Arguments
///
/// * `service` - Service name (e.g., "alpaca")
/// * `state` - Numeric state (0=closed, 1=open, 2=`half_open`)
pub fn record_circuit_breaker_state(service: &str, state: f64) {
    gauge!(
        "circuit_breaker_state",
        "service" => service.to_string()
    )
    .set(state);
}

/// Record a circuit breaker failure.
pub fn record_circuit_breaker_failure(service: &str) {
    counter!(
        "circuit_breaker_failures_total",
        "service" => service.to_string()
    )
    .increment(1);
}

/// Record a circuit breaker success.
pub fn record_circuit_breaker_success(service: &str) {
    counter!(
        "circuit_breaker_success_total",
        "service" => service.to_string()
    )
    .increment(1);
}

/// Record a circuit breaker rejection (call rejected due to open circuit).
pub fn record_circuit_breaker_rejected(service: &str) {
    counter!(
        "circuit_breaker_rejected_total",
        "service" => service.to_string()
    )
    .increment(1);
}

// ============================================================================
// Retry Metrics
// ============================================================================

/// Record a failed attempt that will be retried.
///
/// # Arguments
///
/// * `operation` - Operation name (e.g., `"submit_order"`)
pub fn record_retry_attempt(operation: &str) {
    counter!(
        "retry_attempts_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record an operation that gave up.
///
/// # Arguments
///
/// * `operation` - Operation name
/// * `reason` - `"exhausted"` or `"non_retryable"`
pub fn record_retry_outcome(operation: &str, reason: &str) {
    counter!(
        "retry_exhausted_total",
        "operation" => operation.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

// ============================================================================
// Operation Lock Metrics
// ============================================================================

/// Record how long acquiring the operation lock took.
pub fn record_operation_lock_wait(wait_seconds: f64) {
    histogram!("operation_lock_wait_seconds").record(wait_seconds);
}

/// Record an acquisition that timed out.
pub fn record_operation_lock_timeout() {
    counter!("operation_lock_timeouts_total").increment(1);
}

// ============================================================================
// Tests
// ============================================================================

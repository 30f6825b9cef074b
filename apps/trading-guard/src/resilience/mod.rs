//! Resilience patterns for external service calls.
//!
//! This module provides the persisted circuit breaker that gates broker
//! calls while the broker is presumed down.

mod circuit_breaker;
mod state_store;

pub use circuit_breaker::{
    BreakerError, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState,
    InvalidBreakerName, is_valid_breaker_name,
};
pub use state_store::{PersistedState, StateStore, StateStoreError};

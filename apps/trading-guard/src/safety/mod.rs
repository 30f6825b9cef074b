//! Safety mechanisms for trading operations.
//!
//! Serializes position-mutating operations across every bot process that
//! shares an account.

mod operation_lock;

pub use operation_lock::{ExclusiveOperationLock, LOCK_POLL_INTERVAL, LockError, OperationLockGuard};

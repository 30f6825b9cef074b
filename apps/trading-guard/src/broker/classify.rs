//! Error classification for retry decisions.
//!
//! Broker adapters tag each failure with an [`ErrorKind`] where the failure is
//! first observed (HTTP status, SDK error variant) by implementing
//! [`Classify`]. Only [`ErrorKind::Transient`] is worth retrying.
//!
//! | Retryable | Non-Retryable |
//! |-----------|---------------|
//! | Network timeouts, resets | Authentication failures |
//! | Rate limiting | Permission denied |
//! | Gateway errors | Invalid / rejected parameters |
//! | Anything unrecognised | Not found, bad request |

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of a failure raised by a wrapped broker call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Temporary failure; retrying may succeed.
    Transient,
    /// Credentials rejected.
    Authentication,
    /// Credentials valid but not allowed to do this.
    Permission,
    /// Request parameters failed validation.
    Validation,
    /// The requested resource does not exist.
    NotFound,
    /// The request was malformed.
    BadRequest,
}

/// Lower-case markers that identify terminal failures in free text, checked
/// in order.
const MESSAGE_MARKERS: &[(&str, ErrorKind)] = &[
    ("auth", ErrorKind::Authentication),
    ("permission", ErrorKind::Permission),
    ("invalid", ErrorKind::Validation),
    ("not found", ErrorKind::NotFound),
    ("bad request", ErrorKind::BadRequest),
];

impl ErrorKind {
    /// Whether an error of this kind should be retried.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Short label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Authentication => "authentication",
            Self::Permission => "permission",
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::BadRequest => "bad_request",
        }
    }

    /// Classify a failure from its message alone.
    ///
    /// Heuristic substring match, for boundaries that only expose text.
    /// Prefer tagging errors with a kind where they are raised.
    #[must_use]
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        MESSAGE_MARKERS
            .iter()
            .find(|(marker, _)| lower.contains(marker))
            .map_or(Self::Transient, |&(_, kind)| kind)
    }

    /// Classify an HTTP status code returned by a broker API.
    #[must_use]
    pub const fn from_status(status_code: u16) -> Self {
        match status_code {
            400 => Self::BadRequest,
            401 => Self::Authentication,
            403 => Self::Permission,
            404 => Self::NotFound,
            422 => Self::Validation,
            _ => Self::Transient,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that know their own [`ErrorKind`].
pub trait Classify {
    /// The category of this failure.
    fn error_kind(&self) -> ErrorKind;
}

impl Classify for io::Error {
    fn error_kind(&self) -> ErrorKind {
        match self.kind() {
            io::ErrorKind::PermissionDenied => ErrorKind::Permission,
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => ErrorKind::Validation,
            _ => ErrorKind::Transient,
        }
    }
}

/// A failure tagged with its kind at the broker boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct OperationError {
    kind: ErrorKind,
    message: String,
}

impl OperationError {
    /// Create an error of an explicit kind.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create a retryable error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    /// Create an error whose kind is inferred from its message.
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(ErrorKind::from_message(&message), message)
    }

    /// Create an error from an HTTP status and response body.
    #[must_use]
    pub fn from_status(status_code: u16, body: impl Into<String>) -> Self {
        Self::new(ErrorKind::from_status(status_code), body)
    }

    /// The failure category.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Classify for OperationError {
    fn error_kind(&self) -> ErrorKind {
        self.kind
    }
}

//! Error taxonomy shared by every ripple crate.
//!
//! Kinds are machine-readable and stable; transports map them onto their own
//! status vocabulary. The core never panics on bad input — panics are
//! reserved for invariant violations, and retry policy always belongs to the
//! caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Machine-readable error kind.
///
/// `Unauthorized` and `BadGateway` belong to transports and upstream
/// importers; no core path constructs them, but they are part of the shared
/// vocabulary so callers can match on one enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Unauthorized,
    Unavailable,
    BadGateway,
    NotImplemented,
    Timeout,
    InvariantViolation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Unauthorized => "unauthorized",
            Self::Unavailable => "unavailable",
            Self::BadGateway => "bad_gateway",
            Self::NotImplemented => "not_implemented",
            Self::Timeout => "timeout",
            Self::InvariantViolation => "invariant_violation",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core errors.
///
/// Every variant carries a human message; recoverable kinds may carry a hint
/// directing the caller toward a recovery action.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error("validation error: {message}")]
    Validation {
        message: String,
        hint: Option<String>,
    },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("conflict: {message}")]
    Conflict {
        message: String,
        hint: Option<String>,
    },

    #[error("unavailable: {message}")]
    Unavailable {
        message: String,
        hint: Option<String>,
    },

    #[error("timeout: {message}")]
    Timeout { message: String },

    #[error("not implemented: {message}")]
    NotImplemented { message: String },

    #[error("invariant violation: {message}")]
    InvariantViolation { message: String },
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            hint: None,
        }
    }

    pub fn validation_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            hint: None,
        }
    }

    pub fn conflict_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
            hint: Some("retry later".to_string()),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::NotImplemented {
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Machine-readable kind for transport mapping.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::NotImplemented { .. } => ErrorKind::NotImplemented,
            Self::InvariantViolation { .. } => ErrorKind::InvariantViolation,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Validation { message, .. }
            | Self::NotFound { message }
            | Self::Conflict { message, .. }
            | Self::Unavailable { message, .. }
            | Self::Timeout { message }
            | Self::NotImplemented { message }
            | Self::InvariantViolation { message } => message,
        }
    }

    /// Optional recovery hint.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Validation { hint, .. }
            | Self::Conflict { hint, .. }
            | Self::Unavailable { hint, .. } => hint.as_deref(),
            _ => None,
        }
    }
}

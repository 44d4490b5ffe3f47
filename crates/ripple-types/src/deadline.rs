//! Ambient deadline token.
//!
//! Graph traversal and analysis are synchronous in-memory work; they cannot
//! be pre-empted by the async runtime, so long-running walks check an
//! explicit deadline at each node visit instead.

use std::time::{Duration, Instant};

use crate::error::{CoreError, CoreResult};

/// A deadline carried into synchronous traversal code.
///
/// `Deadline::none()` never expires.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline that never expires.
    pub const fn none() -> Self {
        Self { at: None }
    }

    /// A deadline `duration` from now.
    pub fn after(duration: Duration) -> Self {
        Self {
            at: Some(Instant::now() + duration),
        }
    }

    /// A deadline `millis` milliseconds from now.
    pub fn after_millis(millis: u64) -> Self {
        Self::after(Duration::from_millis(millis))
    }

    pub fn expired(&self) -> bool {
        matches!(self.at, Some(at) if Instant::now() >= at)
    }

    /// Fail with `Timeout` when the deadline has passed.
    ///
    /// `operation` names the aborted work in the error message.
    pub fn check(&self, operation: &str) -> CoreResult<()> {
        if self.expired() {
            return Err(CoreError::timeout(format!("{operation} exceeded deadline")));
        }
        Ok(())
    }
}

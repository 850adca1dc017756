//! Tagged results for transformers, builds and reconciles.

use std::time::Duration;

use crate::error::Error;

/// What a transformer asks the chain to do next. `Err` is the failure case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Run the next transformer.
    Continue,
    /// Stop planning and execute what is staged. Not an error.
    Stop,
    /// Stop planning, execute what is staged, and retry after `after`.
    Retry { after: Duration, reason: String },
}

impl Outcome {
    pub fn retry(after: Duration, reason: impl Into<String>) -> Self {
        Self::Retry {
            after,
            reason: reason.into(),
        }
    }

    pub const fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }
}

/// How the transformer chain ended.
#[derive(Debug, Clone)]
pub enum BuildStatus {
    Completed,
    Stopped,
    Retry { after: Duration, reason: String },
    Failed(Error),
}

impl BuildStatus {
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// What the controller runtime should do after a successful reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Converged as far as possible; wait for the next change.
    Done,
    After(Duration),
    /// Retry now, without backoff.
    Immediately,
}

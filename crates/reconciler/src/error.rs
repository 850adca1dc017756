//! Error types for the reconciler crate.

use itertools::Itertools;
use keel_core::ObjectKey;
use thiserror::Error;

use crate::dag::DagError;
use crate::vertex::Action;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Backing-store failure outside of an executor write.
    #[error(transparent)]
    Store(#[from] keel_core::Error),

    #[error(transparent)]
    Dag(#[from] DagError),

    /// The primary object disappeared before planning started.
    #[error("primary object {key} not found")]
    PrimaryNotFound { key: ObjectKey },

    /// Desired state is self-contradictory. Not fixed by retrying.
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// Another writer raced this one. Retried immediately.
    #[error("conflict on {key}: {reason}")]
    Conflict { key: ObjectKey, reason: String },

    #[error("reconcile cancelled")]
    Cancelled,

    #[error("{}", aggregate_message(.0))]
    Aggregate(Vec<Error>),

    /// A store write issued by the executor failed.
    #[error("{action} {key} failed: {source}")]
    Apply {
        key: ObjectKey,
        action: Action,
        #[source]
        source: keel_core::Error,
    },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

fn aggregate_message(errors: &[Error]) -> String {
    format!("{} errors: [{}]", errors.len(), errors.iter().join("; "))
}

impl Error {
    /// Create a primary-not-found error.
    pub fn primary_not_found(key: ObjectKey) -> Self {
        Self::PrimaryNotFound { key }
    }

    /// Create a validation error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(key: ObjectKey, reason: impl Into<String>) -> Self {
        Self::Conflict {
            key,
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Wrap a store failure from the executor, lifting version conflicts
    /// into [`Error::Conflict`].
    pub fn apply(key: ObjectKey, action: Action, source: keel_core::Error) -> Self {
        if source.is_conflict() {
            return Self::conflict(key, source.to_string());
        }
        Self::Apply {
            key,
            action,
            source,
        }
    }

    /// Collapse a list of errors: one stays itself, several aggregate.
    pub fn from_many(mut errors: Vec<Self>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Aggregate(errors)),
        }
    }

    /// True for optimistic-concurrency conflicts. An aggregate is a conflict
    /// only if every member is.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Store(err) => err.is_conflict(),
            Self::Aggregate(errors) => !errors.is_empty() && errors.iter().all(Self::is_conflict),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::PrimaryNotFound { .. } => true,
            Self::Store(err) => err.is_not_found(),
            _ => false,
        }
    }

    /// False for errors that retrying cannot fix.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Validation { .. } | Self::InvalidConfig { .. } | Self::Dag(_) => false,
            Self::Aggregate(errors) => errors.iter().any(Self::is_retryable),
            _ => true,
        }
    }
}

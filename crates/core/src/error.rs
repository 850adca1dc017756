//! Core error types for store operations.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use thiserror::Error;

use crate::object::ObjectKey;

/// Error type for object model and backing-store operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    // Store outcomes
    #[error("object {key} not found")]
    NotFound { key: ObjectKey },

    #[error("object {key} already exists")]
    AlreadyExists { key: ObjectKey },

    #[error("conflict writing {key}: expected version {expected}, found {actual}")]
    Conflict {
        key: ObjectKey,
        expected: u64,
        actual: u64,
    },

    // Object shape errors
    #[error("invalid object: {reason}")]
    InvalidObject { reason: String },

    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },
}

impl Error {
    /// Create a not-found error.
    pub fn not_found(key: ObjectKey) -> Self {
        Self::NotFound { key }
    }

    /// Create an already-exists error.
    pub fn already_exists(key: ObjectKey) -> Self {
        Self::AlreadyExists { key }
    }

    /// Create a version conflict error.
    pub fn conflict(key: ObjectKey, expected: u64, actual: u64) -> Self {
        Self::Conflict {
            key,
            expected,
            actual,
        }
    }

    /// Create an invalid object error.
    pub fn invalid_object(reason: impl Into<String>) -> Self {
        Self::InvalidObject {
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Create an unavailable error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Check if this error means the object does not exist.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error means the object already exists.
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Check if this error is an optimistic-concurrency conflict.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

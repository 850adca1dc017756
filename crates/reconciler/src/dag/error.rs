//! DAG-specific error types

use itertools::Itertools;
use keel_core::ObjectKey;
use thiserror::Error;

/// DAG-specific error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DagError {
    #[error("Vertex not found: {0}")]
    NodeNotFound(ObjectKey),

    #[error("Vertex already exists: {0}")]
    NodeAlreadyExists(ObjectKey),

    #[error("Self-loop detected: {0}")]
    SelfLoopDetected(ObjectKey),

    #[error("Cycle detected involving vertices: {}", join_keys(.0))]
    CycleDetected(Vec<ObjectKey>),
}

impl DagError {
    pub fn node_not_found(key: &ObjectKey) -> Self {
        Self::NodeNotFound(key.clone())
    }

    pub fn node_already_exists(key: &ObjectKey) -> Self {
        Self::NodeAlreadyExists(key.clone())
    }

    pub fn self_loop(key: &ObjectKey) -> Self {
        Self::SelfLoopDetected(key.clone())
    }

    /// Cycle error with members sorted, so the same cycle always reports the
    /// same way.
    pub fn cycle_detected(mut keys: Vec<ObjectKey>) -> Self {
        keys.sort();
        keys.dedup();
        Self::CycleDetected(keys)
    }
}

fn join_keys(keys: &[ObjectKey]) -> String {
    keys.iter().join(", ")
}

/// Result type for DAG operations
pub type DagResult<T> = std::result::Result<T, DagError>;

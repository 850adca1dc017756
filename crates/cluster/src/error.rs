//! Error types for the cluster controller.

use itertools::Itertools;
use thiserror::Error;

/// Result type alias for cluster operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Cluster controller errors.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The cluster names a definition that does not exist.
    #[error("cluster definition '{name}' not found")]
    DefinitionNotFound { name: String },

    /// The definition has no topology with the requested name.
    #[error("topology '{topology}' not found in cluster definition '{definition}'")]
    TopologyNotFound { definition: String, topology: String },

    /// Some names are not covered by any stage of the active ordering.
    #[error("cannot find order for components and shardings: {names}")]
    Unordered { names: String },

    /// A name does not appear in any stage of the active ordering.
    #[error("cannot find predecessor for component or sharding '{name}'")]
    NoPredecessor { name: String },

    /// The cluster spec contradicts itself or its definition.
    #[error("invalid cluster spec: {reason}")]
    InvalidSpec { reason: String },

    /// A manifest could not be decoded.
    #[error("invalid manifest: {reason}")]
    Manifest { reason: String },

    /// Engine or store failure.
    #[error(transparent)]
    Reconcile(#[from] keel_reconciler::Error),
}

impl Error {
    pub fn definition_not_found(name: impl Into<String>) -> Self {
        Self::DefinitionNotFound { name: name.into() }
    }

    pub fn topology_not_found(definition: impl Into<String>, topology: impl Into<String>) -> Self {
        Self::TopologyNotFound {
            definition: definition.into(),
            topology: topology.into(),
        }
    }

    pub fn unordered<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::Unordered {
            names: names.into_iter().map(|s| s.as_ref().to_string()).join(","),
        }
    }

    pub fn no_predecessor(name: impl Into<String>) -> Self {
        Self::NoPredecessor { name: name.into() }
    }

    pub fn invalid_spec(reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            reason: reason.into(),
        }
    }

    pub fn manifest(reason: impl Into<String>) -> Self {
        Self::Manifest {
            reason: reason.into(),
        }
    }

    /// Spec and topology errors need a user edit; engine errors may heal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Reconcile(err) => err.is_retryable(),
            _ => false,
        }
    }
}

impl From<keel_core::Error> for Error {
    fn from(err: keel_core::Error) -> Self {
        Self::Reconcile(err.into())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::manifest(err.to_string())
    }
}

/// Transformers surface cluster errors to the engine as fatal validation.
impl From<Error> for keel_reconciler::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Reconcile(inner) => inner,
            other => Self::validation(other.to_string()),
        }
    }
}

//! Cluster controller built on `keel-reconciler`.
//!
//! A `Cluster` names a `ClusterDefinition` topology and lists its components.
//! Each reconcile renders the desired `Component` objects and lets the
//! [`TopologyScheduler`] stage only what the topology's provision, update or
//! terminate ordering allows: a stage proceeds once every component of the
//! previous stage is ready, otherwise the reconcile is retried later.
//!
//! ```ignore
//! let reconciler = ClusterReconciler::builder()
//!     .with_store(store)
//!     .with_config(ReconcilerConfig::from_toml_str(&config)?)
//!     .build()?;
//! let requeue = reconciler.reconcile(&key).await?;
//! ```

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod builder;
pub mod controller;
pub mod error;
pub mod payload;
pub mod readiness;
pub mod topology;
pub mod transformers;
pub mod types;

pub use builder::{ComponentBuilder, DefaultComponentBuilder};
pub use controller::{ClusterReconciler, ClusterReconcilerBuilder};
pub use error::{Error, Result};
pub use payload::ClusterPayload;
pub use readiness::Readiness;
pub use topology::{Operation, Stage, Topology};
pub use transformers::{
    DeletionTransformer, NormalizationTransformer, OwnershipTransformer, StatusTransformer,
    TopologyScheduler,
};
pub use types::{
    Cluster, ClusterComponentSpec, ClusterDefinition, ClusterDefinitionSpec, ClusterPhase,
    ClusterSharding, ClusterSpec, ClusterStatus, ClusterTopology, Component, ComponentPhase,
    ComponentSpec, ComponentStatus, Condition, TopologyComponent, TopologyOrders,
    TopologySharding,
};

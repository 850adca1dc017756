//! Per-reconcile state of the cluster controller.

use std::collections::{BTreeMap, BTreeSet};

use keel_core::{Object, ObjectKey, ResourceSpec};
use keel_reconciler::{Payload, Result};
use serde_json::Value;

use crate::topology::Topology;
use crate::types::{Cluster, ClusterDefinition, ClusterPhase, ClusterSpec, Component};

/// The cluster being reconciled plus everything derived from it.
///
/// `cluster` is the desired primary: transformers edit its metadata and
/// status and the plan writes the difference back last. `original` is the
/// copy loaded at the start of the reconcile.
#[derive(Debug, Clone)]
pub struct ClusterPayload {
    pub cluster: Cluster,
    pub original: Cluster,
    pub definition: Option<ClusterDefinition>,
    pub topology: Topology,
    /// Desired component objects by cluster-local name.
    pub components: BTreeMap<String, Component>,
    /// Desired shard objects by sharding name.
    pub shardings: BTreeMap<String, Vec<Component>>,
    raw_spec: Value,
    raw_status: Value,
}

impl ClusterPayload {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(ClusterSpec::kind(), self.cluster.namespace(), self.cluster.name())
    }

    pub fn is_deleting(&self) -> bool {
        self.original.metadata.deletion_timestamp.is_some()
    }

    /// The spec changed since the status was last computed.
    pub fn is_updating(&self) -> bool {
        self.original.metadata.generation != self.original.status.observed_generation
    }

    /// Names of every desired component and sharding.
    pub fn entity_names(&self) -> BTreeSet<String> {
        self.components
            .keys()
            .chain(self.shardings.keys())
            .cloned()
            .collect()
    }

    pub fn is_sharding(&self, name: &str) -> bool {
        self.shardings.contains_key(name)
    }

    pub fn phase(&self) -> Option<ClusterPhase> {
        self.cluster.status.phase
    }
}

impl Payload for ClusterPayload {
    fn from_primary(primary: &Object) -> Result<Self> {
        let cluster = Cluster::from_object(primary)?;
        Ok(Self {
            original: cluster.clone(),
            cluster,
            definition: None,
            topology: Topology::unordered(),
            components: BTreeMap::new(),
            shardings: BTreeMap::new(),
            raw_spec: primary.spec.clone(),
            raw_status: primary.status.clone(),
        })
    }

    /// Unchanged spec and status keep their stored encoding so that a
    /// reconcile without edits writes nothing.
    fn primary(&self) -> Result<Object> {
        let mut obj = self.cluster.to_object()?;
        if self.cluster.spec == self.original.spec {
            obj.spec = self.raw_spec.clone();
        }
        if self.cluster.status == self.original.status {
            obj.status = self.raw_status.clone();
        }
        Ok(obj)
    }
}

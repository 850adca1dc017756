//! Typed cluster resources and the naming conventions that tie them together.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use keel_core::{Kind, Resource, ResourceSpec};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// API group of every cluster resource.
pub const GROUP: &str = "apps.keel.io";

/// Names the owning cluster on every object it creates.
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";

/// Cluster-local name of a component (or shard).
pub const COMPONENT_NAME_LABEL: &str = "apps.keel.io/component-name";

/// Sharding a shard component belongs to.
pub const SHARDING_NAME_LABEL: &str = "apps.keel.io/sharding-name";

/// Cluster generation a component was last rendered from.
pub const CLUSTER_GENERATION_ANNOTATION: &str = "apps.keel.io/cluster-generation";

/// Condition type reporting whether the cluster spec was accepted.
pub const CONDITION_VALIDATED: &str = "Validated";

/// Condition type reporting whether every component is running.
pub const CONDITION_READY: &str = "Ready";

pub type Cluster = Resource<ClusterSpec>;
pub type ClusterDefinition = Resource<ClusterDefinitionSpec>;
pub type Component = Resource<ComponentSpec>;

/// Store name of a cluster component.
pub fn component_object_name(cluster: &str, component: &str) -> String {
    format!("{cluster}-{component}")
}

/// Cluster-local name of one shard.
pub fn shard_name(sharding: &str, index: u32) -> String {
    format!("{sharding}-{index}")
}

// ============================================================================
// Cluster
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSpec {
    /// Name of the cluster-scoped definition supplying topologies.
    pub cluster_def: String,
    /// Topology to use; the definition's default when empty.
    pub topology: String,
    pub components: Vec<ClusterComponentSpec>,
    pub shardings: Vec<ClusterSharding>,
}

impl ClusterSpec {
    /// Names of every component and sharding, in declaration order.
    pub fn entity_names(&self) -> Vec<&str> {
        self.components
            .iter()
            .map(|c| c.name.as_str())
            .chain(self.shardings.iter().map(|s| s.name.as_str()))
            .collect()
    }

    pub fn component(&self, name: &str) -> Option<&ClusterComponentSpec> {
        self.components.iter().find(|c| c.name == name)
    }

    pub fn sharding(&self, name: &str) -> Option<&ClusterSharding> {
        self.shardings.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterComponentSpec {
    pub name: String,
    /// Component definition; taken from the topology when empty.
    pub definition: String,
    pub version: String,
    pub replicas: u32,
    /// Ask the component to stop.
    pub stop: bool,
}

impl ClusterComponentSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replicas: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = definition.into();
        self
    }

    #[must_use]
    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = replicas;
        self
    }
}

/// A group of identical shard components.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSharding {
    pub name: String,
    pub shards: u32,
    pub template: ClusterComponentSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterPhase {
    Creating,
    Running,
    Updating,
    Stopping,
    Stopped,
    Failed,
    Deleting,
}

impl fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Creating => "Creating",
            Self::Running => "Running",
            Self::Updating => "Updating",
            Self::Stopping => "Stopping",
            Self::Stopped => "Stopped",
            Self::Failed => "Failed",
            Self::Deleting => "Deleting",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterStatus {
    pub phase: Option<ClusterPhase>,
    /// Cluster generation the status was computed for.
    pub observed_generation: i64,
    /// Observed phase per component or sharding.
    pub components: BTreeMap<String, ComponentPhase>,
    pub conditions: Vec<Condition>,
    pub message: String,
}

impl ClusterStatus {
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Insert or replace a condition. The transition time only moves when
    /// the status flips.
    pub fn set_condition(&mut self, mut condition: Condition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => self.conditions.push(condition),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: bool,
    pub reason: String,
    pub message: String,
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    pub fn new(
        condition_type: impl Into<String>,
        status: bool,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type: condition_type.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Some(Utc::now()),
        }
    }
}

impl ResourceSpec for ClusterSpec {
    type Status = ClusterStatus;

    fn kind() -> Kind {
        Kind::new(GROUP, "Cluster")
    }
}

// ============================================================================
// ClusterDefinition
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterDefinitionSpec {
    pub topologies: Vec<ClusterTopology>,
}

impl ClusterDefinitionSpec {
    /// Decode a definition spec from YAML.
    ///
    /// # Errors
    ///
    /// Returns `Manifest` when the document does not match the spec shape.
    pub fn from_yaml(input: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(input)?)
    }

    /// The named topology, or the default one when `name` is empty.
    pub fn topology(&self, name: &str) -> Option<&ClusterTopology> {
        if name.is_empty() {
            return self
                .topologies
                .iter()
                .find(|t| t.default)
                .or_else(|| self.topologies.first());
        }
        self.topologies.iter().find(|t| t.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterTopology {
    pub name: String,
    pub default: bool,
    pub components: Vec<TopologyComponent>,
    pub shardings: Vec<TopologySharding>,
    pub orders: Option<TopologyOrders>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyComponent {
    pub name: String,
    pub definition: String,
    /// Matches every cluster component whose name starts with `name`.
    pub template: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologySharding {
    pub name: String,
    pub definition: String,
}

/// Stage lists; each stage is a comma-separated set of entity names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyOrders {
    pub provision: Vec<String>,
    pub update: Vec<String>,
    pub terminate: Vec<String>,
}

impl ResourceSpec for ClusterDefinitionSpec {
    type Status = serde_json::Value;

    fn kind() -> Kind {
        Kind::new(GROUP, "ClusterDefinition")
    }
}

// ============================================================================
// Component
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentSpec {
    pub definition: String,
    pub version: String,
    pub replicas: u32,
    pub stop: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentPhase {
    Creating,
    Running,
    Updating,
    Stopping,
    Stopped,
    Failed,
    Deleting,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentStatus {
    pub phase: Option<ComponentPhase>,
    pub observed_generation: i64,
    pub message: String,
}

impl ResourceSpec for ComponentSpec {
    type Status = ComponentStatus;

    fn kind() -> Kind {
        Kind::new(GROUP, "Component")
    }
}

/// Cluster-local name carried by a component object.
pub fn component_local_name(comp: &Component) -> Option<&str> {
    comp.metadata
        .labels
        .get(COMPONENT_NAME_LABEL)
        .map(String::as_str)
}

/// Sharding a component belongs to, if it is a shard.
pub fn component_sharding(comp: &Component) -> Option<&str> {
    comp.metadata
        .labels
        .get(SHARDING_NAME_LABEL)
        .map(String::as_str)
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    const DEFINITION: &str = r"
topologies:
  - name: standalone
    components:
      - name: mysql
        definition: mysql-8.0
  - name: replication
    default: true
    components:
      - name: proxy
        definition: proxysql
      - name: mysql
        definition: mysql-8.0
      - name: replica
        definition: mysql-8.0
        template: true
    orders:
      provision: [mysql, 'proxy,replica']
";

    #[test]
    fn test_definition_decodes_from_yaml() {
        let def = ClusterDefinitionSpec::from_yaml(DEFINITION);
        assert!(matches!(def, Ok(ref d) if d.topologies.len() == 2));
    }

    #[test]
    fn test_empty_topology_name_picks_default() {
        let def = ClusterDefinitionSpec::from_yaml(DEFINITION).expect("definition decodes");
        assert_eq!(def.topology("").map(|t| t.name.as_str()), Some("replication"));
        assert_eq!(def.topology("standalone").map(|t| t.name.as_str()), Some("standalone"));
        assert!(def.topology("missing").is_none());
    }

    #[test]
    fn test_malformed_yaml_is_a_manifest_error() {
        let def = ClusterDefinitionSpec::from_yaml("topologies: 7");
        assert!(matches!(def, Err(crate::Error::Manifest { .. })));
    }

    #[test]
    fn test_condition_keeps_transition_time_while_status_holds() {
        let mut status = ClusterStatus::default();
        let mut first = Condition::new(CONDITION_READY, false, "Creating", "");
        first.last_transition_time = None;
        status.set_condition(first);
        status.set_condition(Condition::new(CONDITION_READY, false, "Updating", ""));
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].reason, "Updating");
        assert!(status.conditions[0].last_transition_time.is_none());

        status.set_condition(Condition::new(CONDITION_READY, true, "Running", ""));
        assert!(status.conditions[0].last_transition_time.is_some());
    }

    #[test]
    fn test_entity_names_cover_components_then_shardings() {
        let spec = ClusterSpec {
            components: vec![ClusterComponentSpec::new("proxy")],
            shardings: vec![ClusterSharding {
                name: "shard".into(),
                shards: 2,
                ..ClusterSharding::default()
            }],
            ..ClusterSpec::default()
        };
        assert_eq!(spec.entity_names(), vec!["proxy", "shard"]);
        assert_eq!(shard_name("shard", 1), "shard-1");
        assert_eq!(component_object_name("c", "shard-1"), "c-shard-1");
    }
}

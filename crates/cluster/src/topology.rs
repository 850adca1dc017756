//! Stage model for provisioning, updating and terminating cluster entities.
//!
//! A topology names its entities (components, template components and
//! shardings) and up to three orderings over them. Each ordering is a list
//! of stages; members of one stage proceed together and a stage waits for
//! the one before it.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Error, Result};
use crate::types::ClusterTopology;

/// Which ordering applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Provision,
    Update,
    Terminate,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Provision => "provision",
            Self::Update => "update",
            Self::Terminate => "terminate",
        };
        write!(f, "{s}")
    }
}

/// A set of entity names that proceed together.
pub type Stage = Vec<String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum EntityKind {
    Component { template: bool },
    Sharding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entity {
    name: String,
    definition: String,
    kind: EntityKind,
}

/// A resolved topology with every fallback ordering filled in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    name: String,
    entities: Vec<Entity>,
    provision: Vec<Stage>,
    update: Vec<Stage>,
    terminate: Vec<Stage>,
}

impl Topology {
    /// No entities and no orderings: everything proceeds in parallel.
    pub fn unordered() -> Self {
        Self::default()
    }

    /// Resolve a declared topology.
    ///
    /// Without an update order the provision order is used; without a
    /// terminate order the provision order is walked in reverse.
    pub fn resolve(declared: &ClusterTopology) -> Self {
        let entities = declared
            .components
            .iter()
            .map(|c| Entity {
                name: c.name.clone(),
                definition: c.definition.clone(),
                kind: EntityKind::Component {
                    template: c.template,
                },
            })
            .chain(declared.shardings.iter().map(|s| Entity {
                name: s.name.clone(),
                definition: s.definition.clone(),
                kind: EntityKind::Sharding,
            }))
            .collect();

        let orders = declared.orders.clone().unwrap_or_default();
        let provision = parse_stages(&orders.provision);
        let update = match parse_stages(&orders.update) {
            stages if stages.is_empty() => provision.clone(),
            stages => stages,
        };
        let terminate = match parse_stages(&orders.terminate) {
            stages if stages.is_empty() => provision.iter().rev().cloned().collect(),
            stages => stages,
        };

        Self {
            name: declared.name.clone(),
            entities,
            provision,
            update,
            terminate,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self, op: Operation) -> &[Stage] {
        match op {
            Operation::Provision => &self.provision,
            Operation::Update => &self.update,
            Operation::Terminate => &self.terminate,
        }
    }

    /// False when `op` has no stages and every entity proceeds at once.
    pub fn is_ordered(&self, op: Operation) -> bool {
        !self.stages(op).is_empty()
    }

    /// Whether topology entity `entity` covers the cluster-local `name`.
    ///
    /// Shardings and plain components match exactly, template components
    /// match by prefix. An entity the topology does not declare matches
    /// nothing, unless the topology declares no entities at all; stage
    /// entries then name components directly.
    pub fn matches(&self, entity: &str, name: &str) -> bool {
        match self.entities.iter().find(|e| e.name == entity) {
            Some(Entity {
                kind: EntityKind::Component { template: true },
                ..
            }) => name.starts_with(entity),
            Some(_) => entity == name,
            None => !self.has_entities() && entity == name,
        }
    }

    /// Whether the topology declares any entities.
    pub fn has_entities(&self) -> bool {
        !self.entities.is_empty()
    }

    /// Whether `name` is covered by a declared component entity.
    pub fn declares_component(&self, name: &str) -> bool {
        self.entities.iter().any(|e| {
            matches!(e.kind, EntityKind::Component { .. }) && self.matches(&e.name, name)
        })
    }

    /// Whether `name` is a declared sharding entity.
    pub fn declares_sharding(&self, name: &str) -> bool {
        self.entities
            .iter()
            .any(|e| e.kind == EntityKind::Sharding && e.name == name)
    }

    /// Definition of the first entity covering `name`.
    pub fn definition_for(&self, name: &str) -> Option<&str> {
        self.entities
            .iter()
            .find(|e| self.matches(&e.name, name))
            .map(|e| e.definition.as_str())
            .filter(|d| !d.is_empty())
    }

    /// Sort `names` by stage. Names within a stage keep their relative order.
    ///
    /// # Errors
    ///
    /// Returns `Unordered` when a name is not covered by any stage.
    pub fn ordered(&self, op: Operation, names: &[String]) -> Result<Vec<String>> {
        let mut result: Vec<String> = Vec::with_capacity(names.len());
        for stage in self.stages(op) {
            for name in names {
                if result.contains(name) {
                    continue;
                }
                if stage.iter().any(|entity| self.matches(entity, name)) {
                    result.push(name.clone());
                }
            }
        }
        if result.len() != names.len() {
            let missing: BTreeSet<&String> = names.iter().filter(|n| !result.contains(n)).collect();
            return Err(Error::unordered(missing));
        }
        Ok(result)
    }

    /// Entities of the stage before the one covering `name`; empty for the
    /// first stage.
    ///
    /// # Errors
    ///
    /// Returns `NoPredecessor` when no stage covers `name`.
    pub fn predecessors(&self, op: Operation, name: &str) -> Result<&[String]> {
        let mut previous: &[String] = &[];
        for stage in self.stages(op) {
            if stage.iter().any(|entity| self.matches(entity, name)) {
                return Ok(previous);
            }
            previous = stage;
        }
        Err(Error::no_predecessor(name))
    }
}

fn parse_stages(orders: &[String]) -> Vec<Stage> {
    orders
        .iter()
        .map(|stage| {
            stage
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect::<Stage>()
        })
        .filter(|stage| !stage.is_empty())
        .collect()
}

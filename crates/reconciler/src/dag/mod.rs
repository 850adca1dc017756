//! # Plan DAG
//!
//! Directed graph of staged operations using petgraph. An edge `A -> B`
//! means "A depends on B": B is applied before A unless A is a delete, in
//! which case A is applied first. Exactly one vertex is the root (the primary
//! object); it is always applied last.

pub mod error;
mod walk;

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use itertools::Itertools;
use keel_core::{Kind, ObjectKey};
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

pub use error::{DagError, DagResult};
pub use walk::WalkError;
pub(crate) use walk::WalkOrder;

use crate::vertex::{Action, Vertex};

/// Plan DAG structure wrapping petgraph's DiGraph
#[derive(Debug, Clone)]
pub struct Dag {
    /// The underlying directed graph
    graph: DiGraph<Vertex, ()>,
    /// Map from object identity to NodeIndex for O(1) lookups
    node_map: HashMap<ObjectKey, NodeIndex>,
    root: NodeIndex,
}

impl Dag {
    /// Create a DAG holding only the root vertex.
    #[must_use]
    pub fn new(root: Vertex) -> Self {
        let mut graph = DiGraph::new();
        let key = root.key().clone();
        let root = graph.add_node(root);
        let mut node_map = HashMap::new();
        node_map.insert(key, root);
        Self {
            graph,
            node_map,
            root,
        }
    }

    pub fn root(&self) -> &Vertex {
        &self.graph[self.root]
    }

    pub fn root_mut(&mut self) -> &mut Vertex {
        &mut self.graph[self.root]
    }

    pub fn root_key(&self) -> &ObjectKey {
        self.root().key()
    }

    pub fn is_root(&self, key: &ObjectKey) -> bool {
        self.node_map.get(key) == Some(&self.root)
    }

    /// Add a vertex without connecting it.
    ///
    /// # Errors
    ///
    /// Returns `NodeAlreadyExists` if a vertex with the same identity exists.
    pub fn add_vertex(&mut self, vertex: Vertex) -> DagResult<()> {
        if self.node_map.contains_key(vertex.key()) {
            return Err(DagError::node_already_exists(vertex.key()));
        }
        let key = vertex.key().clone();
        let index = self.graph.add_node(vertex);
        self.node_map.insert(key, index);
        Ok(())
    }

    /// Add a vertex and make the root depend on it.
    ///
    /// # Errors
    ///
    /// Returns `NodeAlreadyExists` if a vertex with the same identity exists.
    pub fn add_connect_root(&mut self, vertex: Vertex) -> DagResult<()> {
        let key = vertex.key().clone();
        self.add_vertex(vertex)?;
        let root = self.root_key().clone();
        self.connect(&root, &key)
    }

    /// Record that `dependent` depends on `dependency`.
    ///
    /// Connecting an already connected pair is a no-op.
    ///
    /// # Errors
    ///
    /// - `NodeNotFound` if either vertex is missing
    /// - `SelfLoopDetected` if both keys are the same
    /// - `CycleDetected` if the edge would close a cycle; the DAG is unchanged
    pub fn connect(&mut self, dependent: &ObjectKey, dependency: &ObjectKey) -> DagResult<()> {
        let from = self.index_of(dependent)?;
        let to = self.index_of(dependency)?;
        if from == to {
            return Err(DagError::self_loop(dependent));
        }
        if self.graph.contains_edge(from, to) {
            return Ok(());
        }
        if has_path_connecting(&self.graph, to, from, None) {
            return Err(DagError::cycle_detected(vec![
                dependent.clone(),
                dependency.clone(),
            ]));
        }
        self.graph.add_edge(from, to, ());
        Ok(())
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.node_map.contains_key(key)
    }

    pub fn vertex(&self, key: &ObjectKey) -> Option<&Vertex> {
        self.node_map.get(key).map(|&index| &self.graph[index])
    }

    /// Mutable access to a vertex. The identity of a vertex cannot change.
    pub fn vertex_mut(&mut self, key: &ObjectKey) -> Option<&mut Vertex> {
        let index = *self.node_map.get(key)?;
        self.graph.node_weight_mut(index)
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.graph.node_weights()
    }

    pub fn find_all<F>(&self, predicate: F) -> Vec<&Vertex>
    where
        F: Fn(&Vertex) -> bool,
    {
        self.graph
            .node_weights()
            .filter(|v| predicate(v))
            .sorted_by(|a, b| a.key().cmp(b.key()))
            .collect()
    }

    /// Vertices of the given kind, ordered by key.
    pub fn find_kind(&self, kind: &Kind) -> Vec<&Vertex> {
        self.find_all(|v| &v.key().kind == kind)
    }

    pub fn is_action(&self, key: &ObjectKey, action: Action) -> bool {
        self.vertex(key).is_some_and(|v| v.is_action(action))
    }

    /// Keys this vertex depends on, ordered.
    pub fn dependencies(&self, key: &ObjectKey) -> Vec<&ObjectKey> {
        self.neighbors(key, Direction::Outgoing)
    }

    /// Keys that depend on this vertex, ordered.
    pub fn dependents(&self, key: &ObjectKey) -> Vec<&ObjectKey> {
        self.neighbors(key, Direction::Incoming)
    }

    pub fn vertex_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Same vertex identities, actions, desired objects and edges.
    pub fn equivalent(&self, other: &Self) -> bool {
        if self.vertex_count() != other.vertex_count() || self.root_key() != other.root_key() {
            return false;
        }
        let same_vertices = self.vertices().all(|v| {
            other
                .vertex(v.key())
                .is_some_and(|o| o.action == v.action && o.desired == v.desired)
        });
        same_vertices && self.edge_set() == other.edge_set()
    }

    /// Check the graph is acyclic.
    ///
    /// # Errors
    ///
    /// Returns `CycleDetected` naming the vertices left over after ordering.
    pub fn validate(&self) -> DagResult<()> {
        WalkOrder::compute(self).map(|_| ())
    }

    fn index_of(&self, key: &ObjectKey) -> DagResult<NodeIndex> {
        self.node_map
            .get(key)
            .copied()
            .ok_or_else(|| DagError::node_not_found(key))
    }

    fn neighbors(&self, key: &ObjectKey, direction: Direction) -> Vec<&ObjectKey> {
        self.node_map
            .get(key)
            .map(|&index| {
                self.graph
                    .neighbors_directed(index, direction)
                    .map(|n| self.graph[n].key())
                    .sorted()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn edge_set(&self) -> BTreeSet<(&ObjectKey, &ObjectKey)> {
        self.graph
            .edge_references()
            .map(|e| (self.graph[e.source()].key(), self.graph[e.target()].key()))
            .collect()
    }
}

impl fmt::Display for Dag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let root = self.root();
        writeln!(f, "{root} (root)")?;
        for vertex in self
            .vertices()
            .filter(|v| !self.is_root(v.key()))
            .sorted_by(|a, b| a.key().cmp(b.key()))
        {
            let deps = self.dependencies(vertex.key());
            if deps.is_empty() {
                writeln!(f, "  {vertex}")?;
            } else {
                writeln!(f, "  {vertex} -> [{}]", deps.iter().join(", "))?;
            }
        }
        Ok(())
    }
}

//! Reverse-topological walk.
//!
//! The walk runs on an ordering graph derived from the dependency edges:
//! for `A -> B`, B precedes A unless A is a delete, in which case A precedes
//! B. The root follows every other vertex. Vertices are grouped into layers
//! with no ordering relation inside a layer; a layer is visited by ascending
//! weight, then key.

use std::collections::{HashMap, HashSet};

use keel_core::ObjectKey;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use thiserror::Error;

use super::{Dag, DagError, DagResult};
use crate::vertex::{Action, Vertex};

/// Failure of [`Dag::walk_reverse_topo_order`].
#[derive(Debug, Error)]
pub enum WalkError<E> {
    #[error(transparent)]
    Dag(#[from] DagError),

    /// Visits that failed, in visit order. Vertices after them were skipped.
    #[error("{} vertices failed", .0.len())]
    Visit(Vec<(ObjectKey, E)>),
}

/// Precomputed layers plus successor lists of the ordering graph.
#[derive(Debug, Clone)]
pub(crate) struct WalkOrder {
    layers: Vec<Vec<NodeIndex>>,
    successors: HashMap<NodeIndex, Vec<NodeIndex>>,
    root: NodeIndex,
}

impl WalkOrder {
    pub(crate) fn compute(dag: &Dag) -> DagResult<Self> {
        let mut successors: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        let mut in_degree: HashMap<NodeIndex, usize> =
            dag.graph.node_indices().map(|n| (n, 0)).collect();
        let mut order_edge = |before: NodeIndex, after: NodeIndex| {
            let entry = successors.entry(before).or_default();
            if !entry.contains(&after) {
                entry.push(after);
                *in_degree.entry(after).or_default() += 1;
            }
        };

        for edge in dag.graph.edge_references() {
            let (dependent, dependency) = (edge.source(), edge.target());
            if dependency == dag.root {
                continue;
            }
            let deleting = dependent != dag.root && dag.graph[dependent].is_action(Action::Delete);
            if deleting {
                order_edge(dependent, dependency);
            } else {
                order_edge(dependency, dependent);
            }
        }
        for node in dag.graph.node_indices().filter(|&n| n != dag.root) {
            order_edge(node, dag.root);
        }

        let mut layers = Vec::new();
        let mut remaining = in_degree;
        let mut visited = 0usize;
        loop {
            let mut layer: Vec<NodeIndex> = remaining
                .iter()
                .filter(|(_, degree)| **degree == 0)
                .map(|(&n, _)| n)
                .collect();
            if layer.is_empty() {
                break;
            }
            for node in &layer {
                remaining.remove(node);
                for next in successors.get(node).into_iter().flatten() {
                    if let Some(degree) = remaining.get_mut(next) {
                        *degree = degree.saturating_sub(1);
                    }
                }
            }
            layer.sort_by(|&a, &b| {
                let (va, vb) = (&dag.graph[a], &dag.graph[b]);
                va.weight.cmp(&vb.weight).then_with(|| va.key().cmp(vb.key()))
            });
            visited += layer.len();
            layers.push(layer);
        }

        if visited != dag.graph.node_count() {
            let stuck = remaining
                .keys()
                .map(|&n| dag.graph[n].key().clone())
                .collect();
            return Err(DagError::cycle_detected(stuck));
        }

        Ok(Self {
            layers,
            successors,
            root: dag.root,
        })
    }

    pub(crate) fn layers(&self) -> &[Vec<NodeIndex>] {
        &self.layers
    }

    /// Vertices of `layer` that may run, given the blocked set. Blocked
    /// members pass their block on to their successors.
    pub(crate) fn runnable(&self, layer: &[NodeIndex], blocked: &mut HashSet<NodeIndex>) -> Vec<NodeIndex> {
        let mut runnable = Vec::with_capacity(layer.len());
        for &node in layer {
            if node != self.root && blocked.contains(&node) {
                self.block_successors(node, blocked);
            } else {
                runnable.push(node);
            }
        }
        runnable
    }

    /// Mark everything ordered after `node` as blocked. The root is never
    /// blocked.
    pub(crate) fn block_successors(&self, node: NodeIndex, blocked: &mut HashSet<NodeIndex>) {
        for &next in self.successors.get(&node).into_iter().flatten() {
            if next != self.root {
                blocked.insert(next);
            }
        }
    }
}

impl Dag {
    pub(crate) fn node(&self, index: NodeIndex) -> Option<&Vertex> {
        self.graph.node_weight(index)
    }

    /// Visit every vertex after the vertices it must follow.
    ///
    /// A failed visit skips everything ordered after it, but independent
    /// branches continue and the root is always visited.
    ///
    /// # Errors
    ///
    /// - `WalkError::Dag` if the graph has a cycle; nothing is visited
    /// - `WalkError::Visit` with every failed visit
    pub fn walk_reverse_topo_order<E, F>(&self, mut visit: F) -> Result<(), WalkError<E>>
    where
        F: FnMut(&Vertex) -> Result<(), E>,
    {
        let order = WalkOrder::compute(self)?;
        let mut blocked = HashSet::new();
        let mut failures = Vec::new();
        for layer in order.layers() {
            for node in order.runnable(layer, &mut blocked) {
                let vertex = &self.graph[node];
                if let Err(err) = visit(vertex) {
                    failures.push((vertex.key().clone(), err));
                    order.block_successors(node, &mut blocked);
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(WalkError::Visit(failures))
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use keel_core::{Kind, Object};

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new(Kind::new("apps.keel.io", "Component"), "default", name)
    }

    fn dag_with(vertices: &[(&str, Action)]) -> Dag {
        let root = Object::new(Kind::new("apps.keel.io", "Cluster"), "default", "root");
        let mut dag = Dag::new(Vertex::root(root));
        for (name, action) in vertices {
            let _ = dag.add_connect_root(Vertex::new(key(name), *action));
        }
        dag
    }

    fn visit_order(dag: &Dag) -> Vec<String> {
        let mut seen = Vec::new();
        let _ = dag.walk_reverse_topo_order(|v| {
            seen.push(v.key().name.clone());
            Ok::<(), ()>(())
        });
        seen
    }

    #[test]
    fn test_dependency_visited_first() {
        let mut dag = dag_with(&[("app", Action::Create), ("secret", Action::Create)]);
        let _ = dag.connect(&key("app"), &key("secret"));
        assert_eq!(visit_order(&dag), vec!["secret", "app", "root"]);
    }

    #[test]
    fn test_delete_reverses_edge() {
        let mut dag = dag_with(&[("app", Action::Delete), ("secret", Action::Delete)]);
        let _ = dag.connect(&key("app"), &key("secret"));
        assert_eq!(visit_order(&dag), vec!["app", "secret", "root"]);
    }

    #[test]
    fn test_weight_breaks_ties() {
        let mut dag = dag_with(&[("a", Action::Create), ("b", Action::Create)]);
        dag.vertex_mut(&key("a")).expect("a is staged").weight = 10;
        assert_eq!(visit_order(&dag), vec!["b", "a", "root"]);
    }

    #[test]
    fn test_failure_blocks_dependents_only() {
        let mut dag = dag_with(&[
            ("app", Action::Create),
            ("secret", Action::Create),
            ("other", Action::Create),
        ]);
        let _ = dag.connect(&key("app"), &key("secret"));

        let mut seen = Vec::new();
        let result = dag.walk_reverse_topo_order(|v| {
            seen.push(v.key().name.clone());
            if v.key().name == "secret" {
                Err("boom")
            } else {
                Ok(())
            }
        });

        assert_eq!(seen, vec!["other", "secret", "root"]);
        assert!(matches!(result, Err(WalkError::Visit(ref f)) if f.len() == 1 && f[0].0 == key("secret")));
    }
}

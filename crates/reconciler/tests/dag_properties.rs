//! DAG Property-Based Tests
//!
//! Random graphs checked against the invariants the executor relies on:
//! no cycle can be introduced, the walk respects every edge, and staging the
//! same intents twice yields the same graph.

#![deny(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::collections::HashMap;

use keel_core::{Kind, Object, ObjectKey};
use keel_reconciler::{Action, Dag, DagError, GraphClient, Vertex, WriteOptions};
use proptest::prelude::*;

fn component(index: usize) -> Object {
    Object::new(Kind::new("apps.keel.io", "Component"), "default", format!("comp-{index}"))
}

fn key(index: usize) -> ObjectKey {
    component(index).key()
}

fn root() -> Vertex {
    Vertex::root(Object::new(Kind::new("apps.keel.io", "Cluster"), "default", "root"))
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        Just(Action::Create),
        Just(Action::Update),
        Just(Action::Patch),
        Just(Action::Delete),
        Just(Action::Noop),
    ]
}

fn graph_strategy() -> impl Strategy<Value = (Vec<Action>, Vec<(usize, usize)>)> {
    (1usize..10).prop_flat_map(|n| {
        (
            prop::collection::vec(action_strategy(), n),
            prop::collection::vec((0..n, 0..n), 0..30),
        )
    })
}

fn build(actions: &[Action], edges: &[(usize, usize)]) -> Dag {
    let mut dag = Dag::new(root());
    for (index, action) in actions.iter().enumerate() {
        let _ = dag.add_connect_root(Vertex::new(key(index), *action));
    }
    for (from, to) in edges {
        let _ = dag.connect(&key(*from), &key(*to));
    }
    dag
}

fn visit_positions(dag: &Dag) -> HashMap<ObjectKey, usize> {
    let mut order = Vec::new();
    let walked = dag.walk_reverse_topo_order(|v| {
        order.push(v.key().clone());
        Ok::<(), ()>(())
    });
    assert!(walked.is_ok(), "walk of an acyclic DAG must succeed");
    order.into_iter().enumerate().map(|(i, k)| (k, i)).collect()
}

proptest! {
    #[test]
    fn property_connect_never_closes_a_cycle((actions, edges) in graph_strategy()) {
        let mut dag = Dag::new(root());
        for (index, action) in actions.iter().enumerate() {
            prop_assert!(dag.add_connect_root(Vertex::new(key(index), *action)).is_ok());
        }
        for (from, to) in &edges {
            match dag.connect(&key(*from), &key(*to)) {
                Ok(()) => {}
                Err(DagError::SelfLoopDetected(_)) => prop_assert_eq!(from, to),
                Err(DagError::CycleDetected(keys)) => prop_assert!(!keys.is_empty()),
                Err(other) => prop_assert!(false, "unexpected error {other}"),
            }
            prop_assert!(dag.validate().is_ok());
        }
    }

    #[test]
    fn property_rejected_connect_leaves_graph_unchanged((actions, edges) in graph_strategy()) {
        let mut dag = build(&actions, &edges);
        for (from, to) in &edges {
            let before = dag.edge_count();
            if dag.connect(&key(*to), &key(*from)).is_err() {
                prop_assert_eq!(dag.edge_count(), before);
            }
        }
    }

    #[test]
    fn property_walk_respects_every_edge((actions, edges) in graph_strategy()) {
        let dag = build(&actions, &edges);
        let positions = visit_positions(&dag);
        prop_assert_eq!(positions.len(), dag.vertex_count());

        let root_position = positions.get(dag.root_key()).copied();
        prop_assert_eq!(root_position, Some(dag.vertex_count() - 1));

        for vertex in dag.vertices() {
            if dag.is_root(vertex.key()) {
                continue;
            }
            let dependent = positions[vertex.key()];
            for dependency in dag.dependencies(vertex.key()) {
                let dependency = positions[dependency];
                if vertex.is_action(Action::Delete) {
                    prop_assert!(dependent < dependency, "delete must precede what it depends on");
                } else {
                    prop_assert!(dependency < dependent, "dependency must be applied first");
                }
            }
        }
    }

    #[test]
    fn property_failed_vertex_blocks_its_dependents((actions, edges) in graph_strategy(), failing in 0usize..10) {
        let dag = build(&actions, &edges);
        let failing = key(failing % actions.len());
        let mut visited = Vec::new();
        let _ = dag.walk_reverse_topo_order(|v| {
            visited.push(v.key().clone());
            if v.key() == &failing { Err(()) } else { Ok(()) }
        });

        for vertex in dag.vertices() {
            let deps = dag.dependencies(vertex.key());
            if !vertex.is_action(Action::Delete) && !dag.is_root(vertex.key()) && deps.contains(&&failing) {
                prop_assert!(!visited.contains(vertex.key()), "{} depends on a failed vertex", vertex.key());
            }
        }
        prop_assert!(visited.contains(dag.root_key()), "root is always visited");
    }

    #[test]
    fn property_staging_is_order_independent(actions in prop::collection::vec(action_strategy(), 1..12)) {
        let store = std::sync::Arc::new(keel_core::InMemoryStore::new());
        let client = GraphClient::new(store);

        let stage = |order: &[usize]| {
            let mut dag = Dag::new(root());
            for &index in order {
                let obj = component(index);
                let _ = client.do_action(&mut dag, Some(obj.clone()), Some(obj), actions[index], WriteOptions::default());
            }
            for index in 1..actions.len() {
                let _ = client.depend_on(&mut dag, &key(index), &key(index - 1));
            }
            dag
        };

        let forward: Vec<usize> = (0..actions.len()).collect();
        let backward: Vec<usize> = forward.iter().rev().copied().collect();
        let first = stage(&forward);
        let again = stage(&forward);
        let reversed = stage(&backward);
        prop_assert!(first.equivalent(&again));
        prop_assert!(first.equivalent(&reversed));
    }
}

//! Cluster Controller Behavior Tests
//!
//! Multi-reconcile scenarios against the in-memory store, with the test
//! standing in for the component controller that publishes phases:
//! - Provision stages wait for the previous stage to be running
//! - Updates roll through the update order one stage per ready predecessor
//! - Deletion tears components down in terminate order, then releases the
//!   cluster
//! - Scale-in, shardings, validation failures and status aggregation

#![deny(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use keel_cluster::{
    Cluster, ClusterComponentSpec, ClusterDefinition, ClusterDefinitionSpec, ClusterReconciler,
    ClusterSharding, ClusterSpec, ComponentSpec,
};
use keel_core::{
    DeleteOptions, InMemoryStore, Object, ObjectKey, ObjectStore, ResourceSpec, WriteOp,
};
use keel_reconciler::{EventType, InMemoryRecorder, ReconcilerConfig, Requeue};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

const FINALIZER: &str = "cluster.keel.io/finalizer";
const CLUSTER: &str = "mycluster";

struct Harness {
    store: Arc<InMemoryStore>,
    recorder: Arc<InMemoryRecorder>,
    reconciler: ClusterReconciler,
    key: ObjectKey,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A definition whose single topology declares `components` with the given
/// provision stages.
fn definition(components: &[&str], provision: &[&str]) -> Object {
    definition_with_orders(components, json!({"provision": provision}))
}

fn definition_with_orders(components: &[&str], orders: Value) -> Object {
    let components: Vec<Value> = components
        .iter()
        .map(|name| json!({"name": name, "definition": format!("{name}-def")}))
        .collect();
    let yaml = serde_yaml::to_string(&json!({
        "topologies": [{
            "name": "default",
            "default": true,
            "components": components,
            "orders": orders,
        }]
    }))
    .expect("definition encodes");
    let spec = ClusterDefinitionSpec::from_yaml(&yaml).expect("definition decodes");
    ClusterDefinition::new("", "mydef", spec)
        .to_object()
        .expect("definition object")
}

fn cluster_spec(cluster_def: &str, components: &[&str]) -> ClusterSpec {
    ClusterSpec {
        cluster_def: cluster_def.to_string(),
        components: components
            .iter()
            .map(|name| {
                let comp = ClusterComponentSpec::new(*name);
                if cluster_def.is_empty() {
                    comp.with_definition(format!("{name}-def"))
                } else {
                    comp
                }
            })
            .collect(),
        ..ClusterSpec::default()
    }
}

async fn harness_with(definition: Option<Object>, spec: ClusterSpec) -> Harness {
    init_tracing();
    let store = Arc::new(InMemoryStore::new());
    if let Some(definition) = definition {
        store.create(definition).await.expect("definition is created");
    }
    let cluster = Cluster::new("default", CLUSTER, spec)
        .to_object()
        .expect("cluster object");
    let cluster = store.create(cluster).await.expect("cluster is created");
    store.clear_journal().await;

    let recorder = Arc::new(InMemoryRecorder::new());
    let reconciler = ClusterReconciler::builder()
        .with_store(store.clone())
        .with_recorder(recorder.clone())
        .with_config(ReconcilerConfig::default())
        .build()
        .expect("reconciler builds");
    Harness {
        store,
        recorder,
        reconciler,
        key: cluster.key(),
    }
}

async fn harness(components: &[&str], provision: &[&str]) -> Harness {
    harness_with(
        Some(definition(components, provision)),
        cluster_spec("mydef", components),
    )
    .await
}

fn component_key(name: &str) -> ObjectKey {
    ObjectKey::new(ComponentSpec::kind(), "default", format!("{CLUSTER}-{name}"))
}

async fn set_stop(h: &Harness, stop: bool) {
    h.store
        .mutate(&h.key, |obj| {
            if let Some(components) = obj.spec["components"].as_array_mut() {
                for comp in components {
                    comp["stop"] = json!(stop);
                }
            }
        })
        .await
        .expect("cluster exists");
}

impl Harness {
    async fn reconcile(&self) -> keel_reconciler::Result<Requeue> {
        self.reconciler.reconcile(&self.key).await
    }

    /// Publish `phase` for a component at its current generation.
    async fn mark(&self, name: &str, phase: &str) {
        self.store
            .mutate(&component_key(name), |obj| {
                obj.status = json!({
                    "phase": phase,
                    "observed_generation": obj.metadata.generation,
                });
            })
            .await
            .expect("component exists");
    }

    async fn exists(&self, name: &str) -> bool {
        self.store.contains(&component_key(name)).await
    }

    async fn component(&self, name: &str) -> Object {
        self.store
            .get(&component_key(name))
            .await
            .expect("component exists")
    }

    async fn cluster(&self) -> Object {
        self.store.get(&self.key).await.expect("cluster exists")
    }

    /// Component names written with `op` since the journal was last cleared.
    async fn written(&self, op: WriteOp) -> Vec<String> {
        let prefix = format!("{CLUSTER}-");
        self.store
            .journal()
            .await
            .into_iter()
            .filter(|r| r.op == op && r.key.kind == ComponentSpec::kind())
            .filter_map(|r| r.key.name.strip_prefix(&prefix).map(String::from))
            .collect()
    }

    /// Reconcile and mark running until every listed component is running.
    async fn converge(&self, names: &[&str]) {
        for name in names {
            self.reconcile().await.expect("reconcile succeeds");
            assert!(self.exists(name).await, "{name} should be created");
            self.mark(name, "Running").await;
        }
        assert_eq!(self.reconcile().await.expect("reconcile succeeds"), Requeue::Done);
        self.store.clear_journal().await;
    }
}

// ============================================================================
// PROVISION GATING
// ============================================================================

#[tokio::test]
async fn given_two_stages_when_nothing_is_running_then_only_first_stage_is_created() {
    let h = harness(&["a", "b", "c", "d"], &["a,b", "c,d"]).await;

    let requeue = h.reconcile().await.expect("blocked stage is not an error");

    assert_eq!(requeue, Requeue::After(Duration::from_millis(5000)));
    let mut created = h.written(WriteOp::Create).await;
    created.sort();
    assert_eq!(created, vec!["a", "b"]);
    assert!(!h.exists("c").await);
    assert!(!h.exists("d").await);

    let waiting: Vec<String> = h
        .recorder
        .events()
        .into_iter()
        .filter(|e| e.reason == "Waiting")
        .map(|e| e.message)
        .collect();
    assert_eq!(waiting.len(), 1);
    assert!(waiting[0].contains("waiting for a"), "got {waiting:?}");
}

#[tokio::test]
async fn given_first_stage_running_when_reconciled_then_second_stage_is_created() {
    let h = harness(&["a", "b", "c", "d"], &["a,b", "c,d"]).await;
    h.reconcile().await.expect("first reconcile");
    h.mark("a", "Running").await;
    h.mark("b", "Running").await;
    h.store.clear_journal().await;

    let requeue = h.reconcile().await.expect("second reconcile");

    assert_eq!(requeue, Requeue::Done);
    let mut created = h.written(WriteOp::Create).await;
    created.sort();
    assert_eq!(created, vec!["c", "d"]);
    assert!(h.written(WriteOp::Update).await.is_empty());
}

#[tokio::test]
async fn given_partially_running_stage_when_reconciled_then_next_stage_still_waits() {
    let h = harness(&["a", "b", "c"], &["a,b", "c"]).await;
    h.reconcile().await.expect("first reconcile");
    h.mark("a", "Running").await;
    h.store.clear_journal().await;

    let requeue = h.reconcile().await.expect("second reconcile");

    assert!(matches!(requeue, Requeue::After(_)));
    assert!(h.written(WriteOp::Create).await.is_empty());
    assert!(!h.exists("c").await);
}

#[tokio::test]
async fn given_stale_observed_generation_when_reconciled_then_component_is_not_ready() {
    let h = harness(&["a", "b"], &["a", "b"]).await;
    h.reconcile().await.expect("first reconcile");
    h.store
        .mutate(&component_key("a"), |obj| {
            obj.status = json!({"phase": "Running", "observed_generation": 0});
        })
        .await
        .expect("a exists");

    let requeue = h.reconcile().await.expect("second reconcile");

    assert!(matches!(requeue, Requeue::After(_)));
    assert!(!h.exists("b").await);
}

// ============================================================================
// OWNERSHIP AND FINALIZER
// ============================================================================

#[tokio::test]
async fn given_new_cluster_when_reconciled_then_finalizer_and_ownership_are_set() {
    let h = harness(&["a", "b"], &["a", "b"]).await;

    h.reconcile().await.expect("reconcile");

    let cluster = h.cluster().await;
    assert!(cluster.has_finalizer(FINALIZER));
    let a = h.component("a").await;
    assert!(a.is_owned_by(&cluster));
    assert_eq!(a.label("app.kubernetes.io/instance"), Some(CLUSTER));
    assert_eq!(a.label("apps.keel.io/component-name"), Some("a"));
    assert_eq!(a.spec["definition"], "a-def");
}

// ============================================================================
// UPDATE ORDERING
// ============================================================================

#[tokio::test]
async fn given_running_chain_when_stop_requested_then_components_stop_one_stage_at_a_time() {
    let h = harness(&["a", "b", "c"], &["a", "b", "c"]).await;
    h.converge(&["a", "b", "c"]).await;

    h.store
        .mutate(&h.key, |obj| {
            if let Some(components) = obj.spec["components"].as_array_mut() {
                for comp in components {
                    comp["stop"] = json!(true);
                }
            }
        })
        .await
        .expect("cluster exists");

    for (step, name) in ["a", "b", "c"].into_iter().enumerate() {
        h.store.clear_journal().await;
        let requeue = h.reconcile().await.expect("update reconcile");

        assert_eq!(h.written(WriteOp::Update).await, vec![name], "step {step}");
        assert_eq!(h.component(name).await.spec["stop"], true);
        if name == "c" {
            assert_eq!(requeue, Requeue::Done);
        } else {
            assert!(matches!(requeue, Requeue::After(_)), "step {step}");
        }
        h.mark(name, "Stopped").await;
    }

    h.reconcile().await.expect("final reconcile");
    assert_eq!(h.cluster().await.status["phase"], "Stopped");
}

#[tokio::test]
async fn given_stopped_chain_when_restarted_then_each_stage_waits_for_its_predecessor() {
    let h = harness(&["a", "b", "c"], &["a", "b", "c"]).await;
    h.converge(&["a", "b", "c"]).await;
    set_stop(&h, true).await;
    for name in ["a", "b", "c"] {
        h.reconcile().await.expect("stop reconcile");
        h.mark(name, "Stopped").await;
    }
    h.reconcile().await.expect("stopped reconcile");
    assert_eq!(h.cluster().await.status["phase"], "Stopped");

    set_stop(&h, false).await;
    for (step, name) in ["a", "b", "c"].into_iter().enumerate() {
        h.store.clear_journal().await;
        let requeue = h.reconcile().await.expect("restart reconcile");

        assert_eq!(h.written(WriteOp::Update).await, vec![name], "step {step}");
        assert_eq!(h.component(name).await.spec["stop"], false);
        if name != "c" {
            assert!(matches!(requeue, Requeue::After(_)), "step {step}");
            let later = if name == "a" { "b" } else { "c" };
            assert_eq!(h.component(later).await.spec["stop"], true, "step {step}");
        }
        h.mark(name, "Running").await;
    }

    assert_eq!(h.reconcile().await.expect("final reconcile"), Requeue::Done);
    assert_eq!(h.cluster().await.status["phase"], "Running");
}

#[tokio::test]
async fn given_missing_predecessor_when_successor_changes_then_update_is_not_gated() {
    let h = harness(&["a", "b"], &["a", "b"]).await;
    h.converge(&["a", "b"]).await;
    h.store
        .delete(&component_key("a"), DeleteOptions::default())
        .await
        .expect("a is deleted");
    h.store
        .mutate(&h.key, |obj| obj.spec["components"][1]["replicas"] = json!(3))
        .await
        .expect("cluster exists");
    h.store.clear_journal().await;

    h.reconcile().await.expect("reconcile succeeds");

    assert_eq!(h.written(WriteOp::Update).await, vec!["b"]);
    assert_eq!(h.written(WriteOp::Create).await, vec!["a"]);
    assert_eq!(h.component("b").await.spec["replicas"], 3);
}

#[tokio::test]
async fn given_staged_update_when_status_is_written_then_cluster_is_not_ready() {
    let h = harness(&["a", "b"], &["a,b"]).await;
    h.converge(&["a", "b"]).await;
    h.store
        .mutate(&h.key, |obj| obj.spec["components"][0]["replicas"] = json!(3))
        .await
        .expect("cluster exists");

    h.reconcile().await.expect("update reconcile");

    assert_eq!(h.written(WriteOp::Update).await, vec!["a"]);
    let status = h.cluster().await.status;
    assert_ne!(status["phase"], "Running");
    assert_eq!(status["components"]["a"], "Updating");
    assert_eq!(status["components"]["b"], "Running");
    let ready = status["conditions"]
        .as_array()
        .and_then(|c| c.iter().find(|c| c["type"] == "Ready"))
        .expect("ready condition is set");
    assert_eq!(ready["status"], false);

    h.mark("a", "Running").await;
    assert_eq!(h.reconcile().await.expect("settled reconcile"), Requeue::Done);
    assert_eq!(h.cluster().await.status["phase"], "Running");
}

#[tokio::test]
async fn given_converged_cluster_when_reconciled_again_then_no_component_is_written() {
    let h = harness(&["a", "b"], &["a", "b"]).await;
    h.converge(&["a", "b"]).await;

    assert_eq!(h.reconcile().await.expect("reconcile"), Requeue::Done);

    let component_writes = h
        .store
        .journal()
        .await
        .into_iter()
        .filter(|r| r.key.kind == ComponentSpec::kind())
        .count();
    assert_eq!(component_writes, 0);
}

// ============================================================================
// STATUS
// ============================================================================

#[tokio::test]
async fn given_all_components_running_when_reconciled_then_cluster_is_running_and_ready() {
    let h = harness(&["a", "b"], &["a,b"]).await;
    h.reconcile().await.expect("first reconcile");
    h.mark("a", "Running").await;
    h.mark("b", "Running").await;

    assert_eq!(h.reconcile().await.expect("second reconcile"), Requeue::Done);

    let status = h.cluster().await.status;
    assert_eq!(status["phase"], "Running");
    assert_eq!(status["observed_generation"], 1);
    assert_eq!(status["components"], json!({"a": "Running", "b": "Running"}));
    let ready = status["conditions"]
        .as_array()
        .and_then(|c| c.iter().find(|c| c["type"] == "Ready"))
        .cloned()
        .expect("ready condition is set");
    assert_eq!(ready["status"], true);
}

#[tokio::test]
async fn given_failed_component_when_reconciled_then_cluster_is_failed() {
    let h = harness(&["a"], &["a"]).await;
    h.reconcile().await.expect("first reconcile");
    h.mark("a", "Failed").await;

    h.reconcile().await.expect("second reconcile");

    assert_eq!(h.cluster().await.status["phase"], "Failed");
    assert!(h
        .recorder
        .events()
        .iter()
        .any(|e| e.reason == "PhaseChanged" && e.event_type == EventType::Warning));
}

// ============================================================================
// VALIDATION
// ============================================================================

#[tokio::test]
async fn given_missing_definition_when_reconciled_then_cluster_fails_validation() {
    let h = harness_with(None, cluster_spec("missing", &["a"])).await;

    let result = h.reconcile().await;

    assert!(matches!(result, Err(keel_reconciler::Error::Validation { .. })));
    let status = h.cluster().await.status;
    assert_eq!(status["phase"], "Failed");
    let validated = status["conditions"]
        .as_array()
        .and_then(|c| c.iter().find(|c| c["type"] == "Validated"))
        .cloned()
        .expect("validated condition is set");
    assert_eq!(validated["status"], false);
    assert!(h.recorder.reasons().contains(&"ReconcileFailed".to_string()));
    assert!(!h.exists("a").await);
}

#[tokio::test]
async fn given_component_outside_topology_when_reconciled_then_nothing_is_created() {
    let h = harness_with(
        Some(definition(&["a"], &["a"])),
        cluster_spec("mydef", &["a", "rogue"]),
    )
    .await;

    let result = h.reconcile().await;

    assert!(matches!(result, Err(keel_reconciler::Error::Validation { ref reason }) if reason.contains("rogue")));
    assert!(h.written(WriteOp::Create).await.is_empty());
}

// ============================================================================
// SCALE-IN AND SHARDING
// ============================================================================

#[tokio::test]
async fn given_component_removed_from_spec_when_reconciled_then_it_is_deleted() {
    let h = harness_with(None, cluster_spec("", &["a", "b"])).await;
    h.reconcile().await.expect("first reconcile");
    assert!(h.exists("a").await && h.exists("b").await);

    h.store
        .mutate(&h.key, |obj| {
            if let Some(components) = obj.spec["components"].as_array_mut() {
                components.retain(|c| c["name"] != "b");
            }
        })
        .await
        .expect("cluster exists");
    h.store.clear_journal().await;

    h.reconcile().await.expect("second reconcile");

    assert_eq!(h.written(WriteOp::Delete).await, vec!["b"]);
    assert!(h.exists("a").await);
    assert!(!h.exists("b").await);
}

#[tokio::test]
async fn given_sharding_when_scaled_in_then_surplus_shard_is_deleted() {
    let mut spec = cluster_spec("", &[]);
    spec.shardings.push(ClusterSharding {
        name: "shard".into(),
        shards: 3,
        template: ClusterComponentSpec::new("shard").with_definition("redis"),
    });
    let h = harness_with(None, spec).await;

    h.reconcile().await.expect("first reconcile");
    for index in 0..3 {
        let shard = h.component(&format!("shard-{index}")).await;
        assert_eq!(shard.label("apps.keel.io/sharding-name"), Some("shard"));
    }

    h.store
        .mutate(&h.key, |obj| {
            obj.spec["shardings"][0]["shards"] = json!(2);
        })
        .await
        .expect("cluster exists");
    h.store.clear_journal().await;

    h.reconcile().await.expect("second reconcile");

    assert_eq!(h.written(WriteOp::Delete).await, vec!["shard-2"]);
    assert!(h.exists("shard-0").await && h.exists("shard-1").await);
    assert!(!h.exists("shard-2").await);
}

#[tokio::test]
async fn given_sharding_stage_when_one_shard_is_pending_then_next_stage_waits() {
    let store_def = {
        let spec = ClusterDefinitionSpec::from_yaml(
            r"
topologies:
  - name: sharded
    components:
      - name: proxy
        definition: proxy-def
    shardings:
      - name: shard
        definition: redis
    orders:
      provision: [shard, proxy]
",
        )
        .expect("definition decodes");
        ClusterDefinition::new("", "mydef", spec)
            .to_object()
            .expect("definition object")
    };
    let mut spec = cluster_spec("mydef", &["proxy"]);
    spec.shardings.push(ClusterSharding {
        name: "shard".into(),
        shards: 2,
        template: ClusterComponentSpec::new("shard"),
    });
    let h = harness_with(Some(store_def), spec).await;

    h.reconcile().await.expect("first reconcile");
    assert!(!h.exists("proxy").await);
    h.mark("shard-0", "Running").await;

    assert!(matches!(h.reconcile().await, Ok(Requeue::After(_))));
    assert!(!h.exists("proxy").await);

    h.mark("shard-1", "Running").await;
    assert_eq!(h.reconcile().await.expect("third reconcile"), Requeue::Done);
    assert!(h.exists("proxy").await);
}

// ============================================================================
// DELETION
// ============================================================================

#[tokio::test]
async fn given_deleted_cluster_when_reconciled_then_components_go_in_terminate_order() {
    let h = harness(&["a", "b"], &["a", "b"]).await;
    h.converge(&["a", "b"]).await;

    h.store
        .delete(&h.key, DeleteOptions::default())
        .await
        .expect("cluster is marked terminating");
    assert!(h.cluster().await.is_terminating());

    let requeue = h.reconcile().await.expect("first teardown");
    assert!(matches!(requeue, Requeue::After(_)));
    assert_eq!(h.written(WriteOp::Delete).await, vec!["b"]);
    assert!(h.exists("a").await);

    h.store.clear_journal().await;
    assert_eq!(h.reconcile().await.expect("second teardown"), Requeue::Done);
    assert_eq!(h.written(WriteOp::Delete).await, vec!["a"]);
    assert!(h.store.contains(&h.key).await);
    assert_eq!(h.cluster().await.status["phase"], "Deleting");

    assert_eq!(h.reconcile().await.expect("release"), Requeue::Done);
    assert!(!h.store.contains(&h.key).await);
}

#[tokio::test]
async fn given_declared_terminate_order_when_cluster_is_deleted_then_it_overrides_reversed_provision() {
    let h = harness_with(
        Some(definition_with_orders(
            &["a", "b"],
            json!({"provision": ["a", "b"], "terminate": ["a", "b"]}),
        )),
        cluster_spec("mydef", &["a", "b"]),
    )
    .await;
    h.converge(&["a", "b"]).await;
    h.store
        .delete(&h.key, DeleteOptions::default())
        .await
        .expect("cluster is marked terminating");

    let requeue = h.reconcile().await.expect("first teardown");
    assert!(matches!(requeue, Requeue::After(_)));
    assert_eq!(h.written(WriteOp::Delete).await, vec!["a"]);
    assert!(h.exists("b").await);

    h.store.clear_journal().await;
    h.reconcile().await.expect("second teardown");
    assert_eq!(h.written(WriteOp::Delete).await, vec!["b"]);
}

// ============================================================================
// CONTROLLER
// ============================================================================

#[tokio::test]
async fn given_several_clusters_when_reconciled_together_then_each_is_planned() {
    let h = harness_with(None, cluster_spec("", &["a"])).await;
    let other = Cluster::new("default", "other", cluster_spec("", &["a"]))
        .to_object()
        .expect("cluster object");
    let other = h.store.create(other).await.expect("other is created");

    let results = h.reconciler.reconcile_all(vec![h.key.clone(), other.key()]).await;

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|(_, r)| matches!(r, Ok(Requeue::Done))));
    assert!(h.exists("a").await);
    let other_a = ObjectKey::new(ComponentSpec::kind(), "default", "other-a");
    assert!(h.store.contains(&other_a).await);
}

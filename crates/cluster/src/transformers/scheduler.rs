//! Topology scheduler: decides which components may be mutated this
//! reconcile.
//!
//! Live components are diffed against the desired ones into three sets.
//! Deletes (scale-in) are handled first with the terminate ordering, then
//! updates, then creates with the provision ordering. Within an ordering,
//! names are visited stage by stage and the first name whose predecessors
//! are not settled blocks itself and everything after it. A blocked update
//! does not stop creates; its retry is returned once creates are staged.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use keel_core::{LabelSelector, ObjectKey, ResourceSpec};
use keel_reconciler::{Action, Dag, Outcome, Result, TransformContext, Transformer, WriteOptions};
use tracing::debug;

use crate::payload::ClusterPayload;
use crate::readiness::Readiness;
use crate::topology::Operation;
use crate::transformers::ownership::adopt;
use crate::types::{
    component_local_name, component_object_name, component_sharding, Component, ComponentSpec,
    INSTANCE_LABEL, SHARDING_NAME_LABEL,
};

type Ctx = TransformContext<ClusterPayload>;

/// Stages component and shard mutations in topology order.
#[derive(Debug, Default, Clone, Copy)]
pub struct TopologyScheduler;

#[async_trait]
impl Transformer<ClusterPayload> for TopologyScheduler {
    fn name(&self) -> &str {
        "topology-scheduler"
    }

    async fn transform(&self, ctx: &mut Ctx, dag: &mut Dag) -> Result<Outcome> {
        let ctx: &Ctx = ctx;
        let inventory = Inventory::load(ctx).await?;
        let running = inventory.names();

        if ctx.payload.is_deleting() {
            let all: Vec<String> = running.into_iter().collect();
            let blocked = schedule(ctx, dag, &inventory, Operation::Terminate, &all)?;
            return Ok(blocked.map_or(Outcome::Continue, |b| b.retry(ctx)));
        }

        let proto = ctx.payload.entity_names();
        let create: Vec<String> = proto.difference(&running).cloned().collect();
        let delete: Vec<String> = running.difference(&proto).cloned().collect();
        let update: Vec<String> = running.intersection(&proto).cloned().collect();

        if let Some(blocked) = schedule(ctx, dag, &inventory, Operation::Terminate, &delete)? {
            return Ok(blocked.retry(ctx));
        }
        let delayed = schedule(ctx, dag, &inventory, Operation::Update, &update)?;
        if let Some(blocked) = schedule(ctx, dag, &inventory, Operation::Provision, &create)? {
            return Ok(blocked.retry(ctx));
        }
        Ok(delayed.map_or(Outcome::Continue, |b| b.retry(ctx)))
    }
}

/// A name that may not proceed yet, and the first predecessor holding it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Blocked {
    op: Operation,
    name: String,
    blocker: String,
}

impl Blocked {
    fn retry(self, ctx: &Ctx) -> Outcome {
        Outcome::retry(
            ctx.config.blocked_requeue_after(),
            format!(
                "retry later: {} of {} is waiting for {}",
                self.op, self.name, self.blocker
            ),
        )
    }
}

/// Live components of one cluster, grouped by topology entity.
#[derive(Debug, Default)]
pub(crate) struct Inventory {
    pub(crate) components: BTreeMap<String, Component>,
    pub(crate) shardings: BTreeMap<String, Vec<Component>>,
}

impl Inventory {
    pub(crate) async fn load(ctx: &Ctx) -> Result<Self> {
        let cluster = &ctx.payload.cluster;
        let selector = LabelSelector::from_labels([(INSTANCE_LABEL, cluster.name())]);
        let objects = ctx
            .client
            .list_live(&ComponentSpec::kind(), Some(cluster.namespace()), &selector)
            .await?;

        let mut inventory = Self::default();
        for obj in &objects {
            let comp = Component::from_object(obj)?;
            if let Some(sharding) = component_sharding(&comp).map(String::from) {
                inventory.shardings.entry(sharding).or_default().push(comp);
            } else if let Some(name) = component_local_name(&comp).map(String::from) {
                inventory.components.insert(name, comp);
            }
        }
        Ok(inventory)
    }

    pub(crate) fn names(&self) -> BTreeSet<String> {
        self.components
            .keys()
            .chain(self.shardings.keys())
            .cloned()
            .collect()
    }

    pub(crate) fn shards(&self, sharding: &str) -> Vec<&Component> {
        self.shardings
            .get(sharding)
            .map(|shards| shards.iter().collect())
            .unwrap_or_default()
    }
}

fn schedule(
    ctx: &Ctx,
    dag: &mut Dag,
    inventory: &Inventory,
    op: Operation,
    names: &[String],
) -> Result<Option<Blocked>> {
    if names.is_empty() {
        return Ok(None);
    }
    let topology = &ctx.payload.topology;
    let ordered = topology.is_ordered(op);
    let names = if ordered {
        topology.ordered(op, names)?
    } else {
        names.to_vec()
    };

    for name in names {
        if ordered {
            if let Some(blocker) = blocker(ctx, dag, inventory, op, &name)? {
                debug!(parent: &ctx.span, %op, component = %name, %blocker, "stage blocked");
                return Ok(Some(Blocked { op, name, blocker }));
            }
        }
        debug!(parent: &ctx.span, %op, component = %name, "scheduling");
        if is_sharding(ctx, inventory, &name) {
            stage_sharding(ctx, dag, inventory, op, &name)?;
        } else {
            stage_component(ctx, dag, inventory, op, &name)?;
        }
    }
    Ok(None)
}

/// First predecessor of `name` that is not settled for `op`.
fn blocker(
    ctx: &Ctx,
    dag: &Dag,
    inventory: &Inventory,
    op: Operation,
    name: &str,
) -> Result<Option<String>> {
    let topology = &ctx.payload.topology;
    for entity in topology.predecessors(op, name)? {
        for predecessor in expand(ctx, inventory, entity) {
            let settled = match op {
                Operation::Terminate => !exists(ctx, dag, inventory, &predecessor),
                Operation::Provision => readiness(ctx, dag, inventory, &predecessor).is_ready(),
                Operation::Update => matches!(
                    readiness(ctx, dag, inventory, &predecessor),
                    Readiness::Ready | Readiness::NotCreated
                ),
            };
            if !settled {
                return Ok(Some(predecessor));
            }
        }
    }
    Ok(None)
}

/// Concrete names covered by a topology entity; the entity itself when
/// nothing matches.
fn expand(ctx: &Ctx, inventory: &Inventory, entity: &str) -> Vec<String> {
    let topology = &ctx.payload.topology;
    let known: BTreeSet<String> = ctx
        .payload
        .entity_names()
        .into_iter()
        .chain(inventory.names())
        .filter(|name| topology.matches(entity, name))
        .collect();
    if known.is_empty() {
        vec![entity.to_string()]
    } else {
        known.into_iter().collect()
    }
}

fn is_sharding(ctx: &Ctx, inventory: &Inventory, name: &str) -> bool {
    ctx.payload.is_sharding(name) || inventory.shardings.contains_key(name)
}

pub(crate) fn component_key(ctx: &Ctx, name: &str) -> ObjectKey {
    let cluster = &ctx.payload.cluster;
    ObjectKey::new(
        ComponentSpec::kind(),
        cluster.namespace(),
        component_object_name(cluster.name(), name),
    )
}

/// Whether any shard of `sharding` is staged with `action`, or with any
/// action when `action` is `None`.
pub(crate) fn sharding_staged(dag: &Dag, sharding: &str, action: Option<Action>) -> bool {
    dag.find_kind(&ComponentSpec::kind()).iter().any(|v| {
        action.map_or(true, |a| v.is_action(a))
            && v.object()
                .is_some_and(|o| o.label(SHARDING_NAME_LABEL) == Some(sharding))
    })
}

fn readiness(ctx: &Ctx, dag: &Dag, inventory: &Inventory, name: &str) -> Readiness {
    if is_sharding(ctx, inventory, name) {
        let live = inventory.shards(name);
        let expected = ctx.payload.shardings.get(name).map_or(live.len(), Vec::len);
        return Readiness::of_sharding(&live, expected, sharding_staged(dag, name, None));
    }
    let staged = dag.contains(&component_key(ctx, name));
    Readiness::of_component(inventory.components.get(name), staged)
}

/// Live, or about to be created by this plan.
fn exists(ctx: &Ctx, dag: &Dag, inventory: &Inventory, name: &str) -> bool {
    if is_sharding(ctx, inventory, name) {
        return !inventory.shards(name).is_empty()
            || sharding_staged(dag, name, Some(Action::Create));
    }
    inventory.components.contains_key(name) || dag.is_action(&component_key(ctx, name), Action::Create)
}

fn stage_component(
    ctx: &Ctx,
    dag: &mut Dag,
    inventory: &Inventory,
    op: Operation,
    name: &str,
) -> Result<()> {
    let running = inventory.components.get(name);
    let desired = ctx.payload.components.get(name);
    match (op, running, desired) {
        (Operation::Provision, _, Some(desired)) => create(ctx, dag, desired),
        (Operation::Update, Some(running), Some(desired)) => update(ctx, dag, running, desired),
        (Operation::Terminate, Some(running), _) => delete(ctx, dag, running),
        _ => Ok(()),
    }
}

fn stage_sharding(
    ctx: &Ctx,
    dag: &mut Dag,
    inventory: &Inventory,
    op: Operation,
    name: &str,
) -> Result<()> {
    let running: BTreeMap<&str, &Component> = inventory
        .shards(name)
        .into_iter()
        .map(|c| (c.name(), c))
        .collect();
    let desired: BTreeMap<&str, &Component> = ctx
        .payload
        .shardings
        .get(name)
        .map(|shards| shards.iter().map(|c| (c.name(), c)).collect())
        .unwrap_or_default();

    match op {
        Operation::Provision => {
            for shard in desired.values() {
                create(ctx, dag, shard)?;
            }
        }
        Operation::Terminate => {
            for shard in running.values() {
                delete(ctx, dag, shard)?;
            }
        }
        Operation::Update => {
            for (shard_name, shard) in &desired {
                match running.get(shard_name) {
                    Some(live) => update(ctx, dag, live, shard)?,
                    None => create(ctx, dag, shard)?,
                }
            }
            for (shard_name, live) in &running {
                if !desired.contains_key(shard_name) {
                    debug!(parent: &ctx.span, sharding = name, shard = shard_name, "scaling in shard");
                    delete(ctx, dag, live)?;
                }
            }
        }
    }
    Ok(())
}

fn create(ctx: &Ctx, dag: &mut Dag, desired: &Component) -> Result<()> {
    let mut obj = desired.to_object()?;
    adopt(ctx, &mut obj)?;
    ctx.client.create(dag, obj, WriteOptions::default())
}

fn delete(ctx: &Ctx, dag: &mut Dag, running: &Component) -> Result<()> {
    ctx.client
        .delete(dag, running.to_object()?, WriteOptions::default())
}

/// Stage an update only when the merged component differs from the live one.
fn update(ctx: &Ctx, dag: &mut Dag, running: &Component, desired: &Component) -> Result<()> {
    let Some(merged) = merge_component(running, desired) else {
        return Ok(());
    };
    ctx.client.update(
        dag,
        running.to_object()?,
        merged.to_object()?,
        WriteOptions::default(),
    )
}

/// Live component with desired labels, annotations and spec laid over it,
/// or `None` when nothing changes.
fn merge_component(running: &Component, desired: &Component) -> Option<Component> {
    let mut merged = running.clone();
    merged
        .metadata
        .labels
        .extend(desired.metadata.labels.clone());
    merged
        .metadata
        .annotations
        .extend(desired.metadata.annotations.clone());
    merged.spec = desired.spec.clone();

    let changed = merged.metadata.labels != running.metadata.labels
        || merged.metadata.annotations != running.metadata.annotations
        || merged.spec != running.spec;
    changed.then_some(merged)
}

use std::collections::BTreeMap;

use async_trait::async_trait;
use keel_reconciler::{Dag, Outcome, Result, TransformContext, Transformer};

use crate::payload::ClusterPayload;
use crate::transformers::scheduler::{component_key, sharding_staged, Inventory};
use crate::transformers::set_phase;
use crate::types::{ClusterPhase, Component, ComponentPhase, Condition, CONDITION_READY};

/// Last step of the chain: summarizes live component phases into the
/// cluster status. Only reached when nothing upstream blocked. A live
/// component with a mutation staged in this plan counts as updating.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusTransformer;

#[async_trait]
impl Transformer<ClusterPayload> for StatusTransformer {
    fn name(&self) -> &str {
        "status"
    }

    async fn transform(
        &self,
        ctx: &mut TransformContext<ClusterPayload>,
        dag: &mut Dag,
    ) -> Result<Outcome> {
        let inventory = Inventory::load(ctx).await?;
        let dag: &Dag = dag;
        let components: BTreeMap<String, ComponentPhase> = ctx
            .payload
            .entity_names()
            .into_iter()
            .map(|name| {
                let phase = if ctx.payload.is_sharding(&name) {
                    let shards = inventory.shards(&name);
                    pending(
                        sharding_phase(&shards),
                        !shards.is_empty() && sharding_staged(dag, &name, None),
                    )
                } else {
                    inventory
                        .components
                        .get(&name)
                        .map_or(ComponentPhase::Creating, |comp| {
                            pending(component_phase(comp), dag.contains(&component_key(ctx, &name)))
                        })
                };
                (name, phase)
            })
            .collect();

        let phase = cluster_phase(components.values().copied(), ctx.payload.phase());
        let status = &mut ctx.payload.cluster.status;
        status.components = components;
        status.observed_generation = ctx.payload.cluster.metadata.generation;
        if phase != ClusterPhase::Failed {
            status.message.clear();
        }
        let ready = phase == ClusterPhase::Running;
        status.set_condition(Condition::new(
            CONDITION_READY,
            ready,
            phase.to_string(),
            if ready {
                "all components are running"
            } else {
                "not all components are running"
            },
        ));
        set_phase(ctx, phase);
        Ok(Outcome::Continue)
    }
}

/// A component whose spec is not yet observed is updating whatever its
/// last phase was.
fn component_phase(comp: &Component) -> ComponentPhase {
    match comp.status.phase {
        None => ComponentPhase::Creating,
        Some(_) if comp.metadata.generation != comp.status.observed_generation => {
            ComponentPhase::Updating
        }
        Some(phase) => phase,
    }
}

/// A live entity staged for mutation is updating until the next pass
/// observes the write.
fn pending(phase: ComponentPhase, staged: bool) -> ComponentPhase {
    match phase {
        ComponentPhase::Failed | ComponentPhase::Creating => phase,
        _ if staged => ComponentPhase::Updating,
        _ => phase,
    }
}

fn sharding_phase(shards: &[&Component]) -> ComponentPhase {
    if shards.is_empty() {
        return ComponentPhase::Creating;
    }
    let phases: Vec<ComponentPhase> = shards.iter().map(|s| component_phase(s)).collect();
    if phases.contains(&ComponentPhase::Failed) {
        ComponentPhase::Failed
    } else if let Some(first) = phases.first().filter(|p| phases.iter().all(|q| q == *p)) {
        *first
    } else if phases.contains(&ComponentPhase::Stopping) {
        ComponentPhase::Stopping
    } else {
        ComponentPhase::Updating
    }
}

fn cluster_phase<I>(phases: I, current: Option<ClusterPhase>) -> ClusterPhase
where
    I: IntoIterator<Item = ComponentPhase>,
{
    let phases: Vec<ComponentPhase> = phases.into_iter().collect();
    let all = |phase| phases.iter().all(|p| *p == phase);
    let any = |phase| phases.contains(&phase);

    if any(ComponentPhase::Failed) {
        ClusterPhase::Failed
    } else if all(ComponentPhase::Running) {
        ClusterPhase::Running
    } else if all(ComponentPhase::Stopped) {
        ClusterPhase::Stopped
    } else if any(ComponentPhase::Stopping) {
        ClusterPhase::Stopping
    } else if matches!(current, None | Some(ClusterPhase::Creating)) {
        ClusterPhase::Creating
    } else {
        ClusterPhase::Updating
    }
}

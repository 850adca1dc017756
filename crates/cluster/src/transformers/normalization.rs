//! Topology resolution, spec validation and component rendering.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use keel_core::{ObjectKey, ResourceSpec};
use keel_reconciler::{Dag, Outcome, TransformContext, Transformer};
use tracing::debug;

use crate::builder::ComponentBuilder;
use crate::error::{Error, Result};
use crate::payload::ClusterPayload;
use crate::topology::Topology;
use crate::transformers::set_phase;
use crate::types::{
    shard_name, ClusterDefinition, ClusterDefinitionSpec, ClusterPhase, ClusterSpec, Condition,
    CONDITION_VALIDATED,
};

/// First step of the chain. A deleting cluster only resolves its topology.
pub struct NormalizationTransformer {
    builder: Arc<dyn ComponentBuilder>,
}

impl NormalizationTransformer {
    pub fn new(builder: Arc<dyn ComponentBuilder>) -> Self {
        Self { builder }
    }

    async fn normalize(&self, ctx: &mut TransformContext<ClusterPayload>, dag: &Dag) -> Result<()> {
        let spec = ctx.payload.cluster.spec.clone();
        ctx.payload.topology = match resolve(ctx, dag, &spec).await? {
            Some((definition, topology)) => {
                ctx.payload.definition = Some(definition);
                topology
            }
            None => Topology::unordered(),
        };
        if ctx.payload.is_deleting() {
            return Ok(());
        }

        validate(&spec, &ctx.payload.topology)?;
        self.render(&mut ctx.payload, &spec)
    }

    fn render(&self, payload: &mut ClusterPayload, spec: &ClusterSpec) -> Result<()> {
        for comp in &spec.components {
            let definition = definition_for(&payload.topology, &comp.name, &comp.definition)?;
            let built = self
                .builder
                .build_component(&payload.cluster, comp, &definition)?;
            payload.components.insert(comp.name.clone(), built);
        }
        for sharding in &spec.shardings {
            let definition = definition_for(
                &payload.topology,
                &sharding.name,
                &sharding.template.definition,
            )?;
            let shards = self
                .builder
                .build_shards(&payload.cluster, sharding, &definition)?;
            payload.shardings.insert(sharding.name.clone(), shards);
        }
        Ok(())
    }
}

#[async_trait]
impl Transformer<ClusterPayload> for NormalizationTransformer {
    fn name(&self) -> &str {
        "normalization"
    }

    async fn transform(
        &self,
        ctx: &mut TransformContext<ClusterPayload>,
        dag: &mut Dag,
    ) -> keel_reconciler::Result<Outcome> {
        let normalized = self.normalize(ctx, dag).await;

        if ctx.payload.is_deleting() {
            if let Err(err) = normalized {
                debug!(parent: &ctx.span, error = %err, "topology unavailable, terminating in parallel");
            }
            return Ok(Outcome::Continue);
        }

        match normalized {
            Ok(()) => {
                ctx.payload.cluster.status.set_condition(Condition::new(
                    CONDITION_VALIDATED,
                    true,
                    "Validated",
                    "cluster spec accepted",
                ));
                if ctx.payload.phase().is_none() {
                    set_phase(ctx, ClusterPhase::Creating);
                }
                register_finalizer(ctx);
                Ok(Outcome::Continue)
            }
            Err(err) if err.is_retryable() => Err(err.into()),
            Err(err) => {
                let message = err.to_string();
                ctx.payload.cluster.status.set_condition(Condition::new(
                    CONDITION_VALIDATED,
                    false,
                    "InvalidSpec",
                    message.clone(),
                ));
                ctx.payload.cluster.status.message = message;
                set_phase(ctx, ClusterPhase::Failed);
                Err(err.into())
            }
        }
    }
}

/// Load the definition and pick the topology. `None` without a definition.
async fn resolve(
    ctx: &TransformContext<ClusterPayload>,
    dag: &Dag,
    spec: &ClusterSpec,
) -> Result<Option<(ClusterDefinition, Topology)>> {
    if spec.cluster_def.is_empty() {
        return Ok(None);
    }
    let key = ObjectKey::new(ClusterDefinitionSpec::kind(), "", spec.cluster_def.as_str());
    let obj = match ctx.client.get(dag, &key).await {
        Ok(obj) => obj,
        Err(err) if err.is_not_found() => return Err(Error::definition_not_found(&spec.cluster_def)),
        Err(err) => return Err(err.into()),
    };
    let definition = ClusterDefinition::from_object(&obj)?;
    let declared = definition
        .spec
        .topology(&spec.topology)
        .ok_or_else(|| Error::topology_not_found(&spec.cluster_def, &spec.topology))?;
    let topology = Topology::resolve(declared);
    debug!(parent: &ctx.span, topology = topology.name(), "topology resolved");
    Ok(Some((definition, topology)))
}

fn validate(spec: &ClusterSpec, topology: &Topology) -> Result<()> {
    let mut seen = BTreeSet::new();
    for name in spec.entity_names() {
        if name.is_empty() {
            return Err(Error::invalid_spec("component and sharding names must not be empty"));
        }
        if !seen.insert(name) {
            return Err(Error::invalid_spec(format!(
                "duplicate component or sharding name '{name}'"
            )));
        }
    }

    for sharding in &spec.shardings {
        if sharding.shards == 0 {
            return Err(Error::invalid_spec(format!(
                "sharding '{}' must have at least one shard",
                sharding.name
            )));
        }
        if let Some(clash) = (0..sharding.shards)
            .map(|index| shard_name(&sharding.name, index))
            .find(|shard| spec.component(shard).is_some())
        {
            return Err(Error::invalid_spec(format!(
                "component '{clash}' collides with a shard of '{}'",
                sharding.name
            )));
        }
    }

    if topology.has_entities() {
        if let Some(comp) = spec
            .components
            .iter()
            .find(|c| !topology.declares_component(&c.name))
        {
            return Err(Error::invalid_spec(format!(
                "component '{}' is not part of topology '{}'",
                comp.name,
                topology.name()
            )));
        }
        if let Some(sharding) = spec
            .shardings
            .iter()
            .find(|s| !topology.declares_sharding(&s.name))
        {
            return Err(Error::invalid_spec(format!(
                "sharding '{}' is not part of topology '{}'",
                sharding.name,
                topology.name()
            )));
        }
    }
    Ok(())
}

fn definition_for(topology: &Topology, name: &str, declared: &str) -> Result<String> {
    if !declared.is_empty() {
        return Ok(declared.to_string());
    }
    topology
        .definition_for(name)
        .map(String::from)
        .ok_or_else(|| Error::invalid_spec(format!("'{name}' has no component definition")))
}

fn register_finalizer(ctx: &mut TransformContext<ClusterPayload>) {
    let finalizer = ctx.ownership.finalizer().to_string();
    if !ctx.payload.cluster.metadata.finalizers.contains(&finalizer) {
        debug!(parent: &ctx.span, %finalizer, "registering finalizer");
        ctx.payload.cluster.metadata.finalizers.push(finalizer);
    }
}

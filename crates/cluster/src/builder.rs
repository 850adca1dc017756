//! Rendering of desired component objects from the cluster spec.

use crate::error::Result;
use crate::types::{
    component_object_name, shard_name, Cluster, ClusterComponentSpec, ClusterSharding, Component,
    ComponentSpec, CLUSTER_GENERATION_ANNOTATION, COMPONENT_NAME_LABEL, INSTANCE_LABEL,
    SHARDING_NAME_LABEL,
};

/// Turns cluster component declarations into component objects.
///
/// Implementations are pure: the same cluster renders the same objects.
pub trait ComponentBuilder: Send + Sync {
    /// Render one component. `definition` is already resolved against the
    /// topology.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSpec` when the declaration cannot be rendered.
    fn build_component(
        &self,
        cluster: &Cluster,
        spec: &ClusterComponentSpec,
        definition: &str,
    ) -> Result<Component>;

    /// Render every shard of a sharding, named `{sharding}-{index}`.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Self::build_component`].
    fn build_shards(
        &self,
        cluster: &Cluster,
        sharding: &ClusterSharding,
        definition: &str,
    ) -> Result<Vec<Component>> {
        (0..sharding.shards)
            .map(|index| {
                let spec = ClusterComponentSpec {
                    name: shard_name(&sharding.name, index),
                    ..sharding.template.clone()
                };
                let mut shard = self.build_component(cluster, &spec, definition)?;
                shard
                    .metadata
                    .labels
                    .insert(SHARDING_NAME_LABEL.to_string(), sharding.name.clone());
                Ok(shard)
            })
            .collect()
    }
}

/// Copies the declaration into the component spec and stamps the cluster
/// labels and generation.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultComponentBuilder;

impl ComponentBuilder for DefaultComponentBuilder {
    fn build_component(
        &self,
        cluster: &Cluster,
        spec: &ClusterComponentSpec,
        definition: &str,
    ) -> Result<Component> {
        let mut comp = Component::new(
            cluster.namespace(),
            component_object_name(cluster.name(), &spec.name),
            ComponentSpec {
                definition: definition.to_string(),
                version: spec.version.clone(),
                replicas: spec.replicas,
                stop: spec.stop,
            },
        );
        let labels = &mut comp.metadata.labels;
        labels.insert(INSTANCE_LABEL.to_string(), cluster.name().to_string());
        labels.insert(COMPONENT_NAME_LABEL.to_string(), spec.name.clone());
        comp.metadata.annotations.insert(
            CLUSTER_GENERATION_ANNOTATION.to_string(),
            cluster.metadata.generation.to_string(),
        );
        Ok(comp)
    }
}

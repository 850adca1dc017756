use async_trait::async_trait;
use keel_core::Object;
use keel_reconciler::{Action, Dag, Outcome, Result, TransformContext, Transformer};
use tracing::debug;

use crate::payload::ClusterPayload;

/// Adopts every object staged for creation by the cluster.
#[derive(Debug, Default, Clone, Copy)]
pub struct OwnershipTransformer;

#[async_trait]
impl Transformer<ClusterPayload> for OwnershipTransformer {
    fn name(&self) -> &str {
        "ownership"
    }

    async fn transform(
        &self,
        ctx: &mut TransformContext<ClusterPayload>,
        dag: &mut Dag,
    ) -> Result<Outcome> {
        let owner = ctx.payload.cluster.to_object()?;
        let keys: Vec<_> = dag
            .find_all(|v| v.is_action(Action::Create) && !dag.is_root(v.key()))
            .into_iter()
            .map(|v| v.key().clone())
            .collect();

        for key in keys {
            if let Some(desired) = dag.vertex_mut(&key).and_then(|v| v.desired.as_mut()) {
                ctx.ownership.adopt(&owner, desired)?;
            }
        }
        Ok(Outcome::Continue)
    }
}

/// Adopt `obj` before staging it, for transformers that may end the chain
/// before [`OwnershipTransformer`] runs.
pub(crate) fn adopt(ctx: &TransformContext<ClusterPayload>, obj: &mut Object) -> Result<()> {
    let owner = ctx.payload.cluster.to_object()?;
    ctx.ownership.adopt(&owner, obj)?;
    debug!(parent: &ctx.span, key = %obj.key(), "adopted");
    Ok(())
}

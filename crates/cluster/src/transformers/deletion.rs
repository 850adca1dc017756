use async_trait::async_trait;
use keel_reconciler::{Dag, Outcome, Result, TransformContext, Transformer, WriteOptions};
use tracing::{debug, info};

use crate::payload::ClusterPayload;
use crate::transformers::set_phase;
use crate::types::ClusterPhase;

/// Holds a terminating cluster until everything it owns is gone, then
/// releases its finalizer.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeletionTransformer;

#[async_trait]
impl Transformer<ClusterPayload> for DeletionTransformer {
    fn name(&self) -> &str {
        "deletion"
    }

    async fn transform(
        &self,
        ctx: &mut TransformContext<ClusterPayload>,
        dag: &mut Dag,
    ) -> Result<Outcome> {
        if !ctx.payload.is_deleting() {
            return Ok(Outcome::Continue);
        }
        set_phase(ctx, ClusterPhase::Deleting);

        let owner = ctx.payload.original.to_object()?;
        let selector = ctx.ownership.owner_selector(&owner);
        let mut remaining = 0;
        for kind in ctx.ownership.owned_kinds() {
            remaining += ctx
                .client
                .list_live(kind, Some(owner.namespace()), &selector)
                .await?
                .len();
        }
        if remaining > 0 {
            debug!(parent: &ctx.span, remaining, "waiting for owned objects");
            return Ok(Outcome::Stop);
        }

        info!(parent: &ctx.span, "owned objects gone, releasing cluster");
        ctx.client.delete(dag, owner, WriteOptions::default())?;
        Ok(Outcome::Stop)
    }
}

//! The cluster transformer chain, in registration order:
//!
//! 1. [`NormalizationTransformer`]: resolve the topology, validate the spec,
//!    render desired components and register the finalizer
//! 2. [`TopologyScheduler`]: stage component creates, updates and deletes
//!    stage by stage
//! 3. [`OwnershipTransformer`]: adopt every created object
//! 4. [`DeletionTransformer`]: finish the teardown of a deleting cluster
//! 5. [`StatusTransformer`]: aggregate component phases into the cluster status

mod deletion;
mod normalization;
mod ownership;
mod scheduler;
mod status;

pub use deletion::DeletionTransformer;
pub use normalization::NormalizationTransformer;
pub use ownership::OwnershipTransformer;
pub use scheduler::TopologyScheduler;
pub use status::StatusTransformer;

use keel_reconciler::{Event, TransformContext};
use tracing::info;

use crate::payload::ClusterPayload;
use crate::types::ClusterPhase;

/// Set the desired cluster phase, recording an event when it changes.
pub(crate) fn set_phase(ctx: &mut TransformContext<ClusterPayload>, phase: ClusterPhase) {
    let current = ctx.payload.cluster.status.phase;
    if current == Some(phase) {
        return;
    }
    ctx.payload.cluster.status.phase = Some(phase);

    let from = current.map_or_else(|| "None".to_string(), |p| p.to_string());
    let message = format!("cluster phase changed from {from} to {phase}");
    info!(parent: &ctx.span, %phase, from = %from, "cluster phase changed");
    let key = ctx.payload.key();
    let event = if phase == ClusterPhase::Failed {
        Event::warning(key, "PhaseChanged", message)
    } else {
        Event::normal(key, "PhaseChanged", message)
    };
    ctx.record(event);
}

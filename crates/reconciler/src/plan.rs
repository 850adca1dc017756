//! Plan building and execution.
//!
//! `PlanBuilder::init` loads the primary, `build` runs the transformer chain
//! into a DAG, and `Plan::execute` walks that DAG against the store. The
//! plan is always executed, even when the build failed or stopped early, so
//! every reconcile applies whatever progress was planned.

use std::collections::HashSet;

use futures::stream::{self, StreamExt};
use keel_core::{
    merge_diff, DeleteOptions, Object, ObjectKey, ObjectStore, StoreResultExt,
};
use serde_json::{Map, Value};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::cancel::Cancellation;
use crate::context::{Engine, Payload, TransformContext};
use crate::dag::{Dag, WalkOrder};
use crate::error::{Error, Result};
use crate::outcome::{BuildStatus, Requeue};
use crate::recorder::Event;
use crate::transformer::{ParallelTransformers, Transformer, TransformerChain};
use crate::vertex::{Action, Vertex};

/// Loads the primary and collects the transformer chain.
pub struct PlanBuilder<P: Payload> {
    ctx: TransformContext<P>,
    chain: TransformerChain<P>,
    primary: Object,
}

impl<P: Payload + 'static> PlanBuilder<P> {
    /// Fetch the primary object and set up the per-reconcile context.
    ///
    /// # Errors
    ///
    /// - `PrimaryNotFound` if the primary does not exist
    /// - store or payload decoding errors
    pub async fn init(engine: &Engine, key: &ObjectKey, cancel: Cancellation) -> Result<Self> {
        let span = info_span!("reconcile", key = %key);
        let primary = engine
            .store()
            .get(key)
            .instrument(span.clone())
            .await
            .ignore_not_found()?
            .ok_or_else(|| Error::primary_not_found(key.clone()))?;
        let payload = P::from_primary(&primary)?;
        Ok(Self {
            ctx: engine.context(payload, cancel, span),
            chain: TransformerChain::new(),
            primary,
        })
    }

    #[must_use]
    pub fn add_transformer<T: Transformer<P> + 'static>(mut self, transformer: T) -> Self {
        self.chain.push(Box::new(transformer));
        self
    }

    /// Add members that run independently of each other as one chain step.
    #[must_use]
    pub fn add_parallel_transformer(mut self, name: &str, members: Vec<Box<dyn Transformer<P>>>) -> Self {
        self.chain.push(Box::new(ParallelTransformers::new(name, members)));
        self
    }

    pub fn payload(&self) -> &P {
        &self.ctx.payload
    }

    /// Run the chain into a fresh DAG rooted at the primary.
    ///
    /// The build status is returned, not raised: the plan must still be
    /// executed.
    ///
    /// # Errors
    ///
    /// Fails only if the desired primary cannot be encoded.
    pub async fn build(self) -> Result<(Plan<P>, BuildStatus)> {
        let Self {
            mut ctx,
            chain,
            primary,
        } = self;
        let mut dag = Dag::new(Vertex::root(primary));
        let span = ctx.span.clone();
        let status = chain.apply_to(&mut ctx, &mut dag).instrument(span.clone()).await;

        let root = dag.root_mut();
        if matches!(root.action, Action::Status | Action::Update | Action::Patch) {
            root.desired = Some(ctx.payload.primary()?);
        }

        span.in_scope(|| {
            if ctx.config.log_dag {
                info!(vertices = dag.vertex_count(), "plan built\n{dag}");
            } else {
                debug!(vertices = dag.vertex_count(), "plan built\n{dag}");
            }
        });

        Ok((Plan { ctx, dag }, status))
    }
}

/// A built DAG plus the context it was built with.
pub struct Plan<P> {
    ctx: TransformContext<P>,
    dag: Dag,
}

impl<P: Payload> Plan<P> {
    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    pub fn payload(&self) -> &P {
        &self.ctx.payload
    }

    /// Execute, then classify the reconcile from both the build status and
    /// the execute result. Execute errors take precedence.
    ///
    /// # Errors
    ///
    /// Returns the execute error, or the build error when execution
    /// succeeded. Conflicts become `Requeue::Immediately` instead.
    pub async fn run(self, status: BuildStatus) -> Result<Requeue> {
        let executed = self.execute().await;
        self.conclude(status, executed)
    }

    /// Walk the DAG and apply every vertex.
    ///
    /// # Errors
    ///
    /// - `Cancelled` if the cancellation fired; applied writes stay applied
    /// - the failed write, or `Aggregate` when several failed
    pub async fn execute(&self) -> Result<()> {
        self.execute_layers().instrument(self.ctx.span.clone()).await
    }

    async fn execute_layers(&self) -> Result<()> {
        let order = WalkOrder::compute(&self.dag)?;
        let parallelism = self.ctx.config.write_parallelism.max(1);
        let mut blocked = HashSet::new();
        let mut errors = Vec::new();

        for layer in order.layers() {
            if self.ctx.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let runnable: Vec<_> = order
                .runnable(layer, &mut blocked)
                .into_iter()
                .filter_map(|index| self.dag.node(index).map(|v| (index, v)))
                .collect();
            let writes = stream::iter(runnable)
                .map(|(index, vertex)| async move { (index, self.apply(vertex).await) })
                .buffered(parallelism)
                .collect::<Vec<_>>();
            let results = tokio::select! {
                biased;
                () = self.ctx.cancel.cancelled() => return Err(Error::Cancelled),
                results = writes => results,
            };
            for (index, result) in results {
                if let Err(err) = result {
                    if err.is_conflict() {
                        debug!(error = %err, "write conflict");
                    } else {
                        warn!(error = %err, "write failed");
                    }
                    errors.push(err);
                    order.block_successors(index, &mut blocked);
                }
            }
        }

        Error::from_many(errors).map_or(Ok(()), Err)
    }

    async fn apply(&self, vertex: &Vertex) -> Result<()> {
        let key = vertex.key();
        debug!(key = %key, action = %vertex.action, "applying vertex");
        let store = self.ctx.client.store().as_ref();
        let applied = match vertex.action {
            Action::Create => apply_create(store, vertex).await,
            Action::Update => apply_update(store, vertex).await,
            Action::Patch => apply_patch(store, vertex).await,
            Action::Delete => apply_delete(store, vertex, self.ctx.ownership.finalizer()).await,
            Action::Status => apply_status(store, vertex, self.dag.is_root(key)).await,
            Action::Noop => Ok(()),
        };
        applied.map_err(|err| Error::apply(key.clone(), vertex.action, err))
    }

    fn conclude(&self, status: BuildStatus, executed: Result<()>) -> Result<Requeue> {
        let key = self.dag.root_key().clone();
        let _guard = self.ctx.span.enter();

        if let Err(err) = executed {
            if err.is_conflict() {
                debug!(error = %err, "conflict while applying plan, requeue immediately");
                return Ok(Requeue::Immediately);
            }
            if !matches!(err, Error::Cancelled) {
                self.ctx.record(Event::warning(key, "ApplyFailed", err.to_string()));
            }
            error!(error = %err, "failed to apply plan");
            return Err(err);
        }

        match status {
            BuildStatus::Completed | BuildStatus::Stopped => Ok(Requeue::Done),
            BuildStatus::Retry { after, reason } => {
                info!(?after, %reason, "requeue");
                self.ctx.record(Event::normal(key, "Waiting", reason));
                Ok(Requeue::After(after))
            }
            BuildStatus::Failed(err) if err.is_conflict() => {
                debug!(error = %err, "conflict while building plan, requeue immediately");
                Ok(Requeue::Immediately)
            }
            BuildStatus::Failed(err) => {
                self.ctx.record(Event::warning(key, "ReconcileFailed", err.to_string()));
                error!(error = %err, "failed to build plan");
                Err(err)
            }
        }
    }
}

async fn apply_create(store: &dyn ObjectStore, vertex: &Vertex) -> keel_core::Result<()> {
    let Some(desired) = &vertex.desired else {
        return Ok(());
    };
    store
        .create(desired.clone())
        .await
        .ignore_already_exists()
        .map(drop)
}

async fn apply_update(store: &dyn ObjectStore, vertex: &Vertex) -> keel_core::Result<()> {
    let Some(desired) = &vertex.desired else {
        return Ok(());
    };
    store.update(desired.clone()).await.ignore_not_found().map(drop)
}

async fn apply_patch(store: &dyn ObjectStore, vertex: &Vertex) -> keel_core::Result<()> {
    let Some(desired) = &vertex.desired else {
        return Ok(());
    };
    let base = match &vertex.observed {
        Some(observed) => patch_document(observed)?,
        None => Value::Null,
    };
    let Some(patch) = merge_diff(&base, &patch_document(desired)?) else {
        return Ok(());
    };
    store
        .patch(vertex.key(), &patch)
        .await
        .ignore_not_found()
        .map(drop)
}

/// Strip the finalizer, then delete unless the object is already going away.
async fn apply_delete(store: &dyn ObjectStore, vertex: &Vertex, finalizer: &str) -> keel_core::Result<()> {
    let key = vertex.key();
    let current = match &vertex.observed {
        Some(observed) => Some(observed.clone()),
        None => store.get(key).await.ignore_not_found()?,
    };
    let Some(mut current) = current else {
        return Ok(());
    };
    if current.remove_finalizer(finalizer) {
        match store.update(current).await.ignore_not_found()? {
            Some(updated) => current = updated,
            None => return Ok(()),
        }
    }
    if current.is_terminating() {
        return Ok(());
    }
    let options = DeleteOptions::with_propagation(vertex.propagation.unwrap_or_default());
    store.delete(key, options).await.ignore_not_found().map(drop)
}

/// Status write. On the root, metadata and spec changes made during the
/// build are patched first.
async fn apply_status(store: &dyn ObjectStore, vertex: &Vertex, is_root: bool) -> keel_core::Result<()> {
    let Some(desired) = &vertex.desired else {
        return Ok(());
    };
    let key = vertex.key();
    let observed = vertex.observed.as_ref();

    if is_root {
        let base = match observed {
            Some(obj) => patch_document(obj)?,
            None => Value::Null,
        };
        if let Some(patch) = merge_diff(&base, &patch_document(desired)?) {
            if store.patch(key, &patch).await.ignore_not_found()?.is_none() {
                return Ok(());
            }
        }
    }

    let base = observed.map_or(Value::Null, |o| o.status.clone());
    if let Some(patch) = merge_diff(&base, &desired.status) {
        store.patch_status(key, &patch).await.ignore_not_found()?;
    }
    Ok(())
}

/// The writable part of an object, shaped for the store's merge patch.
fn patch_document(obj: &Object) -> keel_core::Result<Value> {
    let meta = &obj.metadata;
    let mut metadata = Map::new();
    metadata.insert("labels".into(), serde_json::to_value(&meta.labels)?);
    metadata.insert("annotations".into(), serde_json::to_value(&meta.annotations)?);
    metadata.insert("finalizers".into(), serde_json::to_value(&meta.finalizers)?);
    metadata.insert(
        "owner_references".into(),
        serde_json::to_value(&meta.owner_references)?,
    );
    let mut doc = Map::new();
    doc.insert("metadata".into(), Value::Object(metadata));
    doc.insert("spec".into(), obj.spec.clone());
    Ok(Value::Object(doc))
}

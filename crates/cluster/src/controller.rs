//! The cluster controller entry point.

use std::sync::Arc;

use futures::{stream, StreamExt};
use keel_core::{ObjectKey, ObjectStore, ResourceSpec};
use keel_reconciler::{
    BuildStatus, Cancellation, ControllerOwnership, Engine, EventRecorder, Plan, PlanBuilder,
    ReconcilerConfig, Requeue,
};
use tracing::{debug, info};

use crate::builder::{ComponentBuilder, DefaultComponentBuilder};
use crate::error::{Error, Result};
use crate::payload::ClusterPayload;
use crate::transformers::{
    DeletionTransformer, NormalizationTransformer, OwnershipTransformer, StatusTransformer,
    TopologyScheduler,
};
use crate::types::{ComponentSpec, INSTANCE_LABEL};

/// Reconciles `Cluster` objects into their components.
pub struct ClusterReconciler {
    engine: Engine,
    builder: Arc<dyn ComponentBuilder>,
}

impl ClusterReconciler {
    /// Reconciler with the default component builder and a tracing recorder.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when `config` does not validate.
    pub fn new(store: Arc<dyn ObjectStore>, config: ReconcilerConfig) -> Result<Self> {
        ClusterReconcilerBuilder::new()
            .with_store(store)
            .with_config(config)
            .build()
    }

    pub fn builder() -> ClusterReconcilerBuilder {
        ClusterReconcilerBuilder::new()
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Build the plan for one cluster without executing it. `None` when the
    /// cluster no longer exists.
    ///
    /// # Errors
    ///
    /// Store errors while loading the cluster, or a cluster that cannot be
    /// decoded.
    pub async fn plan(
        &self,
        key: &ObjectKey,
        cancel: Cancellation,
    ) -> keel_reconciler::Result<Option<(Plan<ClusterPayload>, BuildStatus)>> {
        let builder = match PlanBuilder::<ClusterPayload>::init(&self.engine, key, cancel).await {
            Ok(builder) => builder,
            Err(keel_reconciler::Error::PrimaryNotFound { .. }) => {
                debug!(key = %key, "cluster not found, nothing to reconcile");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        let built = builder
            .add_transformer(NormalizationTransformer::new(Arc::clone(&self.builder)))
            .add_transformer(TopologyScheduler)
            .add_transformer(OwnershipTransformer)
            .add_transformer(DeletionTransformer)
            .add_transformer(StatusTransformer)
            .build()
            .await?;
        Ok(Some(built))
    }

    /// Reconcile one cluster to completion of this pass.
    ///
    /// # Errors
    ///
    /// See [`Self::reconcile_with`].
    pub async fn reconcile(&self, key: &ObjectKey) -> keel_reconciler::Result<Requeue> {
        self.reconcile_with(key, Cancellation::never()).await
    }

    /// Reconcile one cluster, aborting the write walk when `cancel` fires.
    ///
    /// # Errors
    ///
    /// - `Validation` for a cluster spec that cannot be satisfied
    /// - `Apply` or `Aggregate` for failed writes
    /// - `Cancelled` when cancelled mid-walk
    pub async fn reconcile_with(
        &self,
        key: &ObjectKey,
        cancel: Cancellation,
    ) -> keel_reconciler::Result<Requeue> {
        let Some((plan, status)) = self.plan(key, cancel).await? else {
            return Ok(Requeue::Done);
        };
        let requeue = plan.run(status).await?;
        debug!(key = %key, ?requeue, "reconciled");
        Ok(requeue)
    }

    /// Reconcile several clusters, at most `max_concurrent_reconciles` at
    /// once. Results come back in completion order.
    pub async fn reconcile_all(
        &self,
        keys: Vec<ObjectKey>,
    ) -> Vec<(ObjectKey, keel_reconciler::Result<Requeue>)> {
        let limit = self.engine.config().max_concurrent_reconciles.max(1);
        info!(clusters = keys.len(), limit, "reconciling clusters");
        stream::iter(keys)
            .map(|key| async move {
                let result = self.reconcile(&key).await;
                (key, result)
            })
            .buffer_unordered(limit)
            .collect()
            .await
    }
}

/// Builder for [`ClusterReconciler`].
pub struct ClusterReconcilerBuilder {
    store: Option<Arc<dyn ObjectStore>>,
    recorder: Option<Arc<dyn EventRecorder>>,
    builder: Arc<dyn ComponentBuilder>,
    config: ReconcilerConfig,
}

impl ClusterReconcilerBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            recorder: None,
            builder: Arc::new(DefaultComponentBuilder),
            config: ReconcilerConfig::default(),
        }
    }

    /// Set the backing store. Required.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace how desired components are rendered.
    #[must_use]
    pub fn with_component_builder(mut self, builder: Arc<dyn ComponentBuilder>) -> Self {
        self.builder = builder;
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` without a store or with an invalid config.
    pub fn build(self) -> Result<ClusterReconciler> {
        let store = self
            .store
            .ok_or_else(|| keel_reconciler::Error::invalid_config("Object store is required"))?;
        self.config.validate().map_err(Error::from)?;

        let ownership = ControllerOwnership::new(self.config.finalizer.clone(), INSTANCE_LABEL)
            .owning(ComponentSpec::kind());
        let mut engine = Engine::new(store, Arc::new(ownership)).with_config(self.config);
        if let Some(recorder) = self.recorder {
            engine = engine.with_recorder(recorder);
        }
        Ok(ClusterReconciler {
            engine,
            builder: self.builder,
        })
    }
}

impl Default for ClusterReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! Per-reconcile context handed to every transformer.

use std::sync::Arc;

use keel_core::{Object, ObjectStore};
use tracing::Span;

use crate::cancel::Cancellation;
use crate::config::ReconcilerConfig;
use crate::error::Result;
use crate::graph_client::GraphClient;
use crate::ownership::OwnershipPolicy;
use crate::recorder::{Event, EventRecorder, TracingRecorder};

/// Controller-specific state carried through one reconcile.
pub trait Payload: Sized + Send + Sync {
    /// Build the payload from the freshly loaded primary.
    ///
    /// # Errors
    ///
    /// Fails when the primary does not decode into the payload's types.
    fn from_primary(primary: &Object) -> Result<Self>;

    /// The primary as transformers left it: the desired root object.
    ///
    /// # Errors
    ///
    /// Fails when the typed primary cannot be encoded.
    fn primary(&self) -> Result<Object>;
}

/// Long-lived dependencies shared by every reconcile of one controller.
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn ObjectStore>,
    recorder: Arc<dyn EventRecorder>,
    config: Arc<ReconcilerConfig>,
    ownership: Arc<dyn OwnershipPolicy>,
}

impl Engine {
    pub fn new(store: Arc<dyn ObjectStore>, ownership: Arc<dyn OwnershipPolicy>) -> Self {
        Self {
            store,
            recorder: Arc::new(TracingRecorder),
            config: Arc::new(ReconcilerConfig::default()),
            ownership,
        }
    }

    #[must_use]
    pub fn with_recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn recorder(&self) -> &Arc<dyn EventRecorder> {
        &self.recorder
    }

    pub fn ownership(&self) -> &Arc<dyn OwnershipPolicy> {
        &self.ownership
    }

    pub(crate) fn context<P>(&self, payload: P, cancel: Cancellation, span: Span) -> TransformContext<P> {
        TransformContext {
            client: GraphClient::new(self.store.clone()),
            recorder: self.recorder.clone(),
            config: self.config.clone(),
            ownership: self.ownership.clone(),
            cancel,
            span,
            payload,
        }
    }
}

/// Everything a transformer may use. Owned by one plan for one reconcile.
pub struct TransformContext<P> {
    pub client: GraphClient,
    pub recorder: Arc<dyn EventRecorder>,
    pub config: Arc<ReconcilerConfig>,
    pub ownership: Arc<dyn OwnershipPolicy>,
    pub cancel: Cancellation,
    /// The `reconcile` span; the per-reconcile logger.
    pub span: Span,
    pub payload: P,
}

impl<P> TransformContext<P> {
    pub fn record(&self, event: Event) {
        self.recorder.record(event);
    }
}

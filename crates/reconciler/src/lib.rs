//! Declarative multi-resource reconciliation engine.
//!
//! One reconcile of a primary object runs in two phases:
//!
//! - **Build**: a [`TransformerChain`] of [`Transformer`]s stages intended
//!   operations into a [`Dag`] through the [`GraphClient`]. Nothing is written
//!   to the store; reads see staged intents first.
//! - **Execute**: the [`Plan`] walks the DAG so that dependencies are applied
//!   before their dependents (deletes in reverse), translating each
//!   [`Vertex`]'s [`Action`] into a store call. Independent branches survive
//!   partial failure and the root is always applied last.
//!
//! # Outcomes
//!
//! Transformers return [`Outcome`] (`Continue`, `Stop`, `Retry`) or an error;
//! the chain folds them into a [`BuildStatus`], and [`Plan::run`] combines that
//! with the execute result into a [`Requeue`].
//!
//! # Example
//!
//! ```ignore
//! use keel_reconciler::{cancellation, Engine, PlanBuilder};
//!
//! let (_handle, cancel) = cancellation();
//! let (plan, status) = PlanBuilder::<MyPayload>::init(&engine, &key, cancel)
//!     .await?
//!     .add_transformer(LoadResources)
//!     .add_transformer(BuildServices)
//!     .build()
//!     .await?;
//! let requeue = plan.run(status).await?;
//! ```

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod cancel;
pub mod config;
pub mod context;
pub mod dag;
pub mod error;
pub mod graph_client;
pub mod outcome;
pub mod ownership;
pub mod plan;
pub mod recorder;
pub mod transformer;
pub mod vertex;

// Re-export main types
pub use cancel::{cancellation, CancelHandle, Cancellation};
pub use config::ReconcilerConfig;
pub use context::{Engine, Payload, TransformContext};
pub use dag::{Dag, DagError, DagResult, WalkError};
pub use error::{Error, Result};
pub use graph_client::{GraphClient, WriteOptions};
pub use outcome::{BuildStatus, Outcome, Requeue};
pub use ownership::{ControllerOwnership, OwnershipPolicy};
pub use plan::{Plan, PlanBuilder};
pub use recorder::{Event, EventRecorder, EventType, InMemoryRecorder, TracingRecorder};
pub use transformer::{FnTransformer, ParallelTransformers, Transformer, TransformerChain};
pub use vertex::{Action, Vertex};

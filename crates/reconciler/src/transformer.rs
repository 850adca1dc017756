//! Planning steps and the ordered chain that runs them.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::context::TransformContext;
use crate::dag::Dag;
use crate::error::{Error, Result};
use crate::outcome::{BuildStatus, Outcome};

/// A unit of planning logic.
///
/// Transformers are stateless across reconciles and idempotent: running one
/// twice against the same context stages the same vertices.
#[async_trait]
pub trait Transformer<P: Send + Sync>: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Read or stage vertices.
    async fn transform(&self, ctx: &mut TransformContext<P>, dag: &mut Dag) -> Result<Outcome>;
}

/// Transformers applied in registration order.
pub struct TransformerChain<P: Send + Sync> {
    transformers: Vec<Box<dyn Transformer<P>>>,
}

impl<P: Send + Sync> Default for TransformerChain<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Send + Sync> TransformerChain<P> {
    pub fn new() -> Self {
        Self {
            transformers: Vec::new(),
        }
    }

    pub fn push(&mut self, transformer: Box<dyn Transformer<P>>) {
        self.transformers.push(transformer);
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.transformers.iter().map(|t| t.name()).collect()
    }

    /// Run every transformer until one stops, asks to retry or fails.
    /// Vertices staged before that point stay in the DAG.
    pub async fn apply_to(&self, ctx: &mut TransformContext<P>, dag: &mut Dag) -> BuildStatus {
        for transformer in &self.transformers {
            let name = transformer.name();
            debug!(transformer = name, "applying transformer");
            match transformer.transform(ctx, dag).await {
                Ok(Outcome::Continue) => {}
                Ok(Outcome::Stop) => {
                    debug!(transformer = name, "premature stop");
                    return BuildStatus::Stopped;
                }
                Ok(Outcome::Retry { after, reason }) => {
                    debug!(transformer = name, ?after, %reason, "retry requested");
                    return BuildStatus::Retry { after, reason };
                }
                Err(err) => {
                    warn!(transformer = name, error = %err, "transformer failed");
                    return BuildStatus::Failed(err);
                }
            }
        }
        BuildStatus::Completed
    }
}

/// Members with no interdependency. All members run even if one fails;
/// errors aggregate, the shortest retry wins over a stop.
pub struct ParallelTransformers<P: Send + Sync> {
    name: String,
    members: Vec<Box<dyn Transformer<P>>>,
}

impl<P: Send + Sync> ParallelTransformers<P> {
    pub fn new(name: impl Into<String>, members: Vec<Box<dyn Transformer<P>>>) -> Self {
        Self {
            name: name.into(),
            members,
        }
    }
}

#[async_trait]
impl<P: Send + Sync> Transformer<P> for ParallelTransformers<P> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn transform(&self, ctx: &mut TransformContext<P>, dag: &mut Dag) -> Result<Outcome> {
        let mut errors = Vec::new();
        let mut stop = false;
        let mut retry: Option<(Duration, String)> = None;
        for member in &self.members {
            match member.transform(ctx, dag).await {
                Ok(Outcome::Continue) => {}
                Ok(Outcome::Stop) => stop = true,
                Ok(Outcome::Retry { after, reason }) => {
                    if retry.as_ref().map_or(true, |(shortest, _)| after < *shortest) {
                        retry = Some((after, reason));
                    }
                }
                Err(err) => errors.push(err),
            }
        }
        if let Some(err) = Error::from_many(errors) {
            return Err(err);
        }
        Ok(match retry {
            Some((after, reason)) => Outcome::Retry { after, reason },
            None if stop => Outcome::Stop,
            None => Outcome::Continue,
        })
    }
}

/// Adapts a closure into a transformer.
pub struct FnTransformer<P, F> {
    name: String,
    f: F,
    _payload: PhantomData<fn(P)>,
}

impl<P, F> FnTransformer<P, F>
where
    F: Fn(&mut TransformContext<P>, &mut Dag) -> Result<Outcome> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<P, F> Transformer<P> for FnTransformer<P, F>
where
    P: Send + Sync,
    F: Fn(&mut TransformContext<P>, &mut Dag) -> Result<Outcome> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn transform(&self, ctx: &mut TransformContext<P>, dag: &mut Dag) -> Result<Outcome> {
        (self.f)(ctx, dag)
    }
}

//! Staging client used by transformers.
//!
//! Writes only record vertices in the DAG. Reads consult staged vertices
//! first, so a transformer sees what earlier transformers intend even though
//! nothing has been persisted yet.

use std::collections::BTreeMap;
use std::sync::Arc;

use keel_core::{Kind, LabelSelector, Object, ObjectKey, ObjectStore, PropagationPolicy};
use tracing::debug;

use crate::dag::Dag;
use crate::error::Result;
use crate::vertex::{Action, Vertex};

/// Per-write options for staged operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    replace: bool,
    propagation: Option<PropagationPolicy>,
    weight: Option<i32>,
}

impl WriteOptions {
    /// Overwrite the staged action instead of merging with it.
    pub fn replace() -> Self {
        Self {
            replace: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_propagation(mut self, propagation: PropagationPolicy) -> Self {
        self.propagation = Some(propagation);
        self
    }

    #[must_use]
    pub const fn with_weight(mut self, weight: i32) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// Reads through to the store, writes into the DAG.
#[derive(Clone)]
pub struct GraphClient {
    store: Arc<dyn ObjectStore>,
}

impl GraphClient {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Stage a create.
    ///
    /// # Errors
    ///
    /// Returns DAG errors from wiring the new vertex to the root.
    pub fn create(&self, dag: &mut Dag, obj: Object, opts: WriteOptions) -> Result<()> {
        self.do_action(dag, None, Some(obj), Action::Create, opts)
    }

    /// Stage a full update from `observed` to `desired`.
    ///
    /// # Errors
    ///
    /// Returns DAG errors from wiring the new vertex to the root.
    pub fn update(&self, dag: &mut Dag, observed: Object, desired: Object, opts: WriteOptions) -> Result<()> {
        self.do_action(dag, Some(observed), Some(desired), Action::Update, opts)
    }

    /// Stage a merge patch from `observed` to `desired`.
    ///
    /// # Errors
    ///
    /// Returns DAG errors from wiring the new vertex to the root.
    pub fn patch(&self, dag: &mut Dag, observed: Object, desired: Object, opts: WriteOptions) -> Result<()> {
        self.do_action(dag, Some(observed), Some(desired), Action::Patch, opts)
    }

    /// Stage a delete of a live object.
    ///
    /// # Errors
    ///
    /// Returns DAG errors from wiring the new vertex to the root.
    pub fn delete(&self, dag: &mut Dag, obj: Object, opts: WriteOptions) -> Result<()> {
        self.do_action(dag, Some(obj), None, Action::Delete, opts)
    }

    /// Stage a status-only write.
    ///
    /// # Errors
    ///
    /// Returns DAG errors from wiring the new vertex to the root.
    pub fn status(&self, dag: &mut Dag, observed: Object, desired: Object, opts: WriteOptions) -> Result<()> {
        self.do_action(dag, Some(observed), Some(desired), Action::Status, opts)
    }

    /// Stage an object without writing it, so others can depend on it.
    ///
    /// # Errors
    ///
    /// Returns DAG errors from wiring the new vertex to the root.
    pub fn noop(&self, dag: &mut Dag, obj: Object, opts: WriteOptions) -> Result<()> {
        self.do_action(dag, Some(obj.clone()), Some(obj), Action::Noop, opts)
    }

    /// Upsert a vertex for the object named by `desired` or `observed`.
    ///
    /// A new vertex is wired to the root. An existing vertex keeps its action
    /// kind per [`Action::merge`] unless `opts` asks to replace it; the last
    /// desired object written wins.
    ///
    /// # Errors
    ///
    /// Returns DAG errors from wiring the new vertex to the root.
    pub fn do_action(
        &self,
        dag: &mut Dag,
        observed: Option<Object>,
        desired: Option<Object>,
        action: Action,
        opts: WriteOptions,
    ) -> Result<()> {
        let Some(key) = desired.as_ref().or(observed.as_ref()).map(Object::key) else {
            return Ok(());
        };

        if let Some(vertex) = dag.vertex_mut(&key) {
            let merged = if opts.replace {
                action
            } else {
                vertex.action.merge(action)
            };
            debug!(key = %key, staged = %vertex.action, requested = %action, merged = %merged, "upsert vertex");
            match merged {
                Action::Noop if vertex.action == Action::Create => {
                    vertex.desired = None;
                    vertex.observed = None;
                }
                Action::Delete => {
                    if vertex.observed.is_none() {
                        vertex.observed = observed;
                    }
                    vertex.desired = None;
                }
                _ => {
                    if vertex.observed.is_none() {
                        vertex.observed = observed;
                    }
                    if desired.is_some() {
                        vertex.desired = desired;
                    }
                }
            }
            vertex.action = merged;
            if opts.propagation.is_some() {
                vertex.propagation = opts.propagation;
            }
            if let Some(weight) = opts.weight {
                vertex.weight = weight;
            }
            return Ok(());
        }

        let mut vertex = Vertex::new(key, action);
        vertex.observed = observed;
        vertex.desired = desired;
        vertex.propagation = opts.propagation;
        vertex.weight = opts.weight.unwrap_or_default();
        dag.add_connect_root(vertex)?;
        Ok(())
    }

    /// `dependent` must be applied after `dependency`.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound`, `SelfLoopDetected` or `CycleDetected`.
    pub fn depend_on(&self, dag: &mut Dag, dependent: &ObjectKey, dependency: &ObjectKey) -> Result<()> {
        dag.connect(dependent, dependency)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Fails on the first dependency that cannot be connected.
    pub fn depend_on_all<'a, I>(&self, dag: &mut Dag, dependent: &ObjectKey, dependencies: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a ObjectKey>,
    {
        for dependency in dependencies {
            self.depend_on(dag, dependent, dependency)?;
        }
        Ok(())
    }

    pub fn is_action(&self, dag: &Dag, key: &ObjectKey, action: Action) -> bool {
        dag.is_action(key, action)
    }

    /// Staged vertices of a kind, ordered by key.
    pub fn find_all<'d>(&self, dag: &'d Dag, kind: &Kind) -> Vec<&'d Vertex> {
        dag.find_kind(kind)
    }

    /// Read an object, preferring the staged view.
    ///
    /// # Errors
    ///
    /// `NotFound` if the object is staged for deletion, or not staged and
    /// absent from the store.
    pub async fn get(&self, dag: &Dag, key: &ObjectKey) -> Result<Object> {
        if let Some(vertex) = dag.vertex(key) {
            if vertex.is_action(Action::Delete) {
                return Err(keel_core::Error::not_found(key.clone()).into());
            }
            if let Some(obj) = vertex.object() {
                return Ok(obj.clone());
            }
        }
        self.get_live(key).await
    }

    /// List objects with staged writes overlaid on the live set.
    ///
    /// # Errors
    ///
    /// Propagates store errors from the live list.
    pub async fn list(
        &self,
        dag: &Dag,
        kind: &Kind,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<Object>> {
        let mut merged: BTreeMap<ObjectKey, Object> = self
            .list_live(kind, namespace, selector)
            .await?
            .into_iter()
            .map(|o| (o.key(), o))
            .collect();

        for vertex in dag.find_kind(kind) {
            let key = vertex.key();
            if namespace.is_some_and(|ns| key.namespace != ns) {
                continue;
            }
            match vertex.object() {
                _ if vertex.is_action(Action::Delete) => {
                    merged.remove(key);
                }
                Some(obj) if selector.matches(&obj.metadata.labels) => {
                    merged.insert(key.clone(), obj.clone());
                }
                Some(_) => {
                    merged.remove(key);
                }
                None => {}
            }
        }
        Ok(merged.into_values().collect())
    }

    /// Read straight from the store.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn get_live(&self, key: &ObjectKey) -> Result<Object> {
        Ok(self.store.get(key).await?)
    }

    /// List straight from the store.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn list_live(&self, kind: &Kind, namespace: Option<&str>, selector: &LabelSelector) -> Result<Vec<Object>> {
        Ok(self.store.list(kind, namespace, selector).await?)
    }
}

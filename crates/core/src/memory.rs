//! In-memory [`ObjectStore`] used by tests and embedded deployments.
//!
//! Mirrors the semantics the reconciler relies on from a real API server:
//! resource versions, generation bumps on spec change, finalizer-gated
//! deletion and owner-reference garbage collection.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use itertools::Itertools;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Error;
use crate::object::{DeleteOptions, Kind, LabelSelector, Object, ObjectKey, ObjectMeta, PropagationPolicy};
use crate::patch::apply_merge_patch;
use crate::store::ObjectStore;
use crate::Result;

/// Kind of write recorded in the store journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteOp {
    Create,
    Update,
    Patch,
    Delete,
    Status,
}

/// One successful write, in commit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub op: WriteOp,
    pub key: ObjectKey,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, Object>,
    version: u64,
    failures: HashMap<ObjectKey, Error>,
    journal: Vec<WriteRecord>,
}

impl State {
    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    fn take_failure(&mut self, key: &ObjectKey) -> Result<()> {
        self.failures.remove(key).map_or(Ok(()), Err)
    }

    fn record(&mut self, op: WriteOp, key: &ObjectKey) {
        self.journal.push(WriteRecord {
            op,
            key: key.clone(),
        });
    }

    fn stored(&self, key: &ObjectKey) -> Result<&Object> {
        self.objects
            .get(key)
            .ok_or_else(|| Error::not_found(key.clone()))
    }

    /// Store `next` over `prev`, bumping versions. Drops the object when the
    /// last finalizer of a terminating object goes away.
    fn commit(&mut self, prev: &Object, mut next: Object) -> Object {
        preserve_system_fields(&mut next.metadata, &prev.metadata);
        if next.spec != prev.spec {
            next.metadata.generation += 1;
        }
        next.metadata.resource_version = self.next_version();
        let key = next.key();
        if next.is_terminating() && next.metadata.finalizers.is_empty() {
            debug!(key = %key, "last finalizer removed, deleting object");
            self.objects.insert(key.clone(), next.clone());
            self.remove(&key, PropagationPolicy::Background);
        } else {
            self.objects.insert(key, next.clone());
        }
        next
    }

    fn delete(&mut self, key: &ObjectKey, policy: PropagationPolicy) -> Result<()> {
        let version = self.version + 1;
        let obj = self
            .objects
            .get_mut(key)
            .ok_or_else(|| Error::not_found(key.clone()))?;
        if obj.metadata.finalizers.is_empty() {
            self.remove(key, policy);
            return Ok(());
        }
        if obj.metadata.deletion_timestamp.is_none() {
            obj.metadata.deletion_timestamp = Some(Utc::now());
            obj.metadata.resource_version = version;
            self.version = version;
            debug!(key = %key, "object marked terminating");
        }
        if policy == PropagationPolicy::Foreground {
            let uid = obj.metadata.uid.clone();
            self.collect_dependents(&uid, policy);
        }
        Ok(())
    }

    fn remove(&mut self, key: &ObjectKey, policy: PropagationPolicy) {
        let Some(obj) = self.objects.remove(key) else {
            return;
        };
        debug!(key = %key, ?policy, "object removed");
        self.collect_dependents(&obj.metadata.uid, policy);
    }

    fn collect_dependents(&mut self, owner_uid: &str, policy: PropagationPolicy) {
        if owner_uid.is_empty() {
            return;
        }
        let dependents = self
            .objects
            .iter()
            .filter(|(_, o)| o.metadata.owner_references.iter().any(|r| r.uid == owner_uid))
            .map(|(k, _)| k.clone())
            .collect_vec();
        for dependent in dependents {
            if policy == PropagationPolicy::Orphan {
                let version = self.next_version();
                if let Some(obj) = self.objects.get_mut(&dependent) {
                    obj.metadata.owner_references.retain(|r| r.uid != owner_uid);
                    obj.metadata.resource_version = version;
                }
            } else if let Err(err) = self.delete(&dependent, policy) {
                debug!(key = %dependent, error = %err, "dependent already gone");
            }
        }
    }
}

fn preserve_system_fields(next: &mut ObjectMeta, prev: &ObjectMeta) {
    next.name.clone_from(&prev.name);
    next.namespace.clone_from(&prev.namespace);
    next.uid.clone_from(&prev.uid);
    next.generation = prev.generation;
    next.creation_timestamp = prev.creation_timestamp;
    next.deletion_timestamp = prev.deletion_timestamp;
}

fn take_field(doc: &mut Value, field: &str) -> Value {
    doc.get_mut(field).map(Value::take).unwrap_or_default()
}

fn check_version(key: &ObjectKey, requested: u64, stored: u64) -> Result<()> {
    if requested != 0 && requested != stored {
        return Err(Error::conflict(key.clone(), requested, stored));
    }
    Ok(())
}

/// In-memory object store.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `f` directly to a stored object, bypassing the write contract.
    ///
    /// Stands in for other controllers acting on objects (for example a
    /// component controller publishing status).
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the object does not exist.
    pub async fn mutate<F>(&self, key: &ObjectKey, f: F) -> Result<Object>
    where
        F: FnOnce(&mut Object) + Send,
    {
        let mut state = self.state.write().await;
        let prev = state.stored(key)?.clone();
        let mut next = prev.clone();
        f(&mut next);
        if next.spec != prev.spec {
            next.metadata.generation = prev.metadata.generation + 1;
        }
        next.metadata.resource_version = state.next_version();
        state.objects.insert(key.clone(), next.clone());
        Ok(next)
    }

    /// Make the next write to `key` fail with `err`.
    pub async fn fail_next_write(&self, key: ObjectKey, err: Error) {
        self.state.write().await.failures.insert(key, err);
    }

    /// All successful writes since creation or the last [`Self::clear_journal`].
    pub async fn journal(&self) -> Vec<WriteRecord> {
        self.state.read().await.journal.clone()
    }

    pub async fn clear_journal(&self) {
        self.state.write().await.journal.clear();
    }

    pub async fn contains(&self, key: &ObjectKey) -> bool {
        self.state.read().await.objects.contains_key(key)
    }

    /// Snapshot of every stored object, ordered by key.
    pub async fn snapshot(&self) -> Vec<Object> {
        self.state.read().await.objects.values().cloned().collect_vec()
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Object> {
        self.state.read().await.stored(key).cloned()
    }

    async fn list(
        &self,
        kind: &Kind,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<Object>> {
        Ok(self
            .state
            .read()
            .await
            .objects
            .values()
            .filter(|o| &o.kind == kind)
            .filter(|o| namespace.map_or(true, |ns| o.metadata.namespace == ns))
            .filter(|o| selector.matches(&o.metadata.labels))
            .cloned()
            .collect_vec())
    }

    async fn create(&self, mut obj: Object) -> Result<Object> {
        let key = obj.key();
        let mut state = self.state.write().await;
        state.take_failure(&key)?;
        if state.objects.contains_key(&key) {
            return Err(Error::already_exists(key));
        }
        if obj.metadata.name.is_empty() {
            return Err(Error::invalid_object("name must not be empty"));
        }
        obj.metadata.uid = uuid::Uuid::new_v4().to_string();
        obj.metadata.generation = 1;
        obj.metadata.resource_version = state.next_version();
        obj.metadata.creation_timestamp = Some(Utc::now());
        obj.metadata.deletion_timestamp = None;
        debug!(key = %key, "object created");
        state.objects.insert(key.clone(), obj.clone());
        state.record(WriteOp::Create, &key);
        Ok(obj)
    }

    async fn update(&self, obj: Object) -> Result<Object> {
        let key = obj.key();
        let mut state = self.state.write().await;
        state.take_failure(&key)?;
        let prev = state.stored(&key)?.clone();
        check_version(&key, obj.metadata.resource_version, prev.metadata.resource_version)?;
        let next = Object {
            status: prev.status.clone(),
            ..obj
        };
        let stored = state.commit(&prev, next);
        state.record(WriteOp::Update, &key);
        Ok(stored)
    }

    async fn patch(&self, key: &ObjectKey, patch: &Value) -> Result<Object> {
        let mut state = self.state.write().await;
        state.take_failure(key)?;
        let prev = state.stored(key)?.clone();
        let mut doc = json!({
            "metadata": serde_json::to_value(&prev.metadata)?,
            "spec": prev.spec.clone(),
        });
        apply_merge_patch(&mut doc, patch);
        let metadata: ObjectMeta = serde_json::from_value(take_field(&mut doc, "metadata"))?;
        let next = Object {
            kind: prev.kind.clone(),
            metadata,
            spec: take_field(&mut doc, "spec"),
            status: prev.status.clone(),
        };
        let stored = state.commit(&prev, next);
        state.record(WriteOp::Patch, key);
        Ok(stored)
    }

    async fn delete(&self, key: &ObjectKey, options: DeleteOptions) -> Result<()> {
        let mut state = self.state.write().await;
        state.take_failure(key)?;
        state.delete(key, options.propagation)?;
        state.record(WriteOp::Delete, key);
        Ok(())
    }

    async fn update_status(&self, obj: Object) -> Result<Object> {
        let key = obj.key();
        let mut state = self.state.write().await;
        state.take_failure(&key)?;
        let prev = state.stored(&key)?.clone();
        check_version(&key, obj.metadata.resource_version, prev.metadata.resource_version)?;
        let mut next = prev;
        next.status = obj.status;
        next.metadata.resource_version = state.next_version();
        state.objects.insert(key.clone(), next.clone());
        state.record(WriteOp::Status, &key);
        Ok(next)
    }

    async fn patch_status(&self, key: &ObjectKey, patch: &Value) -> Result<Object> {
        let mut state = self.state.write().await;
        state.take_failure(key)?;
        let mut next = state.stored(key)?.clone();
        apply_merge_patch(&mut next.status, patch);
        next.metadata.resource_version = state.next_version();
        state.objects.insert(key.clone(), next.clone());
        state.record(WriteOp::Status, key);
        Ok(next)
    }
}

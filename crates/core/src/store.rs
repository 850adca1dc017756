//! Backing-store contract.

use async_trait::async_trait;
use serde_json::Value;

use crate::object::{DeleteOptions, Kind, LabelSelector, Object, ObjectKey};
use crate::Result;

/// Trait for backing stores holding live objects.
///
/// Implementations report missing objects as `Error::NotFound`, duplicate
/// creates as `Error::AlreadyExists` and stale `resource_version`s as
/// `Error::Conflict`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Load an object by key.
    async fn get(&self, key: &ObjectKey) -> Result<Object>;

    /// List objects of a kind. `None` lists across all namespaces.
    async fn list(
        &self,
        kind: &Kind,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<Object>>;

    /// Create an object. Store-owned metadata is assigned by the store.
    async fn create(&self, obj: Object) -> Result<Object>;

    /// Replace metadata and spec. Status is left untouched.
    async fn update(&self, obj: Object) -> Result<Object>;

    /// Apply a merge patch to `{"metadata": .., "spec": ..}`.
    async fn patch(&self, key: &ObjectKey, patch: &Value) -> Result<Object>;

    /// Request deletion. Objects with finalizers only become terminating.
    async fn delete(&self, key: &ObjectKey, options: DeleteOptions) -> Result<()>;

    /// Replace the status document.
    async fn update_status(&self, obj: Object) -> Result<Object>;

    /// Apply a merge patch to the status document.
    async fn patch_status(&self, key: &ObjectKey, patch: &Value) -> Result<Object>;
}

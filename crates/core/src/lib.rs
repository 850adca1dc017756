//! # keel-core
//!
//! Object model and backing-store contract for the keel reconciliation engine.
//!
//! - [`object`]: untyped objects, keys, metadata, owner references
//! - [`resource`]: typed views over objects
//! - [`store`]: the async [`ObjectStore`] trait
//! - [`memory`]: an in-memory store with finalizer and garbage-collection semantics
//! - [`patch`]: JSON merge patch helpers

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod error;
pub mod memory;
pub mod object;
pub mod patch;
pub mod resource;
pub mod result;
pub mod store;

pub use error::Error;
pub use memory::{InMemoryStore, WriteOp, WriteRecord};
pub use object::{
    DeleteOptions, Kind, LabelSelector, Object, ObjectKey, ObjectMeta, OwnerReference,
    PropagationPolicy,
};
pub use patch::{apply_merge_patch, merge_diff};
pub use resource::{Resource, ResourceSpec};
pub use result::{Result, StoreResultExt};
pub use store::ObjectStore;

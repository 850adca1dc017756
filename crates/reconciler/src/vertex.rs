//! One staged operation on one object identity.

use std::fmt;

use keel_core::{Object, ObjectKey, PropagationPolicy};
use serde::{Deserialize, Serialize};

/// What the executor will do with a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Create,
    Update,
    Patch,
    Delete,
    /// Status-only write. The root vertex carries this by default.
    Status,
    Noop,
}

impl Action {
    /// Combine a previously staged action with a new one for the same object.
    ///
    /// The kind of the existing action wins unless the new one changes what
    /// must happen to the live object: a delete cancels a pending create, and
    /// a write after a staged delete turns into an update.
    #[must_use]
    pub const fn merge(self, next: Self) -> Self {
        match (self, next) {
            (Self::Noop, next) => next,
            (existing, Self::Noop) => existing,
            (Self::Create, Self::Delete) => Self::Noop,
            (Self::Create, _) => Self::Create,
            (Self::Update | Self::Patch, Self::Delete) => Self::Delete,
            (existing @ (Self::Update | Self::Patch), _) => existing,
            (Self::Status, Self::Create | Self::Update) => Self::Update,
            (Self::Status, Self::Patch) => Self::Patch,
            (Self::Status, Self::Delete) => Self::Delete,
            (Self::Status, Self::Status) => Self::Status,
            (Self::Delete, Self::Create | Self::Update | Self::Patch) => Self::Update,
            (Self::Delete, _) => Self::Delete,
        }
    }

    /// True for actions that write the object itself (not only its status).
    pub const fn mutates_object(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Patch | Self::Delete)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Status => "STATUS",
            Self::Noop => "NOOP",
        };
        f.write_str(name)
    }
}

/// An intended operation on an object.
///
/// `desired` is `None` for deletes; `observed` is the last known live copy and
/// the base for merge patches.
#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    key: ObjectKey,
    pub desired: Option<Object>,
    pub observed: Option<Object>,
    pub action: Action,
    pub propagation: Option<PropagationPolicy>,
    /// Tie-breaker among vertices with no ordering relation; lower goes first.
    pub weight: i32,
}

impl Vertex {
    pub fn new(key: ObjectKey, action: Action) -> Self {
        Self {
            key,
            desired: None,
            observed: None,
            action,
            propagation: None,
            weight: 0,
        }
    }

    /// Vertex for the primary object: observed and desired both start as the
    /// live copy and the action is a status write.
    pub fn root(primary: Object) -> Self {
        Self {
            key: primary.key(),
            desired: Some(primary.clone()),
            observed: Some(primary),
            action: Action::Status,
            propagation: None,
            weight: 0,
        }
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub fn is_action(&self, action: Action) -> bool {
        self.action == action
    }

    /// The most current view of the object: desired if staged, else observed.
    pub fn object(&self) -> Option<&Object> {
        self.desired.as_ref().or(self.observed.as_ref())
    }
}

impl fmt::Display for Vertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Action; 6] = [
        Action::Create,
        Action::Update,
        Action::Patch,
        Action::Delete,
        Action::Status,
        Action::Noop,
    ];

    #[test]
    fn test_delete_cancels_create() {
        assert_eq!(Action::Create.merge(Action::Delete), Action::Noop);
    }

    #[test]
    fn test_create_kind_is_preserved() {
        for next in [Action::Create, Action::Update, Action::Patch, Action::Status] {
            assert_eq!(Action::Create.merge(next), Action::Create);
        }
    }

    #[test]
    fn test_write_after_delete_becomes_update() {
        assert_eq!(Action::Delete.merge(Action::Create), Action::Update);
        assert_eq!(Action::Delete.merge(Action::Patch), Action::Update);
        assert_eq!(Action::Delete.merge(Action::Status), Action::Delete);
    }

    #[test]
    fn test_status_upgrades_to_object_write() {
        assert_eq!(Action::Status.merge(Action::Update), Action::Update);
        assert_eq!(Action::Status.merge(Action::Patch), Action::Patch);
        assert_eq!(Action::Status.merge(Action::Delete), Action::Delete);
    }

    #[test]
    fn test_noop_is_identity() {
        for action in ALL {
            assert_eq!(Action::Noop.merge(action), action);
            assert_eq!(action.merge(Action::Noop), action);
        }
    }

    #[test]
    fn test_merge_is_idempotent_on_equal_actions() {
        for action in ALL {
            assert_eq!(action.merge(action), action);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(Action::Status.to_string(), "STATUS");
    }
}

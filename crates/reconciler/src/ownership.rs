//! Ownership wiring between a primary object and what it creates.

use keel_core::{Kind, LabelSelector, Object};

use crate::error::{Error, Result};

/// How a controller marks, finds and protects the objects it owns.
pub trait OwnershipPolicy: Send + Sync {
    /// Finalizer placed on primaries and stripped before their deletion.
    fn finalizer(&self) -> &str;

    /// Kinds a primary may own; checked before the primary is removed.
    fn owned_kinds(&self) -> &[Kind];

    /// Selector matching every object owned by `owner`.
    fn owner_selector(&self, owner: &Object) -> LabelSelector;

    /// Mark `obj` as owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when another controller already owns `obj`.
    fn adopt(&self, owner: &Object, obj: &mut Object) -> Result<()>;
}

/// Owner reference plus an instance label naming the owner.
#[derive(Debug, Clone)]
pub struct ControllerOwnership {
    finalizer: String,
    owned_kinds: Vec<Kind>,
    instance_label: String,
}

impl ControllerOwnership {
    pub fn new(finalizer: impl Into<String>, instance_label: impl Into<String>) -> Self {
        Self {
            finalizer: finalizer.into(),
            owned_kinds: Vec::new(),
            instance_label: instance_label.into(),
        }
    }

    #[must_use]
    pub fn owning(mut self, kind: Kind) -> Self {
        if !self.owned_kinds.contains(&kind) {
            self.owned_kinds.push(kind);
        }
        self
    }

    pub fn instance_label(&self) -> &str {
        &self.instance_label
    }
}

impl OwnershipPolicy for ControllerOwnership {
    fn finalizer(&self) -> &str {
        &self.finalizer
    }

    fn owned_kinds(&self) -> &[Kind] {
        &self.owned_kinds
    }

    fn owner_selector(&self, owner: &Object) -> LabelSelector {
        LabelSelector::from_labels([(self.instance_label.clone(), owner.name().to_string())])
    }

    fn adopt(&self, owner: &Object, obj: &mut Object) -> Result<()> {
        if !obj.set_controller(owner) {
            return Err(Error::validation(format!(
                "{} is controlled by another owner",
                obj.key()
            )));
        }
        obj.metadata
            .labels
            .insert(self.instance_label.clone(), owner.name().to_string());
        Ok(())
    }
}

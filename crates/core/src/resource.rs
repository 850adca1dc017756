//! Typed views over [`Object`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;
use crate::object::{Kind, Object, ObjectMeta};
use crate::Result;

/// A spec type that names the kind it belongs to.
pub trait ResourceSpec: Serialize + DeserializeOwned + Default + Clone + Send + Sync {
    /// Status document paired with this spec.
    type Status: Serialize + DeserializeOwned + Default + Clone + Send + Sync;

    fn kind() -> Kind;
}

/// Strongly typed object: metadata plus typed spec and status.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource<S: ResourceSpec> {
    pub metadata: ObjectMeta,
    pub spec: S,
    pub status: S::Status,
}

impl<S: ResourceSpec> Resource<S> {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: S) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.into(),
                namespace: namespace.into(),
                ..ObjectMeta::default()
            },
            spec,
            status: S::Status::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    /// Decode a typed view; absent spec or status decode to their defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidObject` on a kind mismatch and `Serialization` when a
    /// document does not match the typed shape.
    pub fn from_object(obj: &Object) -> Result<Self> {
        let expected = S::kind();
        if obj.kind != expected {
            return Err(Error::invalid_object(format!(
                "expected kind {expected}, found {}",
                obj.kind
            )));
        }
        Ok(Self {
            metadata: obj.metadata.clone(),
            spec: decode_or_default(&obj.spec)?,
            status: decode_or_default(&obj.status)?,
        })
    }

    /// Encode back into an untyped object.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if spec or status cannot be encoded.
    pub fn to_object(&self) -> Result<Object> {
        Ok(Object {
            kind: S::kind(),
            metadata: self.metadata.clone(),
            spec: serde_json::to_value(&self.spec)?,
            status: serde_json::to_value(&self.status)?,
        })
    }
}

fn decode_or_default<T: DeserializeOwned + Default>(value: &Value) -> Result<T> {
    if value.is_null() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(value.clone())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct WidgetSpec {
        size: u32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct WidgetStatus {
        ready: bool,
    }

    impl ResourceSpec for WidgetSpec {
        type Status = WidgetStatus;

        fn kind() -> Kind {
            Kind::new("test.keel.io", "Widget")
        }
    }

    #[test]
    fn given_object_without_status_when_decoded_then_status_defaults() {
        let obj = Object::new(WidgetSpec::kind(), "ns", "w")
            .with_spec(serde_json::json!({"size": 4}));
        let typed = Resource::<WidgetSpec>::from_object(&obj);
        assert!(matches!(
            typed,
            Ok(ref r) if r.spec.size == 4 && !r.status.ready
        ));
    }

    #[test]
    fn given_wrong_kind_when_decoded_then_invalid_object() {
        let obj = Object::new(Kind::new("other", "Thing"), "ns", "w");
        let typed = Resource::<WidgetSpec>::from_object(&obj);
        assert!(matches!(typed, Err(Error::InvalidObject { .. })));
    }

    #[test]
    fn given_typed_resource_when_encoded_then_kind_and_spec_are_set() {
        let resource = Resource::new("ns", "w", WidgetSpec { size: 2 });
        let obj = resource.to_object();
        assert!(matches!(
            obj,
            Ok(ref o) if o.kind == WidgetSpec::kind() && o.spec == serde_json::json!({"size": 2})
        ));
    }
}

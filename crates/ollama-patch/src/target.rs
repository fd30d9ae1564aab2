//! Manifest shapes the engine can patch
//!
//! A shape is either typed (a concrete k8s-openapi struct whose fields are
//! validated after merging) or free-form (an attribute tree accepted as-is).
//! Typed shapes expose a [`TypeTag`] used to look up their strategic merge
//! keys in the [`crate::strategic`] registry.

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use kube::api::DynamicObject;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{PatchError, PatchStage};

/// Identity of a typed manifest shape (`apiVersion` + `kind`)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypeTag {
    /// e.g. `apps/v1`
    pub api_version: &'static str,
    /// e.g. `StatefulSet`
    pub kind: &'static str,
}

impl TypeTag {
    /// Tag for a k8s-openapi resource type
    pub fn of<K: k8s_openapi::Resource>() -> Self {
        Self {
            api_version: K::API_VERSION,
            kind: K::KIND,
        }
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.api_version, self.kind)
    }
}

/// A manifest shape accepted by [`crate::apply`]
pub trait PatchTarget: Serialize + DeserializeOwned {
    /// Registry tag for typed shapes, `None` for free-form attribute trees
    fn type_tag() -> Option<TypeTag>;

    /// Whether merged documents are checked for fields the shape does not know
    fn validates_fields() -> bool {
        Self::type_tag().is_some()
    }

    /// Rust type name, used in error messages
    fn shape_name() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Canonical document form
    fn to_document(&self) -> Result<Value, PatchError> {
        serde_json::to_value(self).map_err(|source| PatchError::Encode {
            shape: Self::shape_name(),
            source,
        })
    }

    /// Decode a document back into this shape
    ///
    /// Typed shapes accept numeric resource quantities (`"nvidia.com/gpu": 1`)
    /// the way the API server does.
    fn from_document(mut doc: Value, stage: PatchStage) -> Result<Self, PatchError> {
        if Self::type_tag().is_some() {
            quantities_to_strings(&mut doc);
        }
        serde_json::from_value(doc).map_err(|e| {
            PatchError::decode(
                stage,
                format!("unable to decode result into {}: {}", Self::shape_name(), e),
            )
        })
    }
}

/// Rewrite numeric values under every `resources.{limits,requests}` as strings
fn quantities_to_strings(doc: &mut Value) {
    match doc {
        Value::Object(fields) => {
            for (key, value) in fields.iter_mut() {
                if key == "resources" {
                    if let Value::Object(resources) = value {
                        for list in ["limits", "requests"] {
                            if let Some(Value::Object(amounts)) = resources.get_mut(list) {
                                for amount in amounts.values_mut() {
                                    if let Value::Number(n) = amount {
                                        *amount = Value::String(n.to_string());
                                    }
                                }
                            }
                        }
                    }
                }
                quantities_to_strings(value);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(quantities_to_strings),
        _ => {}
    }
}

macro_rules! typed_targets {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl PatchTarget for $ty {
                fn type_tag() -> Option<TypeTag> {
                    Some(TypeTag::of::<$ty>())
                }
            }
        )+
    };
}

typed_targets!(StatefulSet, Deployment, Service, Pod, ConfigMap);

impl PatchTarget for Value {
    fn type_tag() -> Option<TypeTag> {
        None
    }
}

impl PatchTarget for DynamicObject {
    fn type_tag() -> Option<TypeTag> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_shapes_carry_their_group_version_kind() {
        let tag = StatefulSet::type_tag().unwrap();
        assert_eq!(tag.api_version, "apps/v1");
        assert_eq!(tag.kind, "StatefulSet");
        assert_eq!(tag.to_string(), "apps/v1/StatefulSet");
        assert!(StatefulSet::validates_fields());
    }

    #[test]
    fn numeric_quantities_decode_on_typed_shapes() {
        let doc = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "p"},
            "spec": {
                "containers": [{
                    "name": "ollama",
                    "resources": {"limits": {"nvidia.com/gpu": 1, "cpu": 0.5}, "requests": {"memory": "1Gi"}},
                }],
            },
        });

        let pod = Pod::from_document(doc.clone(), PatchStage::Merge).unwrap();
        let resources = pod.spec.unwrap().containers[0].resources.clone().unwrap();
        let limits = resources.limits.unwrap();
        assert_eq!(limits["nvidia.com/gpu"].0, "1");
        assert_eq!(limits["cpu"].0, "0.5");
        assert_eq!(resources.requests.unwrap()["memory"].0, "1Gi");

        let free_form = Value::from_document(doc, PatchStage::Merge).unwrap();
        assert_eq!(free_form["spec"]["containers"][0]["resources"]["limits"]["nvidia.com/gpu"], 1);
    }

    #[test]
    fn free_form_shapes_skip_validation() {
        assert!(Value::type_tag().is_none());
        assert!(!Value::validates_fields());
        assert!(!DynamicObject::validates_fields());
    }
}

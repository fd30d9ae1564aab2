//! Strategic merge patch
//!
//! Lists are merged element-wise by a declared merge key instead of being
//! replaced wholesale. Merge keys are looked up in an explicit registry keyed
//! by [`TypeTag`]; shapes without an entry are rejected.
//!
//! Supported directives:
//! - `$patch: replace` on a map replaces it, as a list element replaces the list
//! - `$patch: delete` on a map removes it, on a keyed list element removes the match
//! - `$retainKeys: [..]` drops every key of the merged map not listed
//! - `null` removes a map key

use std::collections::HashMap;
use std::sync::LazyLock;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use serde_json::{Map, Value};

use crate::error::{PatchError, PatchStage};
use crate::target::{PatchTarget, TypeTag};

const PATCH_DIRECTIVE: &str = "$patch";
const RETAIN_KEYS_DIRECTIVE: &str = "$retainKeys";
const SET_ELEMENT_ORDER_PREFIX: &str = "$setElementOrder/";

static REGISTRY: LazyLock<StrategicMergeRegistry> = LazyLock::new(StrategicMergeRegistry::builtin);

/// Merge keys for the list fields of one shape, by dotted field path
#[derive(Debug, Default)]
pub struct MergeKeys {
    keys: HashMap<String, &'static str>,
}

impl MergeKeys {
    fn with(mut self, path: impl Into<String>, key: &'static str) -> Self {
        self.keys.insert(path.into(), key);
        self
    }

    fn with_object_meta(self) -> Self {
        self.with("metadata.ownerReferences", "uid")
    }

    fn with_pod_spec(mut self, prefix: &str) -> Self {
        for list in ["containers", "initContainers", "ephemeralContainers"] {
            let base = format!("{prefix}.{list}");
            self = self
                .with(base.clone(), "name")
                .with(format!("{base}.ports"), "containerPort")
                .with(format!("{base}.env"), "name")
                .with(format!("{base}.volumeMounts"), "mountPath")
                .with(format!("{base}.volumeDevices"), "devicePath");
        }
        self.with(format!("{prefix}.volumes"), "name")
            .with(format!("{prefix}.imagePullSecrets"), "name")
            .with(format!("{prefix}.hostAliases"), "ip")
    }

    /// Merge key for the list at `path`, if it is merged by key
    pub fn key_for(&self, path: &str) -> Option<&'static str> {
        self.keys.get(path).copied()
    }
}

/// Type tag → merge-key table
#[derive(Debug, Default)]
pub struct StrategicMergeRegistry {
    entries: HashMap<TypeTag, MergeKeys>,
}

impl StrategicMergeRegistry {
    /// Registry with the shapes the operator generates or commonly patches
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.register(
            TypeTag::of::<StatefulSet>(),
            MergeKeys::default()
                .with_object_meta()
                .with_pod_spec("spec.template.spec")
                .with("spec.template.metadata.ownerReferences", "uid"),
        );
        registry.register(
            TypeTag::of::<Deployment>(),
            MergeKeys::default()
                .with_object_meta()
                .with_pod_spec("spec.template.spec"),
        );
        registry.register(
            TypeTag::of::<Pod>(),
            MergeKeys::default().with_object_meta().with_pod_spec("spec"),
        );
        registry.register(
            TypeTag::of::<Service>(),
            MergeKeys::default()
                .with_object_meta()
                .with("spec.ports", "port"),
        );
        registry.register(TypeTag::of::<ConfigMap>(), MergeKeys::default().with_object_meta());
        registry
    }

    /// Register (or replace) the merge keys for a shape
    pub fn register(&mut self, tag: TypeTag, keys: MergeKeys) {
        self.entries.insert(tag, keys);
    }

    /// Merge keys for a shape
    pub fn get(&self, tag: &TypeTag) -> Option<&MergeKeys> {
        self.entries.get(tag)
    }
}

/// Strategic-merge `patch` into `doc`, which must be the document form of `T`
pub(crate) fn apply<T: PatchTarget>(doc: &mut Value, patch: &Value) -> Result<(), PatchError> {
    let keys = T::type_tag()
        .and_then(|tag| REGISTRY.get(&tag))
        .ok_or(PatchError::UnsupportedTarget {
            shape: T::shape_name(),
        })?;

    let Value::Object(patch) = patch else {
        return Err(PatchError::decode(
            PatchStage::Strategic,
            "patch body must be an object",
        ));
    };
    let Value::Object(base) = doc else {
        return Err(PatchError::apply(
            PatchStage::Strategic,
            "base document is not an object",
        ));
    };

    merge_map(base, patch, &mut Vec::new(), keys)
}

fn merge_map(
    base: &mut Map<String, Value>,
    patch: &Map<String, Value>,
    path: &mut Vec<String>,
    keys: &MergeKeys,
) -> Result<(), PatchError> {
    match patch.get(PATCH_DIRECTIVE).and_then(Value::as_str) {
        Some("replace") => {
            *base = strip_directives_map(patch);
            return Ok(());
        }
        Some("merge") | None => {}
        Some(other) => {
            return Err(PatchError::decode(
                PatchStage::Strategic,
                format!("unknown $patch directive {other:?} at {}", display_path(path)),
            ))
        }
    }

    for (field, value) in patch {
        if field.starts_with('$') {
            continue;
        }
        path.push(field.clone());
        match value {
            Value::Null => {
                base.remove(field);
            }
            Value::Object(child) if is_delete(child) => {
                base.remove(field);
            }
            Value::Object(child) => match base.get_mut(field) {
                Some(Value::Object(existing)) => merge_map(existing, child, path, keys)?,
                _ => {
                    base.insert(field.clone(), Value::Object(strip_directives_map(child)));
                }
            },
            Value::Array(items) => {
                let merge_key = keys.key_for(&path.join("."));
                match (merge_key, base.get_mut(field)) {
                    (Some(key), Some(Value::Array(existing))) => {
                        merge_list(existing, items, key, path, keys)?
                    }
                    _ if !items.is_empty() && items.iter().all(is_delete_item) => {}
                    _ => {
                        base.insert(field.clone(), Value::Array(strip_directives_list(items)));
                    }
                }
            }
            scalar => {
                base.insert(field.clone(), scalar.clone());
            }
        }
        path.pop();
    }

    if let Some(retain) = patch.get(RETAIN_KEYS_DIRECTIVE) {
        let Value::Array(retained) = retain else {
            return Err(PatchError::decode(
                PatchStage::Strategic,
                format!("$retainKeys at {} must be a list", display_path(path)),
            ));
        };
        let retained: Vec<&str> = retained.iter().filter_map(Value::as_str).collect();
        base.retain(|k, _| retained.contains(&k.as_str()));
    }

    Ok(())
}

fn merge_list(
    base: &mut Vec<Value>,
    patch: &[Value],
    key: &'static str,
    path: &mut Vec<String>,
    keys: &MergeKeys,
) -> Result<(), PatchError> {
    let replaces = patch.iter().any(|item| {
        item.as_object()
            .is_some_and(|m| m.get(PATCH_DIRECTIVE).and_then(Value::as_str) == Some("replace"))
    });
    if replaces {
        *base = patch
            .iter()
            .filter(|item| !is_directive_only(item))
            .map(strip_directives)
            .collect();
        return Ok(());
    }

    for item in patch {
        let Some(fields) = item.as_object() else {
            if !base.contains(item) {
                base.push(item.clone());
            }
            continue;
        };
        let Some(id) = fields.get(key) else {
            return Err(PatchError::decode(
                PatchStage::Strategic,
                format!(
                    "list item at {} is missing merge key {key:?}",
                    display_path(path)
                ),
            ));
        };

        let position = base
            .iter()
            .position(|existing| existing.get(key) == Some(id));

        match (position, is_delete(fields)) {
            (Some(idx), true) => {
                base.remove(idx);
            }
            (None, true) => {}
            (Some(idx), false) => match &mut base[idx] {
                Value::Object(existing) => merge_map(existing, fields, path, keys)?,
                other => *other = strip_directives(item),
            },
            (None, false) => base.push(strip_directives(item)),
        }
    }
    Ok(())
}

fn is_delete(map: &Map<String, Value>) -> bool {
    map.get(PATCH_DIRECTIVE).and_then(Value::as_str) == Some("delete")
}

fn is_directive_only(item: &Value) -> bool {
    item.as_object()
        .is_some_and(|m| m.keys().all(|k| k.starts_with('$')))
}

fn strip_directives(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(strip_directives_map(map)),
        Value::Array(items) => Value::Array(strip_directives_list(items)),
        other => other.clone(),
    }
}

fn strip_directives_map(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .filter(|(k, _)| {
            k.as_str() != PATCH_DIRECTIVE
                && k.as_str() != RETAIN_KEYS_DIRECTIVE
                && !k.starts_with(SET_ELEMENT_ORDER_PREFIX)
        })
        .filter(|(_, v)| !v.is_null() && !is_delete_item(v))
        .map(|(k, v)| (k.clone(), strip_directives(v)))
        .collect()
}

fn strip_directives_list(items: &[Value]) -> Vec<Value> {
    items
        .iter()
        .filter(|item| !is_directive_only(item) && !is_delete_item(item))
        .map(strip_directives)
        .collect()
}

/// Delete directives against absent fields have nothing to remove
fn is_delete_item(value: &Value) -> bool {
    value.as_object().is_some_and(is_delete)
}

fn display_path(path: &[String]) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.join(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod() -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "p"},
            "spec": {
                "containers": [
                    {"name": "app", "image": "app:1", "env": [{"name": "A", "value": "1"}]},
                    {"name": "sidecar", "image": "proxy:1"},
                ],
                "tolerations": [{"key": "a"}],
            }
        })
    }

    #[test]
    fn containers_merge_by_name() {
        let mut doc = pod();
        apply::<Pod>(
            &mut doc,
            &json!({"spec": {"containers": [{"name": "app", "image": "app:2"}]}}),
        )
        .unwrap();

        let containers = doc["spec"]["containers"].as_array().unwrap();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0]["image"], "app:2");
        assert_eq!(containers[0]["env"][0]["value"], "1");
        assert_eq!(containers[1]["name"], "sidecar");
    }

    #[test]
    fn nested_env_merges_by_name_and_appends_new_entries() {
        let mut doc = pod();
        apply::<Pod>(
            &mut doc,
            &json!({"spec": {"containers": [{
                "name": "app",
                "env": [{"name": "A", "value": "2"}, {"name": "B", "value": "3"}],
            }]}}),
        )
        .unwrap();

        let env = &doc["spec"]["containers"][0]["env"];
        assert_eq!(
            env,
            &json!([{"name": "A", "value": "2"}, {"name": "B", "value": "3"}])
        );
    }

    #[test]
    fn delete_directive_removes_keyed_item() {
        let mut doc = pod();
        apply::<Pod>(
            &mut doc,
            &json!({"spec": {"containers": [{"name": "sidecar", "$patch": "delete"}]}}),
        )
        .unwrap();
        assert_eq!(doc["spec"]["containers"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn delete_directive_against_absent_list_adds_nothing() {
        let mut doc = pod();
        apply::<Pod>(
            &mut doc,
            &json!({"spec": {
                "initContainers": [{"name": "setup", "$patch": "delete"}],
                "volumes": [
                    {"name": "scratch", "$patch": "delete"},
                    {"name": "data", "emptyDir": {}},
                ],
            }}),
        )
        .unwrap();
        assert!(doc["spec"].get("initContainers").is_none());
        assert_eq!(doc["spec"]["volumes"], json!([{"name": "data", "emptyDir": {}}]));
    }

    #[test]
    fn delete_directive_inside_new_map_is_dropped() {
        let mut doc = pod();
        apply::<Pod>(
            &mut doc,
            &json!({"spec": {"securityContext": {
                "runAsUser": 1000,
                "seLinuxOptions": {"$patch": "delete"},
            }}}),
        )
        .unwrap();
        assert_eq!(doc["spec"]["securityContext"], json!({"runAsUser": 1000}));
    }

    #[test]
    fn replace_directive_replaces_whole_list() {
        let mut doc = pod();
        apply::<Pod>(
            &mut doc,
            &json!({"spec": {"containers": [{"$patch": "replace"}, {"name": "only", "image": "x"}]}}),
        )
        .unwrap();
        assert_eq!(
            doc["spec"]["containers"],
            json!([{"name": "only", "image": "x"}])
        );
    }

    #[test]
    fn lists_without_merge_key_are_replaced() {
        let mut doc = pod();
        apply::<Pod>(&mut doc, &json!({"spec": {"tolerations": [{"key": "b"}]}})).unwrap();
        assert_eq!(doc["spec"]["tolerations"], json!([{"key": "b"}]));
    }

    #[test]
    fn service_ports_merge_by_port() {
        let mut doc = json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": "s"},
            "spec": {"ports": [{"name": "http-api", "port": 11434}]},
        });
        apply::<Service>(
            &mut doc,
            &json!({"spec": {"ports": [{"port": 11434, "nodePort": 30000}, {"name": "metrics", "port": 9090}]}}),
        )
        .unwrap();
        assert_eq!(
            doc["spec"]["ports"],
            json!([
                {"name": "http-api", "port": 11434, "nodePort": 30000},
                {"name": "metrics", "port": 9090},
            ])
        );
    }

    #[test]
    fn retain_keys_drops_unlisted_fields() {
        let mut doc = json!({"spec": {"strategy": {"type": "RollingUpdate", "rollingUpdate": {"maxSurge": 1}}}});
        apply::<Deployment>(
            &mut doc,
            &json!({"spec": {"strategy": {"$retainKeys": ["type"], "type": "Recreate"}}}),
        )
        .unwrap();
        assert_eq!(doc["spec"]["strategy"], json!({"type": "Recreate"}));
    }

    #[test]
    fn keyed_item_without_merge_key_is_rejected() {
        let mut doc = pod();
        let err = apply::<Pod>(
            &mut doc,
            &json!({"spec": {"containers": [{"image": "x"}]}}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("missing merge key \"name\""));
    }

    #[test]
    fn free_form_targets_are_unsupported() {
        let mut doc = json!({});
        let err = apply::<Value>(&mut doc, &json!({})).unwrap_err();
        assert!(matches!(err, PatchError::UnsupportedTarget { .. }));
    }

    #[test]
    fn unknown_directive_is_rejected() {
        let mut doc = pod();
        let err = apply::<Pod>(&mut doc, &json!({"spec": {"$patch": "explode"}})).unwrap_err();
        assert!(err.to_string().contains("unknown $patch directive"));
    }
}

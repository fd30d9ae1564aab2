//! Patch engine for generated child manifests
//!
//! Users customize the manifests the operator renders without forking them by
//! attaching a [`Patches`] triple to their resource. [`apply`] runs the three
//! bodies in a fixed order:
//!
//! 1. merge patch (RFC 7386), with unknown-field validation for typed shapes
//! 2. JSON patch (RFC 6902), with parent creation on `add`
//! 3. strategic merge patch, for shapes registered in [`strategic`]
//!
//! The transform is pure and deterministic.

#![deny(missing_docs)]

mod error;
mod json;
mod merge;
pub mod strategic;
mod target;
mod wire;

pub use error::{PatchError, PatchStage};
pub use target::{PatchTarget, TypeTag};
pub use wire::{JsonPatchOp, JsonPatchOperation, Patches};

use tracing::trace;

/// Apply `patches` to `base`.
///
/// `None` returns `base` unchanged. Otherwise each present body is applied in
/// merge → JSON → strategic order, and the result is decoded back into `T`.
pub fn apply<T: PatchTarget>(base: T, patches: Option<&Patches>) -> Result<T, PatchError> {
    let Some(patches) = patches else {
        return Ok(base);
    };
    if patches.is_empty() {
        return Ok(base);
    }

    let mut doc = base.to_document()?;
    let mut stage = PatchStage::Merge;

    if let Some(merge_patch) = &patches.merge_patch {
        trace!(shape = T::shape_name(), "applying merge patch");
        merge::apply::<T>(&mut doc, merge_patch)?;
    }

    if !patches.json_patch.is_empty() {
        trace!(
            shape = T::shape_name(),
            operations = patches.json_patch.len(),
            "applying JSON patch"
        );
        stage = PatchStage::Json;
        json::apply(&mut doc, &patches.json_patch)?;
        doc = T::from_document(doc, stage)?.to_document()?;
    }

    if let Some(strategic_patch) = &patches.strategic_merge_patch {
        trace!(shape = T::shape_name(), "applying strategic merge patch");
        stage = PatchStage::Strategic;
        strategic::apply::<T>(&mut doc, strategic_patch)?;
    }

    T::from_document(doc, stage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Pod, Service};
    use kube::api::DynamicObject;
    use serde_json::{json, Value};

    fn pod() -> Pod {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": "test",
                "namespace": "default",
                "labels": {"existing": "label"},
            },
            "spec": {
                "containers": [{"name": "main", "image": "busybox"}],
            },
        }))
        .unwrap()
    }

    fn patches(raw: Value) -> Patches {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn no_patches_is_identity() {
        let base = pod();
        assert_eq!(apply(base.clone(), None).unwrap(), base);
        assert_eq!(apply(base.clone(), Some(&Patches::default())).unwrap(), base);

        let free_form = json!({"anything": [1, 2, 3]});
        assert_eq!(apply(free_form.clone(), None).unwrap(), free_form);
    }

    #[test]
    fn merge_patch_updates_labels_and_adds_annotations() {
        let result = apply(
            pod(),
            Some(&patches(json!({"mergePatch": {"metadata": {
                "labels": {"existing": "changed", "new": "label"},
                "annotations": {"note": "added"},
            }}}))),
        )
        .unwrap();

        let labels = result.metadata.labels.unwrap();
        assert_eq!(labels["existing"], "changed");
        assert_eq!(labels["new"], "label");
        assert_eq!(result.metadata.annotations.unwrap()["note"], "added");
    }

    #[test]
    fn merge_patch_with_unknown_field_fails_for_typed_shape() {
        let err = apply(
            pod(),
            Some(&patches(json!({"mergePatch": {"metadata": {"something": "x"}}}))),
        )
        .unwrap_err();
        assert!(matches!(err, PatchError::Decode { .. }));
        assert!(err.to_string().contains("metadata.something"));
    }

    #[test]
    fn merge_patch_on_free_form_skips_validation() {
        let base = json!({"metadata": {"name": "x"}});
        let result = apply(
            base,
            Some(&patches(json!({"mergePatch": {"metadata": {"something": "x"}}}))),
        )
        .unwrap();
        assert_eq!(result, json!({"metadata": {"name": "x", "something": "x"}}));
    }

    #[test]
    fn json_patch_replace_on_typed_shape() {
        let result = apply(
            pod(),
            Some(&patches(json!({"jsonPatch": [
                {"op": "replace", "path": "/spec/containers/0/image", "value": "alpine"},
            ]}))),
        )
        .unwrap();
        assert_eq!(
            result.spec.unwrap().containers[0].image.as_deref(),
            Some("alpine")
        );
    }

    #[test]
    fn json_patch_add_on_dynamic_object() {
        let base: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "test"},
            "spec": {},
        }))
        .unwrap();

        let result = apply(
            base,
            Some(&patches(json!({"jsonPatch": [
                {"op": "add", "path": "/spec/serviceAccountName", "value": "robot"},
            ]}))),
        )
        .unwrap();
        assert_eq!(result.data["spec"]["serviceAccountName"], "robot");
    }

    #[test]
    fn json_patch_replace_of_missing_path_fails() {
        let err = apply(
            pod(),
            Some(&patches(json!({"jsonPatch": [
                {"op": "replace", "path": "/spec/serviceAccountName", "value": "robot"},
            ]}))),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PatchError::Apply {
                stage: PatchStage::Json,
                ..
            }
        ));
    }

    #[test]
    fn all_three_patches_apply_in_order() {
        let result = apply(
            pod(),
            Some(&patches(json!({
                "mergePatch": {"spec": {"dnsPolicy": "ClusterFirstWithHostNet"}},
                "jsonPatch": [
                    {"op": "add", "path": "/metadata/labels/app", "value": "test-value"},
                    {"op": "replace", "path": "/spec/dnsPolicy", "value": "Default"},
                ],
                "strategicMergePatch": {"spec": {"containers": [
                    {"name": "main", "args": ["serve"]},
                ]}},
            }))),
        )
        .unwrap();

        let expected: Pod = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": "test",
                "namespace": "default",
                "labels": {"existing": "label", "app": "test-value"},
            },
            "spec": {
                "dnsPolicy": "Default",
                "containers": [{"name": "main", "image": "busybox", "args": ["serve"]}],
            },
        }))
        .unwrap();

        assert_eq!(
            serde_json::to_string(&result).unwrap(),
            serde_json::to_string(&expected).unwrap()
        );
    }

    #[test]
    fn merge_patch_accepts_numeric_gpu_limit() {
        let result = apply(
            pod(),
            Some(&patches(json!({"mergePatch": {"spec": {"containers": [{
                "name": "main",
                "image": "busybox",
                "resources": {"limits": {"nvidia.com/gpu": 1}},
            }]}}}))),
        )
        .unwrap();

        let limits = result.spec.unwrap().containers[0]
            .resources
            .clone()
            .unwrap()
            .limits
            .unwrap();
        assert_eq!(limits["nvidia.com/gpu"].0, "1");
    }

    #[test]
    fn strategic_delete_of_absent_init_container_is_a_no_op() {
        let result = apply(
            pod(),
            Some(&patches(json!({"strategicMergePatch": {"spec": {
                "initContainers": [{"name": "setup", "$patch": "delete"}],
            }}}))),
        )
        .unwrap();
        assert!(result.spec.unwrap().init_containers.is_none());
    }

    #[test]
    fn strategic_patch_on_free_form_is_unsupported() {
        let err = apply(
            json!({"spec": {}}),
            Some(&patches(json!({"strategicMergePatch": {"spec": {}}}))),
        )
        .unwrap_err();
        assert!(matches!(err, PatchError::UnsupportedTarget { .. }));
    }

    #[test]
    fn output_is_deterministic() {
        let set = patches(json!({
            "mergePatch": {"metadata": {"annotations": {"b": "2", "a": "1"}}},
            "strategicMergePatch": {"spec": {"ports": [{"port": 80, "name": "web"}]}},
        }));
        let base: Service = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": "svc"},
            "spec": {"ports": [{"port": 11434, "name": "http-api"}]},
        }))
        .unwrap();

        let first = serde_json::to_vec(&apply(base.clone(), Some(&set)).unwrap()).unwrap();
        let second = serde_json::to_vec(&apply(base, Some(&set)).unwrap()).unwrap();
        assert_eq!(first, second);
    }
}

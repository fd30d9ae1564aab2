//! RFC 7386 merge patch with typed-field validation

use serde_json::Value;

use crate::error::{PatchError, PatchStage};
use crate::target::PatchTarget;

/// Merge `patch` into `doc`.
///
/// Objects merge key by key, everything else in the patch replaces the base
/// and `null` removes the key. For typed shapes the merged document is decoded
/// into `T` and any patch field the shape dropped is reported as unknown.
pub(crate) fn apply<T: PatchTarget>(doc: &mut Value, patch: &Value) -> Result<(), PatchError> {
    if !patch.is_object() {
        return Err(PatchError::decode(
            PatchStage::Merge,
            format!("patch body must be an object, got {}", kind_of(patch)),
        ));
    }

    json_patch::merge(doc, patch);

    if T::validates_fields() {
        let typed = T::from_document(doc.clone(), PatchStage::Merge)?;
        let reencoded = typed.to_document()?;

        let mut unknown = Vec::new();
        collect_unknown(patch, &reencoded, &mut Vec::new(), &mut unknown);
        if let Some(first) = unknown.first() {
            return Err(PatchError::decode(
                PatchStage::Merge,
                format!("unknown field \"{}\" for {}", first, T::shape_name()),
            ));
        }
        *doc = reencoded;
    }

    Ok(())
}

/// Walk `patch` and record every non-null path missing from `known`
fn collect_unknown(
    patch: &Value,
    known: &Value,
    path: &mut Vec<String>,
    unknown: &mut Vec<String>,
) {
    match (patch, known) {
        (Value::Object(fields), Value::Object(known_fields)) => {
            for (key, value) in fields {
                if value.is_null() {
                    continue;
                }
                path.push(key.clone());
                match known_fields.get(key) {
                    Some(known_value) => collect_unknown(value, known_value, path, unknown),
                    None => unknown.push(path.join(".")),
                }
                path.pop();
            }
        }
        (Value::Object(fields), _) => {
            if let Some((key, _)) = fields.iter().find(|(_, v)| !v.is_null()) {
                path.push(key.clone());
                unknown.push(path.join("."));
                path.pop();
            }
        }
        (Value::Array(items), Value::Array(known_items)) => {
            for (idx, item) in items.iter().enumerate() {
                if let Some(known_item) = known_items.get(idx) {
                    path.push(idx.to_string());
                    collect_unknown(item, known_item, path, unknown);
                    path.pop();
                }
            }
        }
        _ => {}
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Pod;
    use serde_json::json;

    #[test]
    fn nested_objects_merge_and_scalars_replace() {
        let mut doc = json!({"a": {"b": 1, "c": [1, 2]}, "d": "x"});
        apply::<Value>(&mut doc, &json!({"a": {"c": [3]}, "d": "y"})).unwrap();
        assert_eq!(doc, json!({"a": {"b": 1, "c": [3]}, "d": "y"}));
    }

    #[test]
    fn null_removes_key() {
        let mut doc = json!({"a": 1, "b": 2});
        apply::<Value>(&mut doc, &json!({"a": null})).unwrap();
        assert_eq!(doc, json!({"b": 2}));
    }

    #[test]
    fn unknown_nested_field_is_reported_with_its_path() {
        let mut doc = json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "p"}});
        let err = apply::<Pod>(&mut doc, &json!({"metadata": {"something": "x"}})).unwrap_err();
        assert!(err.to_string().contains("unknown field \"metadata.something\""));
    }

    #[test]
    fn unknown_field_inside_list_item_is_reported() {
        let mut doc = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "p"},
            "spec": {"containers": [{"name": "c"}]},
        });
        let err = apply::<Pod>(
            &mut doc,
            &json!({"spec": {"containers": [{"name": "c", "bogus": true}]}}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("spec.containers.0.bogus"));
    }

    #[test]
    fn type_mismatch_is_a_decode_error() {
        let mut doc = json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "p"}});
        let err = apply::<Pod>(&mut doc, &json!({"metadata": {"labels": "nope"}})).unwrap_err();
        assert!(matches!(
            err,
            PatchError::Decode {
                stage: PatchStage::Merge,
                ..
            }
        ));
    }

    #[test]
    fn non_object_patch_is_rejected() {
        let mut doc = json!({});
        let err = apply::<Value>(&mut doc, &json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("must be an object, got array"));
    }
}

//! RFC 6902 JSON patch application

use serde_json::{Map, Value};

use crate::error::{PatchError, PatchStage};
use crate::wire::{JsonPatchOp, JsonPatchOperation};

/// Apply `ops` to `doc` in order.
///
/// Negative array indices are rejected, removing a missing path fails, and
/// `add` creates any missing parent containers before it runs.
pub(crate) fn apply(doc: &mut Value, ops: &[JsonPatchOperation]) -> Result<(), PatchError> {
    for op in ops {
        op.validate()?;
        reject_negative_indices(op)?;

        if op.op == JsonPatchOp::Add {
            ensure_parents(doc, &op.path)?;
        }

        let operation = to_operation(op)?;
        json_patch::patch(doc, std::slice::from_ref(&operation))
            .map_err(|e| PatchError::apply(PatchStage::Json, e.to_string()))?;
    }
    Ok(())
}

fn to_operation(op: &JsonPatchOperation) -> Result<json_patch::PatchOperation, PatchError> {
    let mut raw = Map::new();
    raw.insert("op".into(), Value::String(op.op.to_string()));
    raw.insert("path".into(), Value::String(op.path.clone()));
    if let Some(from) = &op.from {
        raw.insert("from".into(), Value::String(from.clone()));
    }
    if let Some(value) = &op.value {
        raw.insert("value".into(), value.clone());
    }
    serde_json::from_value(Value::Object(raw)).map_err(|e| {
        PatchError::decode(
            PatchStage::Json,
            format!("invalid operation {} on {}: {}", op.op, op.path, e),
        )
    })
}

fn reject_negative_indices(op: &JsonPatchOperation) -> Result<(), PatchError> {
    for pointer in std::iter::once(&op.path).chain(op.from.as_ref()) {
        if let Some(token) = tokens(pointer)?
            .into_iter()
            .find(|t| t.starts_with('-') && t.len() > 1 && t[1..].parse::<u64>().is_ok())
        {
            return Err(PatchError::apply(
                PatchStage::Json,
                format!("negative array index {token} in {pointer}"),
            ));
        }
    }
    Ok(())
}

/// Create missing containers along `path`, excluding its last segment.
///
/// A missing segment becomes an array when the following token is an index,
/// otherwise an object.
fn ensure_parents(doc: &mut Value, path: &str) -> Result<(), PatchError> {
    let tokens = tokens(path)?;
    let Some((_, parents)) = tokens.split_last() else {
        return Ok(());
    };

    let mut current = doc;
    for (idx, token) in parents.iter().enumerate() {
        let next_is_index = tokens
            .get(idx + 1)
            .is_some_and(|t| t == "-" || t.parse::<usize>().is_ok());
        let fresh = || {
            if next_is_index {
                Value::Array(Vec::new())
            } else {
                Value::Object(Map::new())
            }
        };

        current = match current {
            Value::Object(map) => map.entry(token.clone()).or_insert_with(fresh),
            Value::Array(items) => {
                let position = if token == "-" {
                    items.push(fresh());
                    items.len() - 1
                } else {
                    token.parse::<usize>().map_err(|_| {
                        PatchError::apply(
                            PatchStage::Json,
                            format!("invalid array index {token} in {path}"),
                        )
                    })?
                };
                match items.get_mut(position) {
                    Some(item) => item,
                    None => {
                        return Err(PatchError::apply(
                            PatchStage::Json,
                            format!("array index {position} out of bounds in {path}"),
                        ))
                    }
                }
            }
            // Scalars cannot hold children; let the patch itself report it.
            _ => return Ok(()),
        };
    }
    Ok(())
}

/// Split an RFC 6901 pointer into unescaped reference tokens
fn tokens(pointer: &str) -> Result<Vec<String>, PatchError> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = pointer.strip_prefix('/') else {
        return Err(PatchError::decode(
            PatchStage::Json,
            format!("pointer {pointer:?} must start with '/'"),
        ));
    };
    Ok(rest
        .split('/')
        .map(|t| t.replace("~1", "/").replace("~0", "~"))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op(raw: Value) -> JsonPatchOperation {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn add_creates_missing_parents() {
        let mut doc = json!({"metadata": {"name": "x"}});
        apply(
            &mut doc,
            &[op(json!({"op": "add", "path": "/metadata/labels/app", "value": "test-value"}))],
        )
        .unwrap();
        assert_eq!(doc["metadata"]["labels"]["app"], "test-value");
    }

    #[test]
    fn add_creates_array_when_next_token_is_index() {
        let mut doc = json!({});
        apply(
            &mut doc,
            &[op(json!({"op": "add", "path": "/spec/args/-", "value": "--flag"}))],
        )
        .unwrap();
        assert_eq!(doc, json!({"spec": {"args": ["--flag"]}}));
    }

    #[test]
    fn escaped_tokens_are_unescaped() {
        let mut doc = json!({"metadata": {}});
        apply(
            &mut doc,
            &[op(json!({
                "op": "add",
                "path": "/metadata/annotations/example.com~1owner",
                "value": "me",
            }))],
        )
        .unwrap();
        assert_eq!(doc["metadata"]["annotations"]["example.com/owner"], "me");
    }

    #[test]
    fn replace_of_missing_path_fails() {
        let mut doc = json!({"spec": {}});
        let err = apply(
            &mut doc,
            &[op(json!({"op": "replace", "path": "/spec/missing", "value": 1}))],
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("while applying JSON patch:"));
    }

    #[test]
    fn remove_of_missing_path_fails() {
        let mut doc = json!({"spec": {}});
        assert!(apply(&mut doc, &[op(json!({"op": "remove", "path": "/spec/gone"}))]).is_err());
    }

    #[test]
    fn negative_indices_are_rejected() {
        let mut doc = json!({"items": [1, 2, 3]});
        let err = apply(&mut doc, &[op(json!({"op": "remove", "path": "/items/-1"}))]).unwrap_err();
        assert!(err.to_string().contains("negative array index -1"));
        assert_eq!(doc["items"], json!([1, 2, 3]));
    }

    #[test]
    fn move_and_test_operations() {
        let mut doc = json!({"a": {"b": 1}});
        apply(
            &mut doc,
            &[
                op(json!({"op": "move", "from": "/a/b", "path": "/c"})),
                op(json!({"op": "test", "path": "/c", "value": 1})),
            ],
        )
        .unwrap();
        assert_eq!(doc, json!({"a": {}, "c": 1}));
    }

    #[test]
    fn pointer_without_leading_slash_is_a_decode_error() {
        let mut doc = json!({});
        let err = apply(&mut doc, &[op(json!({"op": "add", "path": "a/b", "value": 1}))]).unwrap_err();
        assert!(matches!(err, PatchError::Decode { .. }));
    }
}

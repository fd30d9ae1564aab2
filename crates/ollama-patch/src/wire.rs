//! User-facing patch document shape embedded in resource specs

use schemars::gen::SchemaGenerator;
use schemars::schema::{Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{PatchError, PatchStage};

/// Patches applied, in order, to a generated child manifest
///
/// All three bodies are optional. When present they are applied as
/// merge patch, then JSON patch, then strategic merge patch.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Patches {
    /// RFC 6902 operations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub json_patch: Vec<JsonPatchOperation>,

    /// RFC 7386 merge patch body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub merge_patch: Option<Value>,

    /// Strategic merge patch body (lists merged by their declared merge keys)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub strategic_merge_patch: Option<Value>,
}

impl Patches {
    /// True when no patch body is set
    pub fn is_empty(&self) -> bool {
        self.json_patch.is_empty()
            && self.merge_patch.is_none()
            && self.strategic_merge_patch.is_none()
    }
}

/// JSON Patch operation kind
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JsonPatchOp {
    /// Add a value, creating missing parents
    Add,
    /// Remove an existing value
    Remove,
    /// Replace an existing value
    Replace,
    /// Move a value from `from` to `path`
    Move,
    /// Copy a value from `from` to `path`
    Copy,
    /// Assert the value at `path` equals `value`
    Test,
}

impl std::fmt::Display for JsonPatchOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Replace => "replace",
            Self::Move => "move",
            Self::Copy => "copy",
            Self::Test => "test",
        };
        f.write_str(s)
    }
}

/// A single RFC 6902 operation
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct JsonPatchOperation {
    /// Operation kind
    pub op: JsonPatchOp,

    /// RFC 6901 pointer to the target location
    pub path: String,

    /// Source pointer, required for `move` and `copy`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    /// Operand, required for `add`, `replace` and `test`
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub value: Option<Value>,
}

impl JsonPatchOperation {
    /// Check the `from`/`value` presence rules for this operation kind
    pub fn validate(&self) -> Result<(), PatchError> {
        let needs_from = matches!(self.op, JsonPatchOp::Move | JsonPatchOp::Copy);
        let needs_value = matches!(
            self.op,
            JsonPatchOp::Add | JsonPatchOp::Replace | JsonPatchOp::Test
        );

        if needs_from && self.from.is_none() {
            return Err(PatchError::decode(
                PatchStage::Json,
                format!("operation {} on {} requires \"from\"", self.op, self.path),
            ));
        }
        if needs_value && self.value.is_none() {
            return Err(PatchError::decode(
                PatchStage::Json,
                format!("operation {} on {} requires \"value\"", self.op, self.path),
            ));
        }
        Ok(())
    }
}

/// Keeps an explicit `"value": null` distinct from an absent value
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject::default();
    schema
        .extensions
        .insert("x-kubernetes-preserve-unknown-fields".into(), Value::Bool(true));
    Schema::Object(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn explicit_null_value_is_present() {
        let op: JsonPatchOperation =
            serde_json::from_value(json!({"op": "add", "path": "/a", "value": null})).unwrap();
        assert_eq!(op.value, Some(Value::Null));
        assert!(op.validate().is_ok());
    }

    #[test]
    fn move_without_from_is_rejected() {
        let op: JsonPatchOperation =
            serde_json::from_value(json!({"op": "move", "path": "/a"})).unwrap();
        let err = op.validate().unwrap_err();
        assert!(err.to_string().contains("requires \"from\""));
    }

    #[test]
    fn replace_without_value_is_rejected() {
        let op: JsonPatchOperation =
            serde_json::from_value(json!({"op": "replace", "path": "/a"})).unwrap();
        assert!(op.validate().is_err());
    }

    #[test]
    fn parses_camel_case_wire_shape() {
        let patches: Patches = serde_json::from_value(json!({
            "jsonPatch": [{"op": "remove", "path": "/spec/replicas"}],
            "mergePatch": {"metadata": {"labels": {"a": "b"}}},
        }))
        .unwrap();
        assert_eq!(patches.json_patch.len(), 1);
        assert!(patches.merge_patch.is_some());
        assert!(patches.strategic_merge_patch.is_none());
        assert!(!patches.is_empty());
        assert!(Patches::default().is_empty());
    }

    #[test]
    fn schema_preserves_unknown_fields() {
        let schema = schemars::schema_for!(Patches);
        let rendered = serde_json::to_string(&schema).unwrap();
        assert!(rendered.contains("x-kubernetes-preserve-unknown-fields"));
    }
}

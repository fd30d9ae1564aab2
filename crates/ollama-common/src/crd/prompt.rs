//! Prompt CRD types
//!
//! A `Prompt` is a one-shot generation request against a [`super::Model`].
//! Its answer is written once into status and never recomputed.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::condition::ConditionSet;
use super::Conditioned;

/// Desired state of a Prompt
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "ollama.dev",
    version = "v1alpha1",
    kind = "Prompt",
    plural = "prompts",
    shortname = "op",
    namespaced,
    status = "PromptStatus",
    printcolumn = r#"{"name":"Model","type":"string","jsonPath":".spec.modelRef.name"}"#,
    printcolumn = r#"{"name":"Synced","type":"string","jsonPath":".status.conditions[?(@.type=='Synced')].status"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PromptSpec {
    /// Model to run the prompt against
    pub model_ref: ModelRef,

    /// Prompt text
    pub prompt: String,

    /// Continuation token from a previous Prompt's status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Text appended after the model response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,

    /// System prompt override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// Prompt template override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    /// Model options passed through to the server (e.g. `temperature`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "free_form_object")]
    pub options: Option<Value>,

    /// Images for multimodal models
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageSource>,
}

/// Reference to a Model, defaulting to the Prompt's namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ModelRef {
    /// Model name
    pub name: String,
    /// Model namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ModelRef {
    /// Namespace the reference resolves to from a Prompt in `prompt_namespace`
    pub fn namespace_or<'a>(&'a self, prompt_namespace: &'a str) -> &'a str {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => prompt_namespace,
        }
    }
}

/// Where an image's bytes come from. Exactly one source must be set.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageSource {
    /// Image embedded in the Prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<ImageData>,

    /// ConfigMap key holding an [`ImageData`] document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_key_ref: Option<KeySelector>,

    /// Secret key holding an [`ImageData`] document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<KeySelector>,
}

/// Selects a key of a ConfigMap or Secret
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct KeySelector {
    /// Object name
    pub name: String,
    /// Object namespace, defaults to the Prompt's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Key within the object's data
    pub key: String,
}

/// Base64 image payload and the compression applied before encoding
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ImageData {
    /// Compression applied to the bytes before base64 encoding
    #[serde(default)]
    #[schemars(schema_with = "image_format_schema")]
    pub format: ImageFormat,
    /// Base64-encoded payload
    pub data: String,
}

/// Compression tag of an [`ImageData`] payload
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ImageFormat {
    /// Plain bytes (also the meaning of an empty tag)
    #[default]
    #[serde(rename = "none", alias = "")]
    None,
    /// gzip-compressed bytes
    #[serde(rename = "gzip")]
    Gzip,
    /// zstd-compressed bytes
    #[serde(rename = "zstd")]
    Zstd,
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Gzip => write!(f, "gzip"),
            Self::Zstd => write!(f, "zstd"),
        }
    }
}

/// Observed state of a Prompt
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PromptStatus {
    /// Synced and Ready conditions
    #[serde(default, skip_serializing_if = "ConditionSet::is_empty")]
    pub conditions: ConditionSet,

    /// Generation last reconciled
    #[serde(default)]
    pub observed_generation: i64,

    /// Model response, trimmed of trailing whitespace
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub response: String,

    /// Continuation token: base64 of the JSON-encoded context sequence
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub context: String,

    /// Response metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<PromptResponseMeta>,

    /// Response performance metrics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<PromptResponseMetrics>,
}

/// Metadata of a generation response
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PromptResponseMeta {
    /// When the server produced the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Timings and token counts of a generation response
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PromptResponseMetrics {
    /// Total time spent generating the response
    pub total_duration: String,
    /// Time spent loading the model
    pub load_duration: String,
    /// Tokens in the prompt
    pub prompt_eval_count: i64,
    /// Time spent evaluating the prompt
    pub prompt_eval_duration: String,
    /// Prompt tokens per second
    pub prompt_eval_rate: String,
    /// Tokens in the response
    pub eval_count: i64,
    /// Time spent generating the response
    pub eval_duration: String,
    /// Response tokens per second
    pub eval_rate: String,
}

impl Conditioned for Prompt {
    fn conditions(&self) -> Option<&ConditionSet> {
        self.status.as_ref().map(|s| &s.conditions)
    }

    fn conditions_mut(&mut self) -> &mut ConditionSet {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }
}

impl Prompt {
    /// Response already recorded in status
    pub fn response(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|s| s.response.as_str())
            .filter(|r| !r.is_empty())
    }
}

fn free_form_object(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema
        .extensions
        .insert("x-kubernetes-preserve-unknown-fields".into(), Value::Bool(true));
    Schema::Object(schema)
}

/// String enum of the compression tags, including the empty tag
fn image_format_schema(_: &mut SchemaGenerator) -> Schema {
    Schema::Object(SchemaObject {
        instance_type: Some(InstanceType::String.into()),
        enum_values: Some(
            ["", "none", "gzip", "zstd"]
                .into_iter()
                .map(Value::from)
                .collect(),
        ),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn model_ref_defaults_to_prompt_namespace() {
        let local = ModelRef {
            name: "llama".to_string(),
            namespace: None,
        };
        assert_eq!(local.namespace_or("team-a"), "team-a");

        let remote = ModelRef {
            name: "llama".to_string(),
            namespace: Some("models".to_string()),
        };
        assert_eq!(remote.namespace_or("team-a"), "models");
    }

    #[test]
    fn empty_format_tag_means_none() {
        let data: ImageData = serde_json::from_str(r#"{"format": "", "data": "aGk="}"#).unwrap();
        assert_eq!(data.format, ImageFormat::None);

        let data: ImageData = serde_json::from_str(r#"{"data": "aGk="}"#).unwrap();
        assert_eq!(data.format, ImageFormat::None);

        let data: ImageData = serde_json::from_str(r#"{"format": "zstd", "data": ""}"#).unwrap();
        assert_eq!(data.format, ImageFormat::Zstd);
    }

    #[test]
    fn unknown_format_tag_is_rejected_at_decode() {
        let result = serde_json::from_str::<ImageData>(r#"{"format": "brotli", "data": ""}"#);
        assert!(result.is_err());
    }

    #[test]
    fn parses_prompt_with_options_and_images() {
        let prompt: Prompt = serde_yaml::from_str(
            r#"
apiVersion: ollama.dev/v1alpha1
kind: Prompt
metadata:
  name: describe
  namespace: default
spec:
  modelRef:
    name: llava
  prompt: What is in this picture?
  options:
    temperature: 0.2
  images:
    - configMapKeyRef:
        name: pictures
        key: cat
"#,
        )
        .unwrap();
        assert_eq!(prompt.spec.model_ref.name, "llava");
        assert_eq!(prompt.spec.options.as_ref().unwrap()["temperature"], 0.2);
        assert_eq!(prompt.spec.images[0].config_map_key_ref.as_ref().unwrap().key, "cat");
        assert!(prompt.response().is_none());
    }

    #[test]
    fn crd_preserves_unknown_option_fields() {
        let crd = serde_json::to_string(&Prompt::crd()).unwrap();
        assert!(crd.contains("x-kubernetes-preserve-unknown-fields"));
    }

    #[test]
    fn crd_accepts_empty_format_tag() {
        let crd = serde_json::to_string(&Prompt::crd()).unwrap();
        assert!(crd.contains(r#""enum":["","none","gzip","zstd"]"#));
    }
}

//! Model CRD types
//!
//! A `Model` declares an Ollama inference server serving one named model.
//! The operator renders a StatefulSet and a Service for it, waits for the
//! workload to become ready, pulls the model and records its metadata.

use kube::CustomResource;
use ollama_patch::Patches;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::condition::ConditionSet;
use super::Conditioned;
use crate::DEFAULT_OLLAMA_IMAGE;

/// Desired state of a Model
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "ollama.dev",
    version = "v1alpha1",
    kind = "Model",
    plural = "models",
    shortname = "om",
    namespaced,
    status = "ModelStatus",
    printcolumn = r#"{"name":"Model","type":"string","jsonPath":".spec.model"}"#,
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".status.ollamaImage"}"#,
    printcolumn = r#"{"name":"Synced","type":"string","jsonPath":".status.conditions[?(@.type=='Synced')].status"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    /// Ollama server image, defaults to the pinned release
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ollama_image: Option<String>,

    /// Model identifier as understood by Ollama (e.g. `llama3.1`, `gemma2:2b`)
    pub model: String,

    /// Patches applied to the generated StatefulSet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stateful_set_patches: Option<Patches>,

    /// Patches applied to the generated Service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_patches: Option<Patches>,
}

impl ModelSpec {
    /// Image the server runs: the spec value, or the default when unset or empty
    pub fn effective_image(&self) -> &str {
        match self.ollama_image.as_deref() {
            Some(image) if !image.is_empty() => image,
            _ => DEFAULT_OLLAMA_IMAGE,
        }
    }
}

/// Observed state of a Model
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelStatus {
    /// Synced and Ready conditions
    #[serde(default, skip_serializing_if = "ConditionSet::is_empty")]
    pub conditions: ConditionSet,

    /// Generation last reconciled
    #[serde(default)]
    pub observed_generation: i64,

    /// Image in use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ollama_image: Option<String>,

    /// Metadata reported by the server once the model is pulled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_details: Option<OllamaModelDetails>,
}

/// Model metadata as reported by Ollama
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OllamaModelDetails {
    /// e.g. `2.6B`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parameter_size: String,
    /// e.g. `Q4_0`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub quantization_level: String,
    /// Model this one was derived from
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_model: String,
    /// e.g. `gguf`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,
    /// e.g. `gemma2`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub family: String,
    /// All families the model belongs to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub families: Vec<String>,
}

impl Conditioned for Model {
    fn conditions(&self) -> Option<&ConditionSet> {
        self.status.as_ref().map(|s| &s.conditions)
    }

    fn conditions_mut(&mut self) -> &mut ConditionSet {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::condition::{Condition, TYPE_READY};
    use kube::CustomResourceExt;

    #[test]
    fn effective_image_falls_back_to_default() {
        let mut spec = ModelSpec {
            model: "llama3.1".to_string(),
            ..Default::default()
        };
        assert_eq!(spec.effective_image(), DEFAULT_OLLAMA_IMAGE);

        spec.ollama_image = Some(String::new());
        assert_eq!(spec.effective_image(), DEFAULT_OLLAMA_IMAGE);

        spec.ollama_image = Some("ollama/ollama:0.4.0".to_string());
        assert_eq!(spec.effective_image(), "ollama/ollama:0.4.0");
    }

    #[test]
    fn crd_carries_group_and_status_subresource() {
        let crd = Model::crd();
        assert_eq!(crd.spec.group, "ollama.dev");
        assert_eq!(crd.spec.names.kind, "Model");
        let version = &crd.spec.versions[0];
        assert!(version.subresources.as_ref().unwrap().status.is_some());
    }

    #[test]
    fn parses_user_manifest_with_patches() {
        let model: Model = serde_yaml::from_str(
            r#"
apiVersion: ollama.dev/v1alpha1
kind: Model
metadata:
  name: gemma
  namespace: default
spec:
  model: gemma2:2b
  statefulSetPatches:
    mergePatch:
      spec:
        template:
          spec:
            nodeSelector:
              gpu: "true"
"#,
        )
        .unwrap();
        assert_eq!(model.spec.model, "gemma2:2b");
        assert!(model.spec.stateful_set_patches.is_some());
        assert!(model.spec.service_patches.is_none());
    }

    #[test]
    fn conditions_are_stamped_with_generation() {
        let mut model = Model::new(
            "gemma",
            ModelSpec {
                model: "gemma2:2b".to_string(),
                ..Default::default()
            },
        );
        model.metadata.generation = Some(4);
        model.set_conditions([Condition::creating()]);

        let ready = model.condition(TYPE_READY).unwrap();
        assert_eq!(ready.observed_generation, 4);
    }
}

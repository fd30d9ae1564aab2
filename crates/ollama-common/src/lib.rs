//! Common types for the Ollama operator: CRDs, conditions, errors and telemetry

#![deny(missing_docs)]

pub mod crd;
pub mod duration;
pub mod error;
pub mod events;
pub mod leader_election;
pub mod metrics;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Image the Ollama server runs when a Model does not name one
pub const DEFAULT_OLLAMA_IMAGE: &str = "ollama/ollama:0.3.3";

/// Port the Ollama HTTP API listens on
pub const OLLAMA_PORT: i32 = 11434;

/// Name of the Ollama HTTP API port on pods and services
pub const OLLAMA_PORT_NAME: &str = "http-api";

/// Field manager for server-side apply by the Model controller
pub const FIELD_MANAGER: &str = "ollama-operator";

/// Field manager for status writes by the Prompt controller
pub const PROMPT_FIELD_MANAGER: &str = "ollama-operator.prompt-controller";

/// Namespace the operator runs in when `POD_NAMESPACE` is unset
pub const OPERATOR_NAMESPACE: &str = "ollama-operator-system";

/// Standard Kubernetes labels and the operator's own
pub mod labels {
    /// Application name label, set to the Model name
    pub const NAME: &str = "app.kubernetes.io/name";
    /// Manager label
    pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
    /// Value of [`MANAGED_BY`] on everything the operator creates
    pub const MANAGED_BY_VALUE: &str = "ollama-operator";
    /// Model that owns the labelled object
    pub const MODEL: &str = "ollama.dev/model";
    /// Marks ConfigMaps and Secrets that hold image payloads
    pub const CONTAINS_IMAGE: &str = "ollama.dev/contains-image";

    /// Labels carried by every object rendered for `model`
    pub fn for_model(model: &str) -> std::collections::BTreeMap<String, String> {
        [
            (NAME, model),
            (MANAGED_BY, MANAGED_BY_VALUE),
            (MODEL, model),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_labels_identify_owner_and_manager() {
        let labels = labels::for_model("gemma");
        assert_eq!(labels.len(), 3);
        assert_eq!(labels[labels::NAME], "gemma");
        assert_eq!(labels[labels::MODEL], "gemma");
        assert_eq!(labels[labels::MANAGED_BY], "ollama-operator");
    }
}

//! Offline rendering of a Model's children

use anyhow::Context as _;
use ollama_common::crd::Model;

const DEFAULT_NAMESPACE: &str = "default";

/// Render the StatefulSet and Service of a Model manifest (YAML or JSON).
///
/// A Model without a namespace renders into `default`.
pub fn render_manifests(input: &str) -> anyhow::Result<String> {
    let mut model: Model = serde_yaml::from_str(input).context("failed to parse Model")?;
    if model.metadata.namespace.as_deref().unwrap_or_default().is_empty() {
        model.metadata.namespace = Some(DEFAULT_NAMESPACE.to_string());
    }

    let rendered = ollama_model::render(&model)?;
    let stateful_set = serde_yaml::to_string(&rendered.stateful_set)?;
    let service = serde_yaml::to_string(&rendered.service)?;
    Ok(format!("{stateful_set}---\n{service}"))
}

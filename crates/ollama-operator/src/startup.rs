//! CRD generation and installation
//!
//! The operator installs its own CRDs with server-side apply so their schema
//! always matches the binary.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use ollama_common::crd::{Model, Prompt};
use ollama_common::FIELD_MANAGER;

/// Every CRD the operator serves
pub fn crds() -> Vec<CustomResourceDefinition> {
    vec![Model::crd(), Prompt::crd()]
}

/// All CRDs as a multi-document YAML stream
pub fn crds_yaml() -> Result<String, serde_yaml::Error> {
    let docs = crds()
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(docs.join("---\n"))
}

/// Install or update the CRDs
pub async fn install_crds(client: &Client) -> anyhow::Result<()> {
    let api: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in crds() {
        let name = crd.metadata.name.clone().unwrap_or_default();
        tracing::info!(crd = %name, "Installing CRD");
        api.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install {name} CRD: {e}"))?;
    }

    tracing::info!("All CRDs installed/updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_stream_holds_both_crds() {
        let yaml = crds_yaml().unwrap();
        assert!(yaml.contains("name: models.ollama.dev"));
        assert!(yaml.contains("name: prompts.ollama.dev"));
        assert_eq!(yaml.matches("---\n").count(), 1);
    }
}

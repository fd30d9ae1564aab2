//! Child manifests rendered for a Model
//!
//! Each Model owns one single-replica StatefulSet running the Ollama server
//! and one ClusterIP Service in front of it. The user's patches are applied
//! on top of the rendered defaults.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, HTTPGetAction, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, Probe, Service, ServicePort,
    ServiceSpec, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use ollama_common::crd::Model;
use ollama_common::{labels, OLLAMA_PORT, OLLAMA_PORT_NAME};

use crate::error::ModelError;

/// Name of the Ollama container
pub const CONTAINER_NAME: &str = "ollama";

/// Where the server keeps downloaded models
pub const DATA_PATH: &str = "/root/.ollama";

const DATA_VOLUME_SIZE: &str = "20Gi";
const DEFAULT_CONTAINER_ANNOTATION: &str = "kubectl.kubernetes.io/default-container";

/// Rendered and patched child manifests of a Model
#[derive(Clone, Debug, PartialEq)]
pub struct Rendered {
    /// Ollama server workload
    pub stateful_set: StatefulSet,
    /// Service exposing the server's HTTP API
    pub service: Service,
}

/// Render both children of `model` and apply its patches
pub fn render(model: &Model) -> Result<Rendered, ModelError> {
    let stateful_set = ollama_patch::apply(
        stateful_set(model),
        model.spec.stateful_set_patches.as_ref(),
    )
    .map_err(|source| ModelError::Render {
        object: "statefulset",
        source,
    })?;
    let service = ollama_patch::apply(service(model), model.spec.service_patches.as_ref())
        .map_err(|source| ModelError::Render {
            object: "service",
            source,
        })?;
    Ok(Rendered {
        stateful_set,
        service,
    })
}

fn metadata(model: &Model, labels: &BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(model.name_any()),
        namespace: model.namespace(),
        labels: Some(labels.clone()),
        owner_references: owner_reference(model).map(|r| vec![r]),
        ..Default::default()
    }
}

/// Controller owner reference to `model`; `None` until the Model has a UID
fn owner_reference(model: &Model) -> Option<OwnerReference> {
    model.controller_owner_ref(&()).map(|owner| OwnerReference {
        block_owner_deletion: Some(true),
        ..owner
    })
}

fn http_probe() -> Probe {
    Probe {
        initial_delay_seconds: Some(10),
        period_seconds: Some(5),
        failure_threshold: Some(3),
        http_get: Some(HTTPGetAction {
            path: Some("/".to_string()),
            port: IntOrString::String(OLLAMA_PORT_NAME.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn stateful_set(model: &Model) -> StatefulSet {
    let name = model.name_any();
    let labels = labels::for_model(&name);
    let volume_name = format!("{name}-ollama-root");

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(model.spec.effective_image().to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        ports: Some(vec![ContainerPort {
            name: Some(OLLAMA_PORT_NAME.to_string()),
            container_port: OLLAMA_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(vec![
            env("OLLAMA_KEEP_ALIVE", "-1"),
            env("OLLAMA_MAX_LOADED_MODELS", "1"),
            env("OLLAMA_DEBUG", "false"),
        ]),
        liveness_probe: Some(http_probe()),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/".to_string()),
                port: IntOrString::Int(OLLAMA_PORT),
                ..Default::default()
            }),
            ..http_probe()
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: volume_name.clone(),
            mount_path: DATA_PATH.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    StatefulSet {
        metadata: metadata(model, &labels),
        spec: Some(StatefulSetSpec {
            // The reconciler only ever manages a single server per Model.
            replicas: Some(1),
            min_ready_seconds: Some(10),
            service_name: Some(name.clone()),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            volume_claim_templates: Some(vec![PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some(volume_name),
                    namespace: model.namespace(),
                    ..Default::default()
                },
                spec: Some(PersistentVolumeClaimSpec {
                    access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                    resources: Some(VolumeResourceRequirements {
                        requests: Some(BTreeMap::from([(
                            "storage".to_string(),
                            Quantity(DATA_VOLUME_SIZE.to_string()),
                        )])),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(BTreeMap::from([(
                        DEFAULT_CONTAINER_ANNOTATION.to_string(),
                        CONTAINER_NAME.to_string(),
                    )])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

fn service(model: &Model) -> Service {
    let labels = labels::for_model(&model.name_any());
    Service {
        metadata: metadata(model, &labels),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some(OLLAMA_PORT_NAME.to_string()),
                port: OLLAMA_PORT,
                target_port: Some(IntOrString::String(OLLAMA_PORT_NAME.to_string())),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

//! Controller runner - builds the Model and Prompt controller futures
//!
//! The Model controller owns the StatefulSet and Service it renders, so
//! rollout progress re-triggers it. The Prompt controller also watches Models
//! and fans a Model change out to the Prompts referencing it, served from its
//! own Prompt cache.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource};

use ollama_client::ClientProvider;
use ollama_common::crd::{Model, Prompt};

/// Watcher timeout (seconds), kept below the client read timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Boxed controller future
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Settings shared by both controllers
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Namespace to watch; all namespaces when `None`
    pub namespace: Option<String>,
    /// Reconciles run in parallel per controller
    pub concurrency: u16,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            concurrency: 10,
        }
    }
}

fn scoped<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Build the Model controller future
pub fn build_model_controller(
    client: Client,
    clients: Arc<dyn ClientProvider>,
    config: &RunnerConfig,
) -> ControllerFuture {
    let namespace = config.namespace.as_deref();
    let models: Api<Model> = scoped(client.clone(), namespace);
    let stateful_sets: Api<StatefulSet> = scoped(client.clone(), namespace);
    let services: Api<Service> = scoped(client.clone(), namespace);
    let ctx = Arc::new(ollama_model::Context::new(client, clients));

    tracing::info!(namespace = ?namespace, "- Model controller");

    Box::pin(
        Controller::new(models, watcher_config())
            .owns(stateful_sets, watcher_config())
            .owns(services, watcher_config())
            .with_config(ControllerConfig::default().concurrency(config.concurrency))
            .shutdown_on_signal()
            .run(ollama_model::reconcile, ollama_model::error_policy, ctx)
            .for_each(log_reconcile_result("Model")),
    )
}

/// Build the Prompt controller future
pub fn build_prompt_controller(
    client: Client,
    clients: Arc<dyn ClientProvider>,
    config: &RunnerConfig,
) -> ControllerFuture {
    let namespace = config.namespace.as_deref();
    let prompts: Api<Prompt> = scoped(client.clone(), namespace);
    let models: Api<Model> = scoped(client.clone(), namespace);
    let ctx = Arc::new(ollama_prompt::Context::new(client, clients));

    let controller = Controller::new(prompts, watcher_config())
        .with_config(ControllerConfig::default().concurrency(config.concurrency));
    let cache = controller.store();

    tracing::info!(namespace = ?namespace, "- Prompt controller");

    Box::pin(
        controller
            .watches(models, watcher_config(), move |model| {
                let affected = ollama_prompt::prompts_for_model(cache.state(), &model);
                tracing::debug!(
                    model = %model.metadata.name.as_deref().unwrap_or_default(),
                    affected_count = affected.len(),
                    "Model changed, re-reconciling its prompts"
                );
                affected
            })
            .shutdown_on_signal()
            .run(ollama_prompt::reconcile, ollama_prompt::error_policy, ctx)
            .for_each(log_reconcile_result("Prompt")),
    )
}

/// Build both controller futures
pub fn build_controllers(
    client: Client,
    clients: Arc<dyn ClientProvider>,
    config: &RunnerConfig,
) -> Vec<ControllerFuture> {
    vec![
        build_model_controller(client.clone(), clients.clone(), config),
        build_prompt_controller(client, clients, config),
    ]
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(object) => tracing::debug!(?object, "{} reconciliation completed", controller_name),
            Err(e) => tracing::warn!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

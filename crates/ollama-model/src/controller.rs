//! Model reconciliation controller
//!
//! Each pass walks the Model towards a running server with its model pulled:
//!
//! 1. render the StatefulSet and Service and server-side apply them
//! 2. wait for the StatefulSet rollout (requeue in 3s while it does not exist)
//! 3. pull the model if the server does not list it, announcing the pull first
//! 4. record the model details and report Ready
//!
//! Whatever the outcome, the pass ends by stamping the observed generation,
//! setting Synced from the result and writing status.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use ollama_client::types::{PullRequest, ShowRequest};
use ollama_client::ClientProvider;
use ollama_common::crd::{Condition, Conditioned, Model, OllamaModelDetails};
use ollama_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use ollama_common::metrics::{self, ReconcileResult};
use ollama_common::{Error, FIELD_MANAGER};

use crate::error::ModelError;
use crate::readiness::rollout_status;
use crate::render::render;

const WORKLOAD_POLL: Duration = Duration::from_secs(3);
const PULL_RETRY: Duration = Duration::from_secs(5);
const CONFLICT_RETRY: Duration = Duration::from_secs(1);

/// Reporter name on Events emitted by this controller
pub const CONTROLLER_NAME: &str = "ollama-operator.model-controller";

/// Kubernetes operations the Model reconciler needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ModelKube: Send + Sync {
    /// Server-side apply a StatefulSet
    async fn apply_stateful_set(&self, sts: &StatefulSet) -> Result<(), Error>;

    /// Server-side apply a Service
    async fn apply_service(&self, svc: &Service) -> Result<(), Error>;

    /// Fetch a StatefulSet, `None` when absent
    async fn get_stateful_set(&self, namespace: &str, name: &str)
        -> Result<Option<StatefulSet>, Error>;

    /// Write `model.status`, guarded by its resourceVersion
    async fn patch_status(&self, model: &Model) -> Result<(), Error>;
}

/// [`ModelKube`] backed by the API server
pub struct KubeModelClient {
    client: Client,
}

impl KubeModelClient {
    /// Wrap a client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn apply<K>(&self, obj: &K) -> Result<(), Error>
    where
        K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + std::fmt::Debug
            + serde::Serialize
            + serde::de::DeserializeOwned,
    {
        let namespace = obj
            .namespace()
            .ok_or_else(|| Error::validation(obj.name_any(), "rendered object has no namespace"))?;
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);
        api.patch(
            &obj.name_any(),
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(obj),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ModelKube for KubeModelClient {
    async fn apply_stateful_set(&self, sts: &StatefulSet) -> Result<(), Error> {
        self.apply(sts).await
    }

    async fn apply_service(&self, svc: &Service) -> Result<(), Error> {
        self.apply(svc).await
    }

    async fn get_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StatefulSet>, Error> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_status(&self, model: &Model) -> Result<(), Error> {
        let namespace = model
            .namespace()
            .ok_or_else(|| Error::validation(model.name_any(), "Model must be namespaced"))?;
        let api: Api<Model> = Api::namespaced(self.client.clone(), &namespace);
        let patch = serde_json::json!({
            "metadata": {"resourceVersion": model.resource_version()},
            "status": model.status,
        });
        api.patch_status(
            &model.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }
}

/// Shared state of the Model controller
pub struct Context {
    /// Kubernetes operations
    pub kube: Arc<dyn ModelKube>,
    /// Inference clients per Model
    pub clients: Arc<dyn ClientProvider>,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
}

impl Context {
    /// Context backed by the API server
    pub fn new(client: Client, clients: Arc<dyn ClientProvider>) -> Self {
        Self {
            kube: Arc::new(KubeModelClient::new(client.clone())),
            clients,
            events: Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME)),
        }
    }

    /// Context built from mocks
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn ModelKube>,
        clients: Arc<dyn ClientProvider>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            kube,
            clients,
            events,
        }
    }
}

/// Log the error and retry in 30 seconds
pub fn error_policy(model: Arc<Model>, error: &ModelError, _ctx: Arc<Context>) -> Action {
    warn!(model = %model.name_any(), error = %error, "Model reconcile failed, will retry");
    Action::requeue(Duration::from_secs(30))
}

/// Reconcile one Model
#[instrument(skip_all, fields(model = %model.name_any(), namespace = %model.namespace().unwrap_or_default(), otel.kind = "internal"))]
pub async fn reconcile(model: Arc<Model>, ctx: Arc<Context>) -> Result<Action, ModelError> {
    let started = Instant::now();
    let mut model = (*model).clone();

    let outcome = reconcile_model(&mut model, &ctx).await;
    let result = finish(&mut model, &ctx, outcome).await;

    let label = if result.is_ok() {
        ReconcileResult::Success
    } else {
        ReconcileResult::Error
    };
    metrics::record_reconcile("Model", label, started.elapsed().as_secs_f64());

    match result {
        Err(e) if e.is_conflict() => {
            debug!(error = %e, "Conflict writing Model, requeueing");
            Ok(Action::requeue(CONFLICT_RETRY))
        }
        other => other,
    }
}

/// Stamp status, set Synced from `outcome` and write status
async fn finish(
    model: &mut Model,
    ctx: &Context,
    outcome: Result<Action, ModelError>,
) -> Result<Action, ModelError> {
    let generation = model.metadata.generation.unwrap_or(0);
    let image = model.spec.effective_image().to_string();
    let status = model.status.get_or_insert_with(Default::default);
    status.observed_generation = generation;
    status.ollama_image = Some(image);

    match &outcome {
        Ok(_) => model.set_conditions([Condition::reconcile_success()]),
        Err(e) => model.set_conditions([Condition::reconcile_error(e)]),
    }

    match ctx.kube.patch_status(model).await {
        Ok(()) => outcome,
        Err(source) => Err(ModelError::persist(outcome.err(), source)),
    }
}

async fn reconcile_model(model: &mut Model, ctx: &Context) -> Result<Action, ModelError> {
    let name = model.name_any();
    let namespace = model
        .namespace()
        .ok_or_else(|| Error::validation(&name, "Model must be namespaced"))?;
    debug!(model = %name, "Reconciling Model");

    let rendered = render(model)?;
    ctx.kube.apply_stateful_set(&rendered.stateful_set).await?;
    ctx.kube.apply_service(&rendered.service).await?;

    let Some(sts) = ctx.kube.get_stateful_set(&namespace, &name).await? else {
        model.set_conditions([Condition::creating()]);
        return Ok(Action::requeue(WORKLOAD_POLL));
    };

    let rollout = match rollout_status(&sts) {
        Ok(rollout) => rollout,
        Err(e) => {
            model.set_conditions([Condition::unavailable()]);
            return Err(e);
        }
    };
    if !rollout.ready {
        debug!(model = %name, message = %rollout.message, "StatefulSet not ready");
        model.set_conditions([Condition::unavailable().with_message(rollout.message)]);
        return Ok(Action::await_change());
    }

    let client = ctx.clients.for_model(model);
    let model_id = model.spec.model.clone();

    let present = client
        .list()
        .await
        .map_err(|e| ModelError::inference("failed to list local models", e))?;

    if !present.contains(&model_id) {
        let pulling = Condition::creating().with_message(format!("Pulling {model_id:?} model"));
        if !model.condition(&pulling.type_).is_some_and(|c| c.equivalent(&pulling)) {
            model.set_conditions([pulling]);
            return Ok(Action::requeue(Duration::ZERO));
        }

        info!(model = %name, ollama_model = %model_id, "Pulling model");
        let object_ref = model.object_ref(&());
        ctx.events
            .publish(
                &object_ref,
                EventType::Normal,
                reasons::PULLING_MODEL,
                actions::PULL,
                Some(format!("Pulling {model_id:?} model")),
            )
            .await;

        let pulled = client
            .pull(&PullRequest {
                model: model_id.clone(),
                insecure: false,
                stream: true,
            })
            .await;
        let last = match pulled {
            Ok(last) => last,
            Err(e) => {
                ctx.events
                    .publish(
                        &object_ref,
                        EventType::Warning,
                        reasons::PULLING_MODEL,
                        actions::PULL,
                        Some(format!("failed to pull {model_id:?} model")),
                    )
                    .await;
                return Err(ModelError::inference(
                    format!("failed to pull {model_id:?} model"),
                    e,
                ));
            }
        };

        metrics::record_pull(&model_id, last.is_success());
        if !last.is_success() {
            warn!(model = %name, status = %last.status, "Model pull did not finish");
            ctx.events
                .publish(
                    &object_ref,
                    EventType::Warning,
                    reasons::PULLING_MODEL,
                    actions::PULL,
                    Some(format!(
                        "pull of {model_id:?} ended with status {:?}",
                        last.status
                    )),
                )
                .await;
            model.set_conditions([Condition::unavailable()
                .with_message("Model hasn't been pulled successfully, retrying")]);
            return Ok(Action::requeue(PULL_RETRY));
        }
    }

    let shown = match client.show(&ShowRequest { model: model_id }).await {
        Ok(shown) => shown,
        Err(e) => {
            model.set_conditions([Condition::unavailable()]);
            return Err(ModelError::inference(
                "while fetching ollama model details",
                e,
            ));
        }
    };

    let details = shown.details;
    let status = model.status.get_or_insert_with(Default::default);
    status.model_details = Some(OllamaModelDetails {
        parameter_size: details.parameter_size,
        quantization_level: details.quantization_level,
        parent_model: details.parent_model,
        format: details.format,
        family: details.family,
        families: details.families.unwrap_or_default(),
    });

    model.set_conditions([Condition::available()]);
    info!(model = %name, "Model ready");
    Ok(Action::await_change())
}

//! Prompt reconciliation controller
//!
//! A Prompt is answered once. The reconciler waits for its Model to report
//! Synced and Ready, persists a "waiting" state, then gathers the options,
//! images and continuation context, runs a single non-streaming generation
//! and records the answer with its timings. Prompts that already carry a
//! response are left alone.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::runtime::reflector::ObjectRef;
use kube::{Client, Resource, ResourceExt};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use ollama_client::types::{GenerateRequest, GenerateResponse};
use ollama_client::ClientProvider;
use ollama_common::crd::{
    Condition, Conditioned, Model, Prompt, PromptResponseMeta, PromptResponseMetrics,
};
use ollama_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use ollama_common::metrics::{self, ReconcileResult};
use ollama_common::{duration, Error, PROMPT_FIELD_MANAGER};

use crate::attachments;
use crate::error::PromptError;

const CONFLICT_RETRY: Duration = Duration::from_secs(1);

/// Reporter name on Events emitted by this controller
pub const CONTROLLER_NAME: &str = PROMPT_FIELD_MANAGER;

const MODEL_MISSING: &str = "Referenced model does not exist";
const MODEL_NOT_READY: &str = "Model is not ready and synced";
const WAITING_FOR_RESPONSE: &str = "Waiting for model response";

/// Kubernetes operations the Prompt reconciler needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PromptKube: Send + Sync {
    /// Fetch a Model, `None` when absent
    async fn get_model(&self, namespace: &str, name: &str) -> Result<Option<Model>, Error>;

    /// Fetch a ConfigMap, `None` when absent
    async fn get_config_map(&self, namespace: &str, name: &str)
        -> Result<Option<ConfigMap>, Error>;

    /// Fetch a Secret, `None` when absent
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Write `prompt.status`, guarded by its resourceVersion
    async fn patch_status(&self, prompt: &Prompt) -> Result<(), Error>;
}

/// [`PromptKube`] backed by the API server
pub struct KubePromptClient {
    client: Client,
}

impl KubePromptClient {
    /// Wrap a client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PromptKube for KubePromptClient {
    async fn get_model(&self, namespace: &str, name: &str) -> Result<Option<Model>, Error> {
        let api: Api<Model> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_status(&self, prompt: &Prompt) -> Result<(), Error> {
        let namespace = prompt
            .namespace()
            .ok_or_else(|| Error::validation(prompt.name_any(), "Prompt must be namespaced"))?;
        let api: Api<Prompt> = Api::namespaced(self.client.clone(), &namespace);
        let patch = serde_json::json!({
            "metadata": {"resourceVersion": prompt.resource_version()},
            "status": prompt.status,
        });
        api.patch_status(
            &prompt.name_any(),
            &PatchParams::apply(PROMPT_FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }
}

/// Shared state of the Prompt controller
pub struct Context {
    /// Kubernetes operations
    pub kube: Arc<dyn PromptKube>,
    /// Inference clients per Model
    pub clients: Arc<dyn ClientProvider>,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
}

impl Context {
    /// Context backed by the API server
    pub fn new(client: Client, clients: Arc<dyn ClientProvider>) -> Self {
        Self {
            kube: Arc::new(KubePromptClient::new(client.clone())),
            clients,
            events: Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME)),
        }
    }

    /// Context built from mocks
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn PromptKube>,
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

/// Prompts in `model`'s namespace whose `modelRef` resolves to it
pub fn prompts_for_model(
    prompts: impl IntoIterator<Item = Arc<Prompt>>,
    model: &Model,
) -> Vec<ObjectRef<Prompt>> {
    let Some(model_namespace) = model.namespace() else {
        return Vec::new();
    };
    let model_name = model.name_any();
    prompts
        .into_iter()
        .filter(|prompt| {
            let Some(namespace) = prompt.namespace() else {
                return false;
            };
            namespace == model_namespace
                && prompt.spec.model_ref.name == model_name
                && prompt.spec.model_ref.namespace_or(&namespace) == model_namespace
        })
        .map(|prompt| ObjectRef::from_obj(prompt.as_ref()))
        .collect()
}

/// Log the error and retry in 30 seconds
pub fn error_policy(prompt: Arc<Prompt>, error: &PromptError, _ctx: Arc<Context>) -> Action {
    warn!(prompt = %prompt.name_any(), error = %error, "Prompt reconcile failed, will retry");
    Action::requeue(Duration::from_secs(30))
}

/// Reconcile one Prompt
#[instrument(skip_all, fields(prompt = %prompt.name_any(), namespace = %prompt.namespace().unwrap_or_default(), otel.kind = "internal"))]
pub async fn reconcile(prompt: Arc<Prompt>, ctx: Arc<Context>) -> Result<Action, PromptError> {
    if prompt.response().is_some() {
        debug!("Prompt already answered");
        return Ok(Action::await_change());
    }

    let started = Instant::now();
    let mut prompt = (*prompt).clone();

    let outcome = reconcile_prompt(&mut prompt, &ctx).await;
    let result = finish(&mut prompt, &ctx, outcome).await;

    let label = if result.is_ok() {
        ReconcileResult::Success
    } else {
        ReconcileResult::Error
    };
    metrics::record_reconcile("Prompt", label, started.elapsed().as_secs_f64());

    match result {
        Err(e) if e.is_conflict() => {
            debug!(error = %e, "Conflict writing Prompt, requeueing");
            Ok(Action::requeue(CONFLICT_RETRY))
        }
        other => other,
    }
}

/// Stamp the generation, set Synced from `outcome` and write status
async fn finish(
    prompt: &mut Prompt,
    ctx: &Context,
    outcome: Result<Action, PromptError>,
) -> Result<Action, PromptError> {
    let generation = prompt.metadata.generation.unwrap_or(0);
    prompt
        .status
        .get_or_insert_with(Default::default)
        .observed_generation = generation;

    match &outcome {
        Ok(_) => prompt.set_conditions([Condition::reconcile_success()]),
        Err(e) => prompt.set_conditions([Condition::reconcile_error(e)]),
    }

    match ctx.kube.patch_status(prompt).await {
        Ok(()) => outcome,
        Err(source) => Err(PromptError::persist(outcome.err(), source)),
    }
}

async fn reconcile_prompt(prompt: &mut Prompt, ctx: &Context) -> Result<Action, PromptError> {
    let name = prompt.name_any();
    let namespace = prompt
        .namespace()
        .ok_or_else(|| Error::validation(&name, "Prompt must be namespaced"))?;

    let model_ref = &prompt.spec.model_ref;
    let model_namespace = model_ref.namespace_or(&namespace).to_string();
    let model = ctx
        .kube
        .get_model(&model_namespace, &model_ref.name)
        .await
        .map_err(PromptError::Model)?;
    let Some(model) = model else {
        debug!(prompt = %name, model = %model_ref.name, "Referenced model does not exist");
        prompt.set_conditions([Condition::unavailable().with_message(MODEL_MISSING)]);
        return Ok(Action::await_change());
    };
    if !model.is_synced_and_ready() {
        prompt.set_conditions([Condition::unavailable().with_message(MODEL_NOT_READY)]);
        return Ok(Action::await_change());
    }

    let waiting = Condition::creating().with_message(WAITING_FOR_RESPONSE);
    if !prompt
        .condition(&waiting.type_)
        .is_some_and(|c| c.equivalent(&waiting))
    {
        prompt.set_conditions([waiting]);
        return Ok(Action::requeue(Duration::ZERO));
    }

    let options = options(prompt.spec.options.as_ref())?;

    let mut images = Vec::with_capacity(prompt.spec.images.len());
    for (index, image) in prompt.spec.images.iter().enumerate() {
        let document = attachments::resolve(ctx.kube.as_ref(), &namespace, image)
            .await
            .map_err(|source| PromptError::ExtractImage { index, source })?;
        let bytes = attachments::decode(&document)
            .map_err(|source| PromptError::DecodeImage { index, source })?;
        images.push(STANDARD.encode(bytes));
    }

    let context = prompt
        .spec
        .context
        .as_deref()
        .filter(|token| !token.is_empty())
        .map(decode_context)
        .transpose()?;

    let request = GenerateRequest {
        model: model.spec.model.clone(),
        prompt: prompt.spec.prompt.clone(),
        suffix: prompt.spec.suffix.clone(),
        system: prompt.spec.system.clone(),
        template: prompt.spec.template.clone(),
        context,
        stream: false,
        raw: false,
        images,
        options,
    };

    info!(prompt = %name, model = %request.model, images = request.images.len(), "Generating response");
    let response = ctx
        .clients
        .for_model(&model)
        .generate(&request)
        .await
        .map_err(PromptError::Generate)?;

    record_response(prompt, &response)?;
    metrics::record_generated_tokens(&request.model, response.eval_count);
    ctx.events
        .publish(
            &prompt.object_ref(&()),
            EventType::Normal,
            reasons::RESPONSE_RECORDED,
            actions::GENERATE,
            Some(format!(
                "Recorded response of {} tokens from {:?}",
                response.eval_count, request.model
            )),
        )
        .await;

    Ok(Action::await_change())
}

fn options(raw: Option<&Value>) -> Result<Option<Map<String, Value>>, PromptError> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map.clone())),
        Some(other) => Err(PromptError::Options(format!(
            "expected an object, got {other}"
        ))),
    }
}

fn decode_context(token: &str) -> Result<Vec<i64>, PromptError> {
    let bytes = STANDARD
        .decode(token)
        .map_err(PromptError::ContextEncoding)?;
    serde_json::from_slice(&bytes).map_err(PromptError::ContextShape)
}

fn encode_context(context: &[i64]) -> Result<String, PromptError> {
    let json = serde_json::to_vec(context).map_err(Error::from)?;
    Ok(STANDARD.encode(json))
}

/// `count` tokens over `nanos` nanoseconds, as `N.NN tokens/s`
fn rate(count: u64, nanos: u64) -> String {
    let per_second = count as f64 / Duration::from_nanos(nanos).as_secs_f64();
    if per_second.is_finite() && per_second > 0.0 {
        format!("{per_second:.2} tokens/s")
    } else {
        "0.00 tokens/s".to_string()
    }
}

fn record_response(prompt: &mut Prompt, response: &GenerateResponse) -> Result<(), PromptError> {
    let context = encode_context(&response.context)?;
    let status = prompt.status.get_or_insert_with(Default::default);
    status.context = context;
    status.response = response.response.trim_end().to_string();
    status.meta = Some(PromptResponseMeta {
        created_at: response.created_at,
    });
    status.metrics = Some(PromptResponseMetrics {
        total_duration: duration::format(Duration::from_nanos(response.total_duration)),
        load_duration: duration::format(Duration::from_nanos(response.load_duration)),
        prompt_eval_count: i64::try_from(response.prompt_eval_count).unwrap_or(i64::MAX),
        prompt_eval_duration: duration::format(Duration::from_nanos(
            response.prompt_eval_duration,
        )),
        prompt_eval_rate: rate(response.prompt_eval_count, response.prompt_eval_duration),
        eval_count: i64::try_from(response.eval_count).unwrap_or(i64::MAX),
        eval_duration: duration::format(Duration::from_nanos(response.eval_duration)),
        eval_rate: rate(response.eval_count, response.eval_duration),
    });
    prompt.set_conditions([Condition::available()]);
    Ok(())
}

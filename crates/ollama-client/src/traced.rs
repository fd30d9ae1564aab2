//! Span-per-call wrapper around an [`OllamaApi`]

use std::future::Future;

use async_trait::async_trait;
use tracing::{field, info_span, Instrument, Span};

use crate::error::InferenceError;
use crate::types::{
    GenerateRequest, GenerateResponse, ListResponse, ProgressResponse, PullRequest, ShowRequest,
    ShowResponse,
};
use crate::OllamaApi;

/// Runs every call of the wrapped client in an `ollama.<op>` client span
pub struct TracedClient<C> {
    inner: C,
}

impl<C: OllamaApi> TracedClient<C> {
    /// Wrap `inner`
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    /// Wrapped client
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

async fn traced<T, F>(span: Span, call: F) -> Result<T, InferenceError>
where
    F: Future<Output = Result<T, InferenceError>>,
{
    let result = call.instrument(span.clone()).await;
    match &result {
        Ok(_) => {
            span.record("otel.status_code", "OK");
        }
        Err(e) => {
            span.record("otel.status_code", "ERROR");
            span.record("error.message", field::display(e));
        }
    }
    result
}

macro_rules! client_span {
    ($name:literal $(, $($fields:tt)+)?) => {
        info_span!(
            $name,
            otel.kind = "client",
            otel.status_code = field::Empty,
            error.message = field::Empty
            $(, $($fields)+)?
        )
    };
}

#[async_trait]
impl<C: OllamaApi> OllamaApi for TracedClient<C> {
    async fn list(&self) -> Result<ListResponse, InferenceError> {
        traced(client_span!("ollama.list"), self.inner.list()).await
    }

    async fn show(&self, request: &ShowRequest) -> Result<ShowResponse, InferenceError> {
        traced(
            client_span!("ollama.show", model = %request.model),
            self.inner.show(request),
        )
        .await
    }

    async fn pull(&self, request: &PullRequest) -> Result<ProgressResponse, InferenceError> {
        traced(
            client_span!("ollama.pull", model = %request.model),
            self.inner.pull(request),
        )
        .await
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, InferenceError> {
        traced(
            client_span!("ollama.generate", model = %request.model, images = request.images.len()),
            self.inner.generate(request),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockOllamaApi;

    #[tokio::test]
    async fn forwards_results_and_errors() {
        let mut inner = MockOllamaApi::new();
        inner
            .expect_list()
            .times(1)
            .returning(|| Ok(ListResponse { models: vec![] }));
        inner.expect_show().times(1).returning(|req| {
            Err(InferenceError::Status {
                op: "show",
                status: 404,
                message: format!("model {:?} not found", req.model),
            })
        });

        let client = TracedClient::new(inner);
        assert!(client.list().await.unwrap().models.is_empty());

        let err = client
            .show(&ShowRequest {
                model: "gemma2:2b".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.op(), "show");
    }
}

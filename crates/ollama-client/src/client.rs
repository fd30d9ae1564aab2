//! HTTP implementation of [`OllamaApi`]

use async_trait::async_trait;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace};

use crate::error::InferenceError;
use crate::types::{
    ErrorBody, GenerateRequest, GenerateResponse, ListResponse, ProgressResponse, PullRequest,
    ShowRequest, ShowResponse,
};
use crate::OllamaApi;

/// Client for one Ollama server
#[derive(Clone)]
pub struct HttpClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpClient {
    /// Client for the server at `base_url` (e.g. `http://gemma.default.svc.cluster.local:11434`)
    pub fn new(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, http }
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(
        &self,
        op: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, InferenceError> {
        let response = request
            .send()
            .await
            .map_err(|source| InferenceError::Transport { op, source })?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|source| InferenceError::Transport { op, source })?;
        let message = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(parsed) => parsed.error,
            Err(_) => body.trim().to_string(),
        };
        Err(InferenceError::Status {
            op,
            status,
            message,
        })
    }

    async fn post_json<B: Serialize + Sync, R: DeserializeOwned>(
        &self,
        op: &'static str,
        path: &str,
        body: &B,
    ) -> Result<R, InferenceError> {
        let response = self
            .send(op, self.http.post(self.url(path)).json(body))
            .await?;
        decode(op, response).await
    }
}

async fn decode<R: DeserializeOwned>(
    op: &'static str,
    response: reqwest::Response,
) -> Result<R, InferenceError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|source| InferenceError::Transport { op, source })?;
    serde_json::from_slice(&bytes).map_err(|e| InferenceError::Decode {
        op,
        message: e.to_string(),
    })
}

/// Parse one NDJSON line of a pull stream. Blank lines yield `None`.
pub(crate) fn parse_progress_line(line: &[u8]) -> Result<Option<ProgressResponse>, InferenceError> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return Ok(None);
    }
    if let Ok(ErrorBody { error }) = serde_json::from_slice::<ErrorBody>(line) {
        return Err(InferenceError::Stream {
            op: "pull",
            message: error,
        });
    }
    serde_json::from_slice(line)
        .map(Some)
        .map_err(|e| InferenceError::Decode {
            op: "pull",
            message: e.to_string(),
        })
}

#[async_trait]
impl OllamaApi for HttpClient {
    async fn list(&self) -> Result<ListResponse, InferenceError> {
        let response = self.send("list", self.http.get(self.url("/api/tags"))).await?;
        decode("list", response).await
    }

    async fn show(&self, request: &ShowRequest) -> Result<ShowResponse, InferenceError> {
        self.post_json("show", "/api/show", request).await
    }

    async fn pull(&self, request: &PullRequest) -> Result<ProgressResponse, InferenceError> {
        let response = self
            .send("pull", self.http.post(self.url("/api/pull")).json(request))
            .await?;

        let mut last = ProgressResponse::default();
        let mut buffer: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| InferenceError::Transport { op: "pull", source })?;
            buffer.extend_from_slice(&chunk);
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if let Some(progress) = parse_progress_line(&line)? {
                    trace!(model = %request.model, status = %progress.status, completed = ?progress.completed, total = ?progress.total, "pull progress");
                    last = progress;
                }
            }
        }
        if let Some(progress) = parse_progress_line(&buffer)? {
            last = progress;
        }

        debug!(model = %request.model, status = %last.status, "pull finished");
        Ok(last)
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, InferenceError> {
        let request = GenerateRequest {
            stream: false,
            ..request.clone()
        };
        self.post_json("generate", "/api/generate", &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::{get, post};
    use axum::Router;

    async fn serve(app: Router) -> HttpClient {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        HttpClient::new(format!("http://{addr}/"), reqwest::Client::new())
    }

    #[test]
    fn progress_lines_parse_and_surface_errors() {
        assert_eq!(parse_progress_line(b"  \n").unwrap(), None);

        let progress = parse_progress_line(br#"{"status":"downloading","digest":"sha256:ab","total":10,"completed":5}"#)
            .unwrap()
            .unwrap();
        assert_eq!(progress.completed, Some(5));

        let err = parse_progress_line(br#"{"error":"pull model manifest: file does not exist"}"#)
            .unwrap_err();
        assert!(matches!(err, InferenceError::Stream { .. }));
    }

    #[tokio::test]
    async fn pull_returns_the_last_streamed_event() {
        let client = serve(Router::new().route(
            "/api/pull",
            post(|| async {
                "{\"status\":\"pulling manifest\"}\n{\"status\":\"downloading\",\"total\":4,\"completed\":4}\n{\"status\":\"success\"}\n"
            }),
        ))
        .await;

        let last = client
            .pull(&PullRequest {
                model: "gemma2:2b".to_string(),
                insecure: false,
                stream: true,
            })
            .await
            .unwrap();
        assert!(last.is_success());
    }

    #[tokio::test]
    async fn pull_stream_ending_early_is_not_success() {
        let client = serve(Router::new().route(
            "/api/pull",
            post(|| async { "{\"status\":\"downloading\",\"total\":4,\"completed\":1}" }),
        ))
        .await;

        let last = client
            .pull(&PullRequest {
                model: "gemma2:2b".to_string(),
                insecure: false,
                stream: true,
            })
            .await
            .unwrap();
        assert_eq!(last.status, "downloading");
        assert!(!last.is_success());
    }

    #[tokio::test]
    async fn error_status_carries_server_message() {
        let client = serve(Router::new().route(
            "/api/show",
            post(|| async {
                (
                    axum::http::StatusCode::NOT_FOUND,
                    "{\"error\":\"model 'gemma2:2b' not found\"}",
                )
            }),
        ))
        .await;

        let err = client
            .show(&ShowRequest {
                model: "gemma2:2b".to_string(),
            })
            .await
            .unwrap_err();
        match err {
            InferenceError::Status {
                status, message, ..
            } => {
                assert_eq!(status, 404);
                assert_eq!(message, "model 'gemma2:2b' not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn list_decodes_tags() {
        let client = serve(Router::new().route(
            "/api/tags",
            get(|| async { r#"{"models":[{"name":"gemma2:2b","model":"gemma2:2b"}]}"# }),
        ))
        .await;

        assert!(client.list().await.unwrap().contains("gemma2:2b"));
    }
}

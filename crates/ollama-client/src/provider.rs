//! Resolves the inference client serving a given Model

use std::sync::Arc;

use kube::ResourceExt;
use ollama_common::crd::Model;
use ollama_common::OLLAMA_PORT;

use crate::client::HttpClient;
use crate::traced::TracedClient;
use crate::OllamaApi;

/// Hands out a client bound to a Model's Service
pub trait ClientProvider: Send + Sync {
    /// Client for the server backing `model`
    fn for_model(&self, model: &Model) -> Arc<dyn OllamaApi>;
}

/// In-cluster URL of the Ollama server for the Model `name` in `namespace`
pub fn model_url(name: &str, namespace: &str) -> String {
    format!("http://{name}.{namespace}.svc.cluster.local:{OLLAMA_PORT}")
}

/// [`ClientProvider`] sharing one connection pool across all Models
#[derive(Clone, Default)]
pub struct HttpClientProvider {
    http: reqwest::Client,
}

impl HttpClientProvider {
    /// Provider issuing requests through `http`
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl ClientProvider for HttpClientProvider {
    fn for_model(&self, model: &Model) -> Arc<dyn OllamaApi> {
        let namespace = model.namespace().unwrap_or_else(|| "default".to_string());
        let url = model_url(&model.name_any(), &namespace);
        Arc::new(TracedClient::new(HttpClient::new(url, self.http.clone())))
    }
}

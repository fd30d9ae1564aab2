//! Client for the Ollama inference API
//!
//! Reconcilers talk to the Ollama server that backs a Model through the
//! [`OllamaApi`] trait. [`HttpClientProvider`] resolves the in-cluster URL of a
//! Model's Service and wraps the HTTP client in [`TracedClient`], so each call
//! runs in its own client span.

#![deny(missing_docs)]

mod client;
mod error;
mod provider;
mod traced;
pub mod types;

pub use client::HttpClient;
pub use error::InferenceError;
pub use provider::{model_url, ClientProvider, HttpClientProvider};
pub use traced::TracedClient;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use types::{
    GenerateRequest, GenerateResponse, ListResponse, ProgressResponse, PullRequest, ShowRequest,
    ShowResponse,
};

/// Operations the operator uses on an Ollama server
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OllamaApi: Send + Sync {
    /// Models already present on the server
    async fn list(&self) -> Result<ListResponse, InferenceError>;

    /// Metadata of a present model
    async fn show(&self, request: &ShowRequest) -> Result<ShowResponse, InferenceError>;

    /// Download a model, returning the last progress event of the stream.
    ///
    /// A stream that ends without a `success` event is not an error.
    async fn pull(&self, request: &PullRequest) -> Result<ProgressResponse, InferenceError>;

    /// Run a non-streaming generation
    async fn generate(&self, request: &GenerateRequest)
        -> Result<GenerateResponse, InferenceError>;
}

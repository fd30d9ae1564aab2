//! Ollama API request and response bodies

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Response of `GET /api/tags`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ListResponse {
    /// Models present on the server
    #[serde(default)]
    pub models: Vec<ListModel>,
}

impl ListResponse {
    /// Whether `model` has already been pulled
    pub fn contains(&self, model: &str) -> bool {
        self.models.iter().any(|m| m.model == model)
    }
}

/// One entry of [`ListResponse`]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ListModel {
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Model identifier, e.g. `gemma2:2b`
    #[serde(default)]
    pub model: String,
    /// Size on disk in bytes
    #[serde(default)]
    pub size: u64,
    /// Content digest
    #[serde(default)]
    pub digest: String,
    /// Model metadata
    #[serde(default)]
    pub details: ModelDetails,
}

/// Model metadata shared by list and show responses
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelDetails {
    /// Model this one was derived from
    #[serde(default)]
    pub parent_model: String,
    /// Weights format, e.g. `gguf`
    #[serde(default)]
    pub format: String,
    /// Primary family
    #[serde(default)]
    pub family: String,
    /// All families
    #[serde(default)]
    pub families: Option<Vec<String>>,
    /// e.g. `2.6B`
    #[serde(default)]
    pub parameter_size: String,
    /// e.g. `Q4_0`
    #[serde(default)]
    pub quantization_level: String,
}

/// Body of `POST /api/show`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShowRequest {
    /// Model identifier
    pub model: String,
}

/// Response of `POST /api/show`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ShowResponse {
    /// Modelfile the model was built from
    #[serde(default)]
    pub modelfile: String,
    /// Default parameters
    #[serde(default)]
    pub parameters: String,
    /// Prompt template
    #[serde(default)]
    pub template: String,
    /// Model metadata
    #[serde(default)]
    pub details: ModelDetails,
}

/// Body of `POST /api/pull`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PullRequest {
    /// Model identifier
    pub model: String,
    /// Allow insecure registries
    #[serde(default)]
    pub insecure: bool,
    /// Stream progress as NDJSON
    pub stream: bool,
}

/// One progress event of a pull
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProgressResponse {
    /// `pulling manifest`, `downloading`, ..., `success`
    #[serde(default)]
    pub status: String,
    /// Layer being transferred
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// Layer size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    /// Bytes transferred so far
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<u64>,
}

/// Status of the final event of a completed pull
pub const PULL_SUCCESS: &str = "success";

impl ProgressResponse {
    /// The pull finished and the model is available
    pub fn is_success(&self) -> bool {
        self.status == PULL_SUCCESS
    }
}

/// Body of `POST /api/generate`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GenerateRequest {
    /// Model identifier
    pub model: String,
    /// Prompt text
    pub prompt: String,
    /// Text after the model response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    /// System prompt override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Template override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Context returned by a previous call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<i64>>,
    /// Stream partial responses
    pub stream: bool,
    /// Bypass the prompt template
    pub raw: bool,
    /// Base64-encoded images
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    /// Model options
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Map<String, Value>>,
}

/// Response of a non-streaming `POST /api/generate`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GenerateResponse {
    /// Model that answered
    #[serde(default)]
    pub model: String,
    /// When the response was produced
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Generated text
    #[serde(default)]
    pub response: String,
    /// Generation finished
    #[serde(default)]
    pub done: bool,
    /// Why generation stopped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
    /// Conversation state for a follow-up call
    #[serde(default)]
    pub context: Vec<i64>,
    /// Total time in nanoseconds
    #[serde(default)]
    pub total_duration: u64,
    /// Model load time in nanoseconds
    #[serde(default)]
    pub load_duration: u64,
    /// Prompt tokens
    #[serde(default)]
    pub prompt_eval_count: u64,
    /// Prompt evaluation time in nanoseconds
    #[serde(default)]
    pub prompt_eval_duration: u64,
    /// Response tokens
    #[serde(default)]
    pub eval_count: u64,
    /// Response generation time in nanoseconds
    #[serde(default)]
    pub eval_duration: u64,
}

/// Error body returned by the server, and embedded in pull streams
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: String,
}

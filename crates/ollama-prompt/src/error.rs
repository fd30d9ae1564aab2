//! Prompt reconciler errors

use ollama_client::InferenceError;
use thiserror::Error;

use crate::attachments::AttachmentError;

/// Error returned by a Prompt reconcile
#[derive(Debug, Error)]
pub enum PromptError {
    /// Kubernetes API or validation failure
    #[error(transparent)]
    Common(#[from] ollama_common::Error),

    /// The referenced Model could not be read
    #[error("failed to fetch model: {0}")]
    Model(#[source] ollama_common::Error),

    /// `spec.options` is not a JSON object
    #[error("failed to unmarshal options into json struct: {0}")]
    Options(String),

    /// An image source could not be resolved
    #[error("failed to extract image {index}: {source}")]
    ExtractImage {
        /// Position in `spec.images`
        index: usize,
        /// Resolution failure
        #[source]
        source: AttachmentError,
    },

    /// An image payload could not be decoded
    #[error("failed to decode images: image {index}: {source}")]
    DecodeImage {
        /// Position in `spec.images`
        index: usize,
        /// Decoding failure
        #[source]
        source: AttachmentError,
    },

    /// `spec.context` is not valid base64
    #[error("failed to decode context: {0}")]
    ContextEncoding(#[source] base64::DecodeError),

    /// `spec.context` does not hold an integer sequence
    #[error("failed to unmarshal context into integer sequence: {0}")]
    ContextShape(#[source] serde_json::Error),

    /// The generation call failed
    #[error("failed to generate prompt: {0}")]
    Generate(#[source] InferenceError),

    /// Status could not be written, possibly on top of an earlier failure
    #[error("{}failed to persist status: {source}", reconcile_prefix(.reconcile))]
    Persist {
        /// Error the reconcile itself returned
        reconcile: Option<Box<PromptError>>,
        /// Status write failure
        #[source]
        source: ollama_common::Error,
    },
}

fn reconcile_prefix(reconcile: &Option<Box<PromptError>>) -> String {
    reconcile
        .as_ref()
        .map(|err| format!("{err}; "))
        .unwrap_or_default()
}

impl PromptError {
    /// Join a status-write failure onto the reconcile outcome
    pub fn persist(reconcile: Option<PromptError>, source: ollama_common::Error) -> Self {
        Self::Persist {
            reconcile: reconcile.map(Box::new),
            source,
        }
    }

    /// An optimistic-concurrency conflict occurred somewhere in the chain
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Common(e) | Self::Model(e) => e.is_conflict(),
            Self::Persist { reconcile, source } => {
                source.is_conflict() || reconcile.as_deref().is_some_and(Self::is_conflict)
            }
            _ => false,
        }
    }
}

//! Model reconciler errors

use ollama_client::InferenceError;
use ollama_patch::PatchError;
use thiserror::Error;

/// Error returned by a Model reconcile
#[derive(Debug, Error)]
pub enum ModelError {
    /// Kubernetes API or validation failure
    #[error(transparent)]
    Common(#[from] ollama_common::Error),

    /// A user patch could not be applied to a rendered child
    #[error("while rendering {object}: {source}")]
    Render {
        /// `statefulset` or `service`
        object: &'static str,
        /// Patch engine failure
        #[source]
        source: PatchError,
    },

    /// Rollout status could not be computed
    #[error("failed to check statefulset readiness: {0}")]
    Readiness(String),

    /// The Ollama server call failed
    #[error("{context}: {source}")]
    Inference {
        /// What the reconciler was doing
        context: String,
        /// Client failure
        #[source]
        source: InferenceError,
    },

    /// Status could not be written, possibly on top of an earlier failure
    #[error("{}failed to persist status: {source}", reconcile_prefix(.reconcile))]
    Persist {
        /// Error the reconcile itself returned
        reconcile: Option<Box<ModelError>>,
        /// Status write failure
        #[source]
        source: ollama_common::Error,
    },
}

fn reconcile_prefix(reconcile: &Option<Box<ModelError>>) -> String {
    match reconcile {
        Some(err) => format!("{err}; "),
        None => String::new(),
    }
}

impl ModelError {
    pub(crate) fn inference(context: impl Into<String>, source: InferenceError) -> Self {
        Self::Inference {
            context: context.into(),
            source,
        }
    }

    /// Join a status-write failure onto the reconcile outcome
    pub fn persist(reconcile: Option<ModelError>, source: ollama_common::Error) -> Self {
        Self::Persist {
            reconcile: reconcile.map(Box::new),
            source,
        }
    }

    /// An optimistic-concurrency conflict occurred somewhere in the chain
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Common(e) => e.is_conflict(),
            Self::Persist { reconcile, source } => {
                source.is_conflict() || reconcile.as_ref().is_some_and(|e| e.is_conflict())
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict() -> ollama_common::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "the object has been modified".to_string(),
            reason: "Conflict".to_string(),
            code: 409,
        })
        .into()
    }

    #[test]
    fn persist_failure_keeps_the_reconcile_error() {
        let err = ModelError::persist(
            Some(ModelError::Readiness("boom".to_string())),
            ollama_common::Error::internal("status", "connection reset"),
        );
        assert_eq!(
            err.to_string(),
            "failed to check statefulset readiness: boom; failed to persist status: internal error [status]: connection reset"
        );
        assert!(!err.is_conflict());
    }

    #[test]
    fn conflicts_are_found_anywhere_in_the_chain() {
        assert!(ModelError::Common(conflict()).is_conflict());
        assert!(ModelError::persist(None, conflict()).is_conflict());
        assert!(ModelError::persist(
            Some(ModelError::Common(conflict())),
            ollama_common::Error::internal("status", "timeout"),
        )
        .is_conflict());
    }
}

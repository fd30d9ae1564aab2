//! Error type shared by the operator's controllers
//!
//! Variants carry the namespaced name of the resource they concern so the
//! message written into a `Synced` condition is actionable on its own.

use thiserror::Error;

/// Main error type for operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A resource's spec cannot be acted upon
    #[error("invalid {resource}: {message}")]
    Validation {
        /// `namespace/name` of the offending resource
        resource: String,
        /// What is wrong
        message: String,
    },

    /// A document could not be encoded or decoded
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where it failed (e.g. "controller", "health")
        context: String,
    },
}

impl Error {
    /// Create a validation error for the given resource
    pub fn validation(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Optimistic-concurrency conflict on write
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube { source } if is_conflict(source))
    }

    /// Referenced object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source } if is_not_found(source))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

/// True when a kube error is a 409 Conflict
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

/// True when a kube error is a 404 Not Found
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

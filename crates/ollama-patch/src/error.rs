//! Patch engine error types

use thiserror::Error;

/// Stage of the patch pipeline an error originated from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchStage {
    /// RFC 7386 merge patch
    Merge,
    /// RFC 6902 JSON patch
    Json,
    /// Key-based strategic merge patch
    Strategic,
}

impl std::fmt::Display for PatchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Merge => write!(f, "merge patch"),
            Self::Json => write!(f, "JSON patch"),
            Self::Strategic => write!(f, "strategic merge patch"),
        }
    }
}

/// Errors returned by [`crate::apply`]
#[derive(Debug, Error)]
pub enum PatchError {
    /// The patch body could not be interpreted against the base manifest's shape
    #[error("while applying {stage}: {message}")]
    Decode {
        /// Pipeline stage that failed
        stage: PatchStage,
        /// Description of the mismatch
        message: String,
    },

    /// The patch was well-formed but could not be applied to the document
    #[error("while applying {stage}: {message}")]
    Apply {
        /// Pipeline stage that failed
        stage: PatchStage,
        /// Description of the failure
        message: String,
    },

    /// Strategic merge requested for a shape without a registered merge-key table
    #[error("while applying strategic merge patch: unsupported patch target {shape}")]
    UnsupportedTarget {
        /// Rust type name of the base manifest
        shape: &'static str,
    },

    /// The base manifest could not be encoded as a document
    #[error("unable to encode {shape} as a document: {source}")]
    Encode {
        /// Rust type name of the base manifest
        shape: &'static str,
        /// Underlying serializer error
        source: serde_json::Error,
    },
}

impl PatchError {
    /// Create a decode error for the given stage
    pub fn decode(stage: PatchStage, message: impl Into<String>) -> Self {
        Self::Decode {
            stage,
            message: message.into(),
        }
    }

    /// Create an apply error for the given stage
    pub fn apply(stage: PatchStage, message: impl Into<String>) -> Self {
        Self::Apply {
            stage,
            message: message.into(),
        }
    }

    /// The pipeline stage this error belongs to, if any
    pub fn stage(&self) -> Option<PatchStage> {
        match self {
            Self::Decode { stage, .. } | Self::Apply { stage, .. } => Some(*stage),
            Self::UnsupportedTarget { .. } => Some(PatchStage::Strategic),
            Self::Encode { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_stage_prefix() {
        let err = PatchError::decode(PatchStage::Merge, "unknown field \"metadata.something\"");
        assert_eq!(
            err.to_string(),
            "while applying merge patch: unknown field \"metadata.something\""
        );

        let err = PatchError::apply(PatchStage::Json, "path /spec/foo does not exist");
        assert!(err.to_string().starts_with("while applying JSON patch:"));
    }

    #[test]
    fn unsupported_target_belongs_to_strategic_stage() {
        let err = PatchError::UnsupportedTarget {
            shape: "serde_json::Value",
        };
        assert_eq!(err.stage(), Some(PatchStage::Strategic));
        assert!(err.to_string().contains("serde_json::Value"));
    }
}

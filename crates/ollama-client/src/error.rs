//! Inference client errors

use thiserror::Error;

/// Failure talking to an Ollama server
#[derive(Debug, Error)]
pub enum InferenceError {
    /// The request could not be sent or the body could not be read
    #[error("ollama {op} request failed: {source}")]
    Transport {
        /// API operation (`list`, `show`, `pull`, `generate`)
        op: &'static str,
        /// Underlying HTTP error
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status
    #[error("ollama {op} returned {status}: {message}")]
    Status {
        /// API operation
        op: &'static str,
        /// HTTP status code
        status: u16,
        /// Server-provided error, or the raw body
        message: String,
    },

    /// The server answered with a body we cannot interpret
    #[error("ollama {op} returned an unreadable body: {message}")]
    Decode {
        /// API operation
        op: &'static str,
        /// Parser error
        message: String,
    },

    /// A streamed response carried an error event
    #[error("ollama {op} failed: {message}")]
    Stream {
        /// API operation
        op: &'static str,
        /// Error reported in the stream
        message: String,
    },
}

impl InferenceError {
    /// API operation that failed
    pub fn op(&self) -> &'static str {
        match self {
            Self::Transport { op, .. }
            | Self::Status { op, .. }
            | Self::Decode { op, .. }
            | Self::Stream { op, .. } => op,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_operation() {
        let err = InferenceError::Status {
            op: "show",
            status: 404,
            message: "model \"gemma2:2b\" not found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "ollama show returned 404: model \"gemma2:2b\" not found"
        );
        assert_eq!(err.op(), "show");
    }
}

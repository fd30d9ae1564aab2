//! Ollama operator: runs Ollama models in the cluster and answers prompts

#![deny(missing_docs)]

/// Model and Prompt controller wiring
pub mod controller_runner;
/// Liveness and readiness endpoints
pub mod health;
/// `render` subcommand
pub mod render;
/// CRD generation and installation
pub mod startup;

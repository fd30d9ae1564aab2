//! Model controller
//!
//! Renders the Ollama server StatefulSet and Service for each `Model`, tracks
//! the rollout, pulls the requested model and records its details.

#![deny(missing_docs)]

pub mod controller;
mod error;
mod readiness;
mod render;

pub use controller::{error_policy, reconcile, Context, KubeModelClient, ModelKube};
pub use error::ModelError;
pub use readiness::{rollout_status, Rollout};
pub use render::{render, Rendered, CONTAINER_NAME, DATA_PATH};

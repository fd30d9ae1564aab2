//! Prompt controller
//!
//! Answers each `Prompt` once its Model is Synced and Ready, resolving image
//! attachments from inline data, ConfigMaps or Secrets.

#![deny(missing_docs)]

mod attachments;
pub mod controller;
mod error;

pub use attachments::{decode as decode_image, AttachmentError};
pub use controller::{
    error_policy, prompts_for_model, reconcile, Context, KubePromptClient, PromptKube,
};
pub use error::PromptError;

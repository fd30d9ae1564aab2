//! Image attachments of a Prompt
//!
//! An attachment is first resolved to an [`ImageData`] document from its one
//! source (inline, ConfigMap key or Secret key), then decoded to raw bytes
//! according to its compression tag.

use std::io::Read;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::GzDecoder;
use ollama_common::crd::{ImageData, ImageFormat, ImageSource, KeySelector};
use thiserror::Error;

use crate::controller::PromptKube;

/// Failure resolving or decoding one attachment
#[derive(Debug, Error)]
pub enum AttachmentError {
    /// Zero or several sources were set
    #[error("image must set exactly one of inline, configMapKeyRef or secretKeyRef, found {found}")]
    Source {
        /// Number of sources set
        found: usize,
    },

    /// The referenced object could not be read
    #[error("failed to get {kind} {namespace}/{name}: {source}")]
    Lookup {
        /// `configmap` or `secret`
        kind: &'static str,
        /// Object namespace
        namespace: String,
        /// Object name
        name: String,
        /// API failure
        #[source]
        source: ollama_common::Error,
    },

    /// The referenced object does not exist
    #[error("{kind} {namespace}/{name} not found")]
    MissingObject {
        /// `configmap` or `secret`
        kind: &'static str,
        /// Object namespace
        namespace: String,
        /// Object name
        name: String,
    },

    /// The referenced object has no such key
    #[error("key {key:?} not found in {kind} {namespace}/{name}")]
    MissingKey {
        /// `configmap` or `secret`
        kind: &'static str,
        /// Object namespace
        namespace: String,
        /// Object name
        name: String,
        /// Requested key
        key: String,
    },

    /// The key's value is not an image document
    #[error("failed to unmarshal image data: {0}")]
    Document(#[source] serde_yaml::Error),

    /// The payload is not valid base64
    #[error("failed to decode image in base64: {0}")]
    Base64(#[source] base64::DecodeError),

    /// The payload could not be decompressed
    #[error("while decompressing image encoded in {format}: {source}")]
    Decompress {
        /// Declared compression
        format: ImageFormat,
        /// Decoder failure
        #[source]
        source: std::io::Error,
    },
}

const CONFIG_MAP: &str = "configmap";
const SECRET: &str = "secret";

/// Resolve `image` to its image document.
///
/// Key references without a namespace resolve in `prompt_namespace`.
pub(crate) async fn resolve(
    kube: &dyn PromptKube,
    prompt_namespace: &str,
    image: &ImageSource,
) -> Result<ImageData, AttachmentError> {
    match (
        &image.inline,
        &image.config_map_key_ref,
        &image.secret_key_ref,
    ) {
        (Some(inline), None, None) => Ok(inline.clone()),
        (None, Some(selector), None) => {
            let namespace = selector_namespace(selector, prompt_namespace);
            let config_map = kube
                .get_config_map(namespace, &selector.name)
                .await
                .map_err(|source| lookup_error(CONFIG_MAP, namespace, selector, source))?
                .ok_or_else(|| missing_object(CONFIG_MAP, namespace, selector))?;
            let raw = config_map
                .data
                .as_ref()
                .and_then(|data| data.get(&selector.key))
                .ok_or_else(|| missing_key(CONFIG_MAP, namespace, selector))?;
            serde_yaml::from_str(raw).map_err(AttachmentError::Document)
        }
        (None, None, Some(selector)) => {
            let namespace = selector_namespace(selector, prompt_namespace);
            let secret = kube
                .get_secret(namespace, &selector.name)
                .await
                .map_err(|source| lookup_error(SECRET, namespace, selector, source))?
                .ok_or_else(|| missing_object(SECRET, namespace, selector))?;
            let raw = secret
                .data
                .as_ref()
                .and_then(|data| data.get(&selector.key))
                .ok_or_else(|| missing_key(SECRET, namespace, selector))?;
            serde_yaml::from_slice(&raw.0).map_err(AttachmentError::Document)
        }
        (inline, config_map, secret) => Err(AttachmentError::Source {
            found: [inline.is_some(), config_map.is_some(), secret.is_some()]
                .into_iter()
                .filter(|set| *set)
                .count(),
        }),
    }
}

/// Decode an image document to raw bytes
pub fn decode(image: &ImageData) -> Result<Vec<u8>, AttachmentError> {
    let bytes = STANDARD
        .decode(image.data.trim())
        .map_err(AttachmentError::Base64)?;

    let decompressed = match image.format {
        ImageFormat::None => return Ok(bytes),
        ImageFormat::Gzip => {
            let mut out = Vec::new();
            GzDecoder::new(bytes.as_slice())
                .read_to_end(&mut out)
                .map(|_| out)
        }
        ImageFormat::Zstd => zstd::stream::decode_all(bytes.as_slice()),
    };
    decompressed.map_err(|source| AttachmentError::Decompress {
        format: image.format,
        source,
    })
}

fn selector_namespace<'a>(selector: &'a KeySelector, prompt_namespace: &'a str) -> &'a str {
    match selector.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => ns,
        _ => prompt_namespace,
    }
}

fn lookup_error(
    kind: &'static str,
    namespace: &str,
    selector: &KeySelector,
    source: ollama_common::Error,
) -> AttachmentError {
    AttachmentError::Lookup {
        kind,
        namespace: namespace.to_string(),
        name: selector.name.clone(),
        source,
    }
}

fn missing_object(kind: &'static str, namespace: &str, selector: &KeySelector) -> AttachmentError {
    AttachmentError::MissingObject {
        kind,
        namespace: namespace.to_string(),
        name: selector.name.clone(),
    }
}

fn missing_key(kind: &'static str, namespace: &str, selector: &KeySelector) -> AttachmentError {
    AttachmentError::MissingKey {
        kind,
        namespace: namespace.to_string(),
        name: selector.name.clone(),
        key: selector.key.clone(),
    }
}

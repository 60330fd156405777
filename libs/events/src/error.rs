//! Error types for envelope and definition handling.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single human-readable reason a value failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationCause {
    pub message: String,
}

impl ValidationCause {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Errors that can occur when handling envelopes and definitions.
#[derive(Debug, Error, Clone)]
pub enum EventError {
    /// The request body is not a JSON object.
    #[error("unable to parse request body: {0}")]
    Body(String),

    /// The `metadata` key is absent.
    #[error("the metadata section is missing from the request body")]
    MetadataMissing,

    /// The `payload` key is absent.
    #[error("the payload section is missing from the request body")]
    PayloadMissing,

    /// The metadata section does not have the envelope shape.
    #[error("the metadata section does not match the envelope schema")]
    Metadata(Vec<ValidationCause>),

    /// The embedded metadata schema failed to compile.
    #[error("invalid metadata schema: {0}")]
    MetadataSchema(String),

    /// A definition-source resource has the wrong shape for its kind.
    #[error("invalid {kind} resource: {message}")]
    InvalidResource { kind: &'static str, message: String },
}

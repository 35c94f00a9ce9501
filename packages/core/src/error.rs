//! Error types shared across the job system.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A submission payload failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Failure of a single job attempt.
///
/// Messages are shown to users polling job status, so they must stay short
/// and must not echo payload contents.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum HandlerError {
    /// Retrying cannot help (missing input, unknown operation, bad payload).
    #[error("{0}")]
    Permanent(String),
    /// A collaborator was slow or unavailable; the queue may retry.
    #[error("{0}")]
    Transient(String),
}

impl HandlerError {
    pub fn permanent(message: impl Into<String>) -> Self {
        HandlerError::Permanent(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        HandlerError::Transient(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            HandlerError::Permanent(message) | HandlerError::Transient(message) => message,
        }
    }
}

impl From<ValidationError> for HandlerError {
    fn from(err: ValidationError) -> Self {
        HandlerError::Permanent(err.to_string())
    }
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::NodeId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCode {
    Required,
    Rejected,
}

/// A single failed rule reported by a node's validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub code: ValidationCode,
    pub message: String,
}

impl ValidationError {
    pub fn new(code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ValidationCode::Rejected, message)
    }
}

#[derive(Debug, Error)]
pub enum FormError {
    #[error("node {0:?} is not an array")]
    NotAnArray(NodeId),
    #[error("node {0:?} has no children")]
    NotAComposite(NodeId),
    #[error("index {index} out of range for collection of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("failed to encode value: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode value: {0}")]
    Decode(#[source] serde_json::Error),
}

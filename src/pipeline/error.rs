//! Pipeline error taxonomy.

use crate::interfaces::ItemKey;
use crate::writer::{ConflictError, OperationError};

/// Argument rejected before a pipeline is built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid {field}: {message}")]
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

/// Terminal error of a pipeline execution.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error("Not found: {0}")]
    NotFound(ItemKey),

    #[error("Transient store failure: {0}")]
    TransientStore(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Stash value '{key}' unusable: {message}")]
    Stash { key: String, message: String },
}

impl PipelineError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    /// Stable tag handed to the transport layer.
    ///
    /// Conflicts carry their reason: `conflict:duplicate_vote`.
    pub fn code(&self) -> String {
        match self {
            Self::Conflict(conflict) => format!("conflict:{}", conflict.reason),
            Self::NotFound(_) => "not_found".to_string(),
            Self::TransientStore(_) => "unavailable".to_string(),
            Self::Validation(_) => "validation".to_string(),
            Self::InvalidOperation(_) | Self::Stash { .. } => "invalid_operation".to_string(),
        }
    }

    pub fn conflict(&self) -> Option<&ConflictError> {
        match self {
            Self::Conflict(conflict) => Some(conflict),
            _ => None,
        }
    }
}

impl From<OperationError> for PipelineError {
    fn from(err: OperationError) -> Self {
        match err {
            OperationError::Conflict(conflict) => Self::Conflict(conflict),
            OperationError::NotFound(key) => Self::NotFound(key),
            OperationError::Unavailable(message) => Self::TransientStore(message),
            OperationError::Invalid(message) => Self::InvalidOperation(message),
        }
    }
}

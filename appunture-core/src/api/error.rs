use thiserror::Error;

use crate::models::{EntityType, OperationKind};

/// Failure of a remote call.
///
/// [`ApiError::is_retryable`] decides whether the engine spends another
/// attempt or parks the record as failed straight away.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {message}")]
    Server { status: u16, message: String },

    #[error("HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Unsupported operation: {kind} {entity}")]
    Unsupported {
        entity: EntityType,
        kind: OperationKind,
    },

    #[error("Cannot read image {path}: {message}")]
    LocalFile { path: String, message: String },
}

impl ApiError {
    /// Classifies a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            408 | 429 | 500..=599 => ApiError::Server { status, message },
            _ => ApiError::Rejected { status, message },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Timeout | ApiError::Network(_) | ApiError::Server { .. }
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Server { status, .. } | ApiError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

use thiserror::Error;

use crate::security::SecurityError;

#[derive(Error, Debug)]
pub enum FlowDeckError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    InvalidValue(#[from] ParseEnumError),

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Security error: {0}")]
    Security(#[from] SecurityError),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl FlowDeckError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }
}

/// Raised when a stored or submitted string does not name a known enum variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {kind}: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

pub type Result<T> = std::result::Result<T, FlowDeckError>;

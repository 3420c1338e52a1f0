//! Error types for strata

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message reported whenever a write is attempted in read-only mode.
pub const READ_ONLY_MESSAGE: &str = "Write action(s) not allowed in Read-Only Mode.";

/// Core error type for strata operations
#[derive(Error, Debug)]
pub enum StrataError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Invalid filter: {0}")]
    FilterValidation(String),

    #[error("Invalid change: {0}")]
    InvalidChange(String),

    #[error("{}", READ_ONLY_MESSAGE)]
    ReadOnlyViolation,

    #[error("Write error: {0}")]
    Write(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cancelled")]
    Cancelled,
}

impl StrataError {
    /// Category of this error, stable across process or task boundaries.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StrataError::Connection(_) => ErrorKind::Connection,
            StrataError::Query(_) => ErrorKind::Query,
            StrataError::FilterValidation(_) => ErrorKind::FilterValidation,
            StrataError::InvalidChange(_) => ErrorKind::InvalidChange,
            StrataError::ReadOnlyViolation => ErrorKind::ReadOnlyViolation,
            StrataError::Write(_) | StrataError::Io(_) => ErrorKind::Write,
            StrataError::Driver(_) => ErrorKind::Driver,
            StrataError::Configuration(_) => ErrorKind::Configuration,
            StrataError::NotSupported(_) => ErrorKind::NotSupported,
            StrataError::Serialization(_) => ErrorKind::Serialization,
            StrataError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// True for the cooperative-cancellation signal, which callers treat as a
    /// normal outcome rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StrataError::Cancelled)
    }
}

/// Serializable error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Query,
    FilterValidation,
    InvalidChange,
    ReadOnlyViolation,
    Write,
    Driver,
    Configuration,
    NotSupported,
    Serialization,
    Cancelled,
    Internal,
}

/// Result type alias for strata operations
pub type Result<T> = std::result::Result<T, StrataError>;

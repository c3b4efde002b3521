//! cogmem error types

use thiserror::Error;

/// cogmem error type
#[derive(Error, Debug)]
pub enum Error {
    /// No state exists for the requested session, primer or insight
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed envelope, identifier or argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The per-session lock could not be acquired within the bounded wait
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    /// Knowledge store (or another external collaborator) is absent or slow
    #[error("External service unavailable: {0}")]
    ExternalUnavailable(String),

    /// Attempted save of a structurally invalid document
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errors the dispatcher recovers from silently: they degrade to a
    /// neutral response without being worth a warning.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::ExternalUnavailable(_))
    }
}

/// Result type alias for cogmem operations
pub type Result<T> = std::result::Result<T, Error>;

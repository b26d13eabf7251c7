//! Error types for the registry core.

use thiserror::Error;

/// Errors surfaced by registry operations.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The posted payload was not a JSON object
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The in-memory collection was updated but the backend rejected the write
    #[error("Failed to update data: {0}")]
    PersistenceWriteFailed(#[source] PersistenceError),
}

impl RegistryError {
    /// Returns `true` if this error was caused by the caller's input.
    pub fn is_invalid_payload(&self) -> bool {
        matches!(self, RegistryError::InvalidPayload(_))
    }
}

/// Errors raised by persistence backends.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Local filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be encoded or decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Remote backend transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote backend answered with a non-success status
    #[error("{backend} responded with {status}: {body}")]
    Status {
        backend: &'static str,
        status: u16,
        body: String,
    },

    /// Stored data had an unexpected shape
    #[error("Corrupt data: {0}")]
    Corrupt(String),
}

/// Startup configuration failures.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A required environment variable is not set
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    /// An environment variable holds an unusable value
    #[error("invalid value {value:?} for {var}")]
    InvalidValue { var: &'static str, value: String },

    /// The requested backend name is not recognised
    #[error("unknown backend {0:?} (expected memory, file, gist or firebase)")]
    UnknownBackend(String),
}

/// Raised when values at the sort key cannot be ordered against each other.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SortError {
    #[error("values at key {key:?} are not mutually comparable ({found})")]
    Incomparable { key: String, found: String },
}

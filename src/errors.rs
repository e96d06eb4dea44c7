//! Crate-wide error type.

use thiserror::Error;

/// Errors raised by the storage layer, configuration and the HTTP collaborators.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("network error: {0}")]
    NetworkError(String),

    /// A remote API answered but the payload we need was missing or unusable.
    #[error("upstream data missing: {0}")]
    UpstreamMissing(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type BatchResult<T> = Result<T, BatchError>;

impl From<sqlx::Error> for BatchError {
    fn from(err: sqlx::Error) -> Self {
        BatchError::DatabaseError(err.to_string())
    }
}

impl From<reqwest::Error> for BatchError {
    fn from(err: reqwest::Error) -> Self {
        BatchError::NetworkError(err.to_string())
    }
}

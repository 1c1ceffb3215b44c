//! Error types for fieldlimit.

use thiserror::Error;

use crate::interpolate::InterpolationError;

/// Main error type for fieldlimit operations.
///
/// Exceeding a rate limit is not an error; it is reported as a
/// [`Decision::Reject`](crate::ratelimit::Decision::Reject).
#[derive(Error, Debug)]
pub enum FieldLimitError {
    /// Invalid configuration, rejected before any request is served
    #[error("Configuration error: {0}")]
    Config(String),

    /// The identifier template could not be resolved for a request
    #[error("Identifier interpolation failed: {0}")]
    Interpolation(#[from] InterpolationError),

    /// The limiter was used after its session ended
    #[error("Rate limiter has been torn down")]
    TornDown,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A background task panicked or was aborted
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// JSON encoding/decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for fieldlimit operations.
pub type Result<T> = std::result::Result<T, FieldLimitError>;

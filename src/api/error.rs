//! Compatibility API error types.

use thiserror::Error;

use crate::backend::BackendError;

/// Result type for compatibility API operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors raised by the vault, metadata cache and workspace facades.
///
/// These reach plugin code as rejected promises carrying the `Display` text.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No file at this path.
    #[error("File does not exist: {0}")]
    FileNotFound(String),

    /// Path names a folder where a file was expected.
    #[error("Not a file: {0}")]
    NotAFile(String),

    /// Something already occupies the target path.
    #[error("Destination file already exists: {0}")]
    AlreadyExists(String),

    /// Unknown leaf id.
    #[error("No such leaf: {0}")]
    LeafNotFound(String),

    /// Backend call failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// YAML conversion failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON conversion failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

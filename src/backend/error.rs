//! Backend error types.

use thiserror::Error;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors surfaced by a storage backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Requested path or plugin does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Target path already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Path is absolute, escapes the vault, or is otherwise unusable.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON payload.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Command name not understood by this backend.
    #[error("Unknown backend command: {0}")]
    UnknownCommand(String),

    /// Parameters did not match what the command expects.
    #[error("Invalid arguments for '{command}': {reason}")]
    InvalidArgs { command: String, reason: String },

    /// The call did not complete in time.
    #[error("Backend command '{command}' timed out after {millis}ms")]
    Timeout { command: String, millis: u64 },

    /// Any other failure reported by the backend.
    #[error("{0}")]
    Failed(String),
}

impl BackendError {
    /// Whether this error means the target simply does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

//! Driver-side error type.

/// Errors raised by driver implementations and the instance layer above them.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("invalid driver configuration: {0}")]
    InvalidConfig(String),

    #[error("storage not initialized")]
    NotInitialized,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Failed(String),
}

pub type Result<T> = std::result::Result<T, DriverError>;

//! Host-side error type.

use lode_driver::DriverError;
use lode_rpc::SessionError;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Nothing is connected at all. Distinct from a lookup that failed on
    /// every connected manager.
    #[error("no connected driver managers")]
    NoManagers,

    #[error("driver {0} not found on any connected manager")]
    DriverNotFound(String),

    #[error("driver instance {0} not found on any connected manager")]
    InstanceNotFound(String),

    #[error("driver manager {0} is not connected")]
    ManagerNotFound(String),

    #[error("unexpected response shape: {0}")]
    BadResponse(String),
}

impl HostError {
    /// The wire error code of the remote failure, if this was one.
    #[must_use]
    pub fn remote_code(&self) -> Option<i32> {
        match self {
            HostError::Session(e) => e.remote_code(),
            _ => None,
        }
    }
}

impl From<HostError> for DriverError {
    fn from(err: HostError) -> Self {
        match &err {
            HostError::Session(SessionError::Remote(info)) if info.code == lode_rpc::CODE_NOT_FOUND => {
                DriverError::ObjectNotFound(info.message.clone())
            }
            _ => DriverError::Failed(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, HostError>;

//! Manager-side error type and its mapping onto wire error codes.

use lode_driver::DriverError;
use lode_rpc::ErrorInfo;

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("{0}")]
    BadParams(String),

    #[error("driver {0} not found")]
    UnknownDriver(String),

    #[error("driver instance {0} not found")]
    InstanceNotFound(String),

    #[error("driver instance {0} already exists")]
    DuplicateInstance(String),

    #[error("driver instance {0} is disabled")]
    InstanceDisabled(String),

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ManagerError {
    /// The wire representation: 400 for protocol misuse, 404 for names that
    /// do not resolve, 500 for everything that failed while actually running.
    #[must_use]
    pub fn to_error_info(&self) -> ErrorInfo {
        match self {
            ManagerError::BadParams(_) => ErrorInfo::bad_request(self.to_string()),
            ManagerError::UnknownDriver(_) | ManagerError::InstanceNotFound(_) => {
                ErrorInfo::not_found(self.to_string())
            }
            _ => ErrorInfo::driver_error(self.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ManagerError>;

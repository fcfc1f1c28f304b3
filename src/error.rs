//! Public error taxonomy.
//!
//! Lower-level errors convert into `PackageError` at the package boundary.
//! Nothing is retried; construction failures leave nothing behind.

use thiserror::Error;

use crate::config::ConfigError;
use crate::engine::{BackendError, DeviceError, ExecutionError};
use crate::models::{LoadError, ManifestError};
use crate::scheduler::{DispatchError, PoolError};
use crate::tensor::TensorError;

#[derive(Error, Debug)]
pub enum PackageError {
    /// Package path or model name does not exist.
    #[error("Package not found: {0}")]
    PackageNotFound(String),

    /// Package exists but is malformed, incompatible or fails to link.
    #[error("Invalid package: {0}")]
    PackageFormat(String),

    /// Requested device is absent or unusable for this model.
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Handle released, or an unknown id was supplied.
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Loader settings are unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Backend failure. Displays the backend's text unchanged.
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl From<LoadError> for PackageError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::NotFound(_) | LoadError::ModelNotFound { .. } => {
                PackageError::PackageNotFound(err.to_string())
            }
            other => PackageError::PackageFormat(other.to_string()),
        }
    }
}

impl From<ManifestError> for PackageError {
    fn from(err: ManifestError) -> Self {
        PackageError::PackageFormat(err.to_string())
    }
}

impl From<DeviceError> for PackageError {
    fn from(err: DeviceError) -> Self {
        PackageError::DeviceUnavailable(err.to_string())
    }
}

impl From<BackendError> for PackageError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::UnsupportedDevice { .. } => {
                PackageError::DeviceUnavailable(err.to_string())
            }
            other => PackageError::PackageFormat(other.to_string()),
        }
    }
}

impl From<PoolError> for PackageError {
    fn from(err: PoolError) -> Self {
        PackageError::InvalidHandle(err.to_string())
    }
}

impl From<DispatchError> for PackageError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Pool(e) => e.into(),
            DispatchError::Execution(e) => PackageError::Execution(e),
        }
    }
}

impl From<TensorError> for PackageError {
    fn from(err: TensorError) -> Self {
        PackageError::Execution(ExecutionError::Backend(err.to_string()))
    }
}

impl From<ConfigError> for PackageError {
    fn from(err: ConfigError) -> Self {
        PackageError::InvalidConfig(err.to_string())
    }
}

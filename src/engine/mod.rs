//! Execution engine module.
//!
//! Defines the runner and backend seams, device discovery and the
//! built-in signature backend.

pub mod backend;
pub mod device;
mod device_manager;
pub mod error;
pub mod signature;

pub use backend::{BackendError, BackendRegistry, KernelBackend, LinkRequest, ModelRunner};
pub use device::{Device, DeviceError, DeviceKind, DeviceSelector, HOST_DEVICE_INDEX};
pub use device_manager::DeviceManager;
pub use error::ExecutionError;
pub use signature::{SignatureBackend, SignatureRunner, SIGNATURE_BACKEND};

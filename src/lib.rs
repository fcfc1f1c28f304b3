//! modelpack-core
//!
//! Loads compiled model packages and executes them over a fixed-size pool
//! of runners.
//!
//! # Components
//!
//! - **Tensors**: shared-storage tensor values, ownership-tagged handles,
//!   and an id-keyed table for callers that cannot hold references.
//! - **Packages**: `package.json` manifests, memory-mapped constants,
//!   and the `ModelPackage` handle.
//! - **Engine**: device discovery, backend linking, the built-in
//!   signature backend.
//! - **Scheduler**: runner pool with exclusive checkout, and the
//!   dispatcher that guarantees exclusively owned outputs.
//!
//! # Example
//!
//! ```no_run
//! use modelpack_core::{ModelPackage, Tensor, DType};
//!
//! let package = ModelPackage::open("resnet.pkg", "forward", false, 4, 0)?;
//! let input = Tensor::zeros(DType::F32, vec![1, 3, 224, 224])?;
//! let outputs = package.run(&[input])?;
//! assert_eq!(outputs[0].shape(), &[1, 1000]);
//! package.release()?;
//! # Ok::<(), modelpack_core::PackageError>(())
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod scheduler;
pub mod telemetry;
pub mod tensor;

use std::collections::HashMap;
use std::path::Path;

pub use config::LoaderConfig;
pub use engine::{
    BackendRegistry, Device, DeviceKind, DeviceManager, ExecutionError, KernelBackend, ModelRunner,
};
pub use error::PackageError;
pub use models::{
    ModelPackage, ModelPackageBuilder, PackageId, PackageInfo, PackageRegistry, PackageState,
};
pub use scheduler::ThreadingMode;
pub use tensor::{DType, Ownership, Tensor, TensorHandle, TensorId, TensorTable};

/// Id-based front end over open packages and caller tensors.
pub struct Runtime {
    config: LoaderConfig,
    devices: DeviceManager,
    backends: BackendRegistry,
    packages: PackageRegistry,
    tensors: TensorTable,
}

impl Runtime {
    /// Create a runtime that detects devices and uses the built-in backends.
    pub fn new(config: LoaderConfig) -> Self {
        Self::with_parts(config, DeviceManager::detect(), BackendRegistry::with_defaults())
    }

    /// Create a runtime configured from `MODELPACK_*` environment variables.
    pub fn from_env() -> Self {
        Self::new(config::load())
    }

    pub fn with_parts(
        config: LoaderConfig,
        devices: DeviceManager,
        backends: BackendRegistry,
    ) -> Self {
        telemetry::describe_metrics();
        Self {
            config,
            devices,
            backends,
            packages: PackageRegistry::new(),
            tensors: TensorTable::new(),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn devices(&self) -> &DeviceManager {
        &self.devices
    }

    pub fn packages(&self) -> &PackageRegistry {
        &self.packages
    }

    pub fn tensors(&self) -> &TensorTable {
        &self.tensors
    }

    fn builder(&self, path: &Path) -> ModelPackageBuilder {
        ModelPackage::builder(path)
            .config(&self.config)
            .device_manager(self.devices.clone())
            .backends(self.backends.clone())
    }

    /// Open a package with the runtime's configured settings.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<PackageId, PackageError> {
        let package = self.builder(path.as_ref()).build()?;
        Ok(self.packages.insert(package))
    }

    /// Open a package with explicit settings.
    pub fn open_with(
        &self,
        path: impl AsRef<Path>,
        model_name: &str,
        single_threaded: bool,
        num_runners: usize,
        device_index: i8,
    ) -> Result<PackageId, PackageError> {
        let package = self
            .builder(path.as_ref())
            .model_name(model_name)
            .single_threaded(single_threaded)
            .num_runners(num_runners)
            .device_index(device_index)
            .build()?;
        Ok(self.packages.insert(package))
    }

    pub fn load_metadata_from_package(
        &self,
        path: impl AsRef<Path>,
        model_name: &str,
    ) -> Result<HashMap<String, String>, PackageError> {
        ModelPackage::load_metadata_from_package(path, model_name)
    }

    pub fn package(&self, id: PackageId) -> Result<ModelPackage, PackageError> {
        self.packages.get(id)
    }

    /// Register a caller tensor.
    pub fn insert_tensor(&self, tensor: Tensor) -> TensorId {
        self.tensors.insert(tensor)
    }

    /// Move a tensor out to the caller.
    pub fn take_tensor(&self, id: TensorId) -> Result<Tensor, PackageError> {
        self.tensors
            .take(id)
            .ok_or_else(|| PackageError::InvalidHandle(format!("unknown {}", id)))
    }

    pub fn release_tensor(&self, id: TensorId) -> Result<(), PackageError> {
        if self.tensors.release(id) {
            Ok(())
        } else {
            Err(PackageError::InvalidHandle(format!("unknown {}", id)))
        }
    }

    /// Run with borrowed table tensors.
    pub fn run(
        &self,
        package: PackageId,
        inputs: &[TensorId],
    ) -> Result<Vec<TensorId>, PackageError> {
        self.packages.get(package)?.run_ids(&self.tensors, inputs)
    }

    /// Run with table tensors consumed.
    pub fn boxed_run(
        &self,
        package: PackageId,
        inputs: &[TensorId],
    ) -> Result<Vec<TensorId>, PackageError> {
        self.packages.get(package)?.boxed_run_ids(&self.tensors, inputs)
    }

    pub fn release(&self, package: PackageId) -> Result<(), PackageError> {
        self.packages.release(package)
    }
}

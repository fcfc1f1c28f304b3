//! Model package handle: loading, introspection, execution and release.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use uuid::Uuid;

use super::constants::ConstantSet;
use super::loader::{self, PackageDir};
use crate::config::{default_max_runners, LoaderConfig, DEFAULT_MODEL_NAME};
use crate::engine::{
    BackendError, BackendRegistry, Device, DeviceKind, DeviceManager, DeviceSelector,
    ExecutionError, LinkRequest, HOST_DEVICE_INDEX,
};
use crate::error::PackageError;
use crate::scheduler::{ExecutionDispatcher, PoolStats, ThreadingMode};
use crate::telemetry::{self, PackageSpan, SpanExt};
use crate::tensor::{Tensor, TensorId, TensorTable};

/// Attributes fixed when a package is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageInfo {
    pub path: PathBuf,
    pub model_name: String,
    pub backend: String,
    /// Device kind the model was compiled for.
    pub target: DeviceKind,
    pub threading: ThreadingMode,
    pub num_runners: usize,
    pub device: Device,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageState {
    Ready,
    Released,
}

/// Everything released together when the handle is released.
struct LoadedModel {
    metadata: HashMap<String, String>,
    call_spec: Vec<String>,
    constants: Arc<ConstantSet>,
    dispatcher: ExecutionDispatcher,
}

struct PackageInner {
    id: Uuid,
    info: PackageInfo,
    loaded: RwLock<Option<Arc<LoadedModel>>>,
}

/// Handle to a loaded model.
///
/// Clones share the same loaded model. The model and its runners are freed
/// by `release` or when the last clone is dropped. Calls already running
/// when `release` happens finish normally.
#[derive(Clone)]
pub struct ModelPackage {
    inner: Arc<PackageInner>,
}

impl ModelPackage {
    /// Open `model_name` from the package at `path`.
    ///
    /// A negative `device_index` selects the host. When `single_threaded`
    /// is set exactly one runner is created and `num_runners` is ignored.
    pub fn open(
        path: impl AsRef<Path>,
        model_name: &str,
        single_threaded: bool,
        num_runners: usize,
        device_index: i8,
    ) -> Result<Self, PackageError> {
        Self::builder(path)
            .model_name(model_name)
            .single_threaded(single_threaded)
            .num_runners(num_runners)
            .device_index(device_index)
            .build()
    }

    /// Open with default settings.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PackageError> {
        Self::builder(path).build()
    }

    pub fn builder(path: impl AsRef<Path>) -> ModelPackageBuilder {
        ModelPackageBuilder::new(path)
    }

    /// Metadata of a packaged model without loading it.
    pub fn load_metadata_from_package(
        path: impl AsRef<Path>,
        model_name: &str,
    ) -> Result<HashMap<String, String>, PackageError> {
        Ok(loader::load_metadata_from_package(path, model_name)?)
    }

    /// Per-instance identifier, also recorded on tracing spans.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn info(&self) -> &PackageInfo {
        &self.inner.info
    }

    pub fn state(&self) -> PackageState {
        if self.inner.loaded.read().is_some() {
            PackageState::Ready
        } else {
            PackageState::Released
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == PackageState::Ready
    }

    fn loaded(&self) -> Result<Arc<LoadedModel>, PackageError> {
        self.inner
            .loaded
            .read()
            .clone()
            .ok_or_else(|| {
                PackageError::InvalidHandle(format!("package {} has been released", self.inner.id))
            })
    }

    pub fn get_metadata(&self) -> Result<HashMap<String, String>, PackageError> {
        Ok(self.loaded()?.metadata.clone())
    }

    pub fn get_call_spec(&self) -> Result<Vec<String>, PackageError> {
        Ok(self.loaded()?.call_spec.clone())
    }

    /// Constant names in manifest order.
    pub fn get_constant_fqns(&self) -> Result<Vec<String>, PackageError> {
        Ok(self.loaded()?.constants.fqns())
    }

    pub fn pool_stats(&self) -> Result<PoolStats, PackageError> {
        Ok(self.loaded()?.dispatcher.pool_stats())
    }

    /// Run with borrowed inputs. Blocks until a runner is free.
    pub fn run(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>, PackageError> {
        let loaded = self.loaded()?;
        Ok(loaded.dispatcher.run(inputs)?)
    }

    /// Run with consumed inputs. The backend may reuse their storage for
    /// outputs; results are the same as `run`.
    pub fn boxed_run(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>, PackageError> {
        let loaded = self.loaded()?;
        Ok(loaded.dispatcher.boxed_run(inputs)?)
    }

    /// `boxed_run` on the blocking thread pool.
    pub async fn run_async(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>, PackageError> {
        let loaded = self.loaded()?;
        let outputs = tokio::task::spawn_blocking(move || loaded.dispatcher.boxed_run(inputs))
            .await
            .map_err(|e| PackageError::Execution(ExecutionError::Aborted(e.to_string())))??;
        Ok(outputs)
    }

    /// Run with tensors borrowed from a table. Outputs are registered in
    /// the same table.
    pub fn run_ids(
        &self,
        table: &TensorTable,
        ids: &[TensorId],
    ) -> Result<Vec<TensorId>, PackageError> {
        let loaded = self.loaded()?;
        let inputs = ids
            .iter()
            .map(|&id| table.get(id).ok_or_else(|| unknown_tensor(id)))
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = loaded.dispatcher.run(&inputs)?;
        drop(inputs);
        Ok(outputs.into_iter().map(|t| table.insert(t)).collect())
    }

    /// Run with tensors moved out of a table.
    ///
    /// Inputs leave the table only if every id is known and distinct; they
    /// stay consumed even when execution fails.
    pub fn boxed_run_ids(
        &self,
        table: &TensorTable,
        ids: &[TensorId],
    ) -> Result<Vec<TensorId>, PackageError> {
        let loaded = self.loaded()?;
        let inputs = table.take_all(ids).ok_or_else(|| {
            PackageError::InvalidHandle(format!("unknown or repeated tensor ids in {:?}", ids))
        })?;
        let outputs = loaded.dispatcher.boxed_run(inputs)?;
        Ok(outputs.into_iter().map(|t| table.insert(t)).collect())
    }

    /// Release the loaded model and its runners.
    ///
    /// Idle runners are dropped immediately; runners serving a call are
    /// dropped when that call completes. Fails with `InvalidHandle` if
    /// already released.
    pub fn release(&self) -> Result<(), PackageError> {
        let loaded = self
            .inner
            .loaded
            .write()
            .take()
            .ok_or_else(|| {
                PackageError::InvalidHandle(format!("package {} already released", self.inner.id))
            })?;
        let dropped = loaded.dispatcher.close();
        tracing::info!(
            package_id = %self.inner.id,
            model_name = %self.inner.info.model_name,
            idle_runners_dropped = dropped,
            "package released"
        );
        Ok(())
    }
}

fn unknown_tensor(id: TensorId) -> PackageError {
    PackageError::InvalidHandle(format!("unknown {}", id))
}

impl fmt::Debug for ModelPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelPackage")
            .field("id", &self.inner.id)
            .field("info", &self.inner.info)
            .field("state", &self.state())
            .finish()
    }
}

/// Options for opening a package.
pub struct ModelPackageBuilder {
    path: PathBuf,
    model_name: String,
    single_threaded: bool,
    num_runners: usize,
    max_runners: usize,
    device_index: i8,
    verify_constants: bool,
    devices: Option<DeviceManager>,
    backends: Option<BackendRegistry>,
}

impl ModelPackageBuilder {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            single_threaded: false,
            num_runners: 1,
            max_runners: default_max_runners(),
            device_index: HOST_DEVICE_INDEX,
            verify_constants: true,
            devices: None,
            backends: None,
        }
    }

    pub fn model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = model_name.into();
        self
    }

    pub fn single_threaded(mut self, single_threaded: bool) -> Self {
        self.single_threaded = single_threaded;
        self
    }

    pub fn num_runners(mut self, num_runners: usize) -> Self {
        self.num_runners = num_runners;
        self
    }

    pub fn max_runners(mut self, max_runners: usize) -> Self {
        self.max_runners = max_runners;
        self
    }

    /// Negative values select the host.
    pub fn device_index(mut self, device_index: i8) -> Self {
        self.device_index = device_index;
        self
    }

    pub fn verify_constants(mut self, verify: bool) -> Self {
        self.verify_constants = verify;
        self
    }

    /// Devices to choose from instead of detecting them.
    pub fn device_manager(mut self, devices: DeviceManager) -> Self {
        self.devices = Some(devices);
        self
    }

    /// Backends to link with instead of the built-in set.
    pub fn backends(mut self, backends: BackendRegistry) -> Self {
        self.backends = Some(backends);
        self
    }

    /// Apply loader settings.
    pub fn config(mut self, config: &LoaderConfig) -> Self {
        self.model_name = config.model_name.clone();
        self.single_threaded = config.single_threaded;
        self.num_runners = config.num_runners;
        self.max_runners = config.max_runners;
        self.device_index = config.device_index;
        self.verify_constants = config.verify_constants;
        self
    }

    /// Load the model and link its runners. All or nothing.
    pub fn build(self) -> Result<ModelPackage, PackageError> {
        let span = PackageSpan::load(&self.path.display().to_string(), &self.model_name);
        let _enter = span.enter();
        let start = Instant::now();

        let result = self.build_inner(&span);

        span.record_result(&result);
        span.record_latency(start.elapsed());
        match &result {
            Ok(package) => tracing::info!(
                package_id = %package.id(),
                model_name = %package.info().model_name,
                device = %package.info().device,
                runners = package.info().num_runners,
                "package loaded"
            ),
            Err(e) => tracing::warn!(error = %e, "package load failed"),
        }
        result
    }

    fn build_inner(self, span: &tracing::Span) -> Result<ModelPackage, PackageError> {
        let threading = ThreadingMode::from_request(self.single_threaded, self.num_runners)
            .ok_or_else(|| PackageError::InvalidConfig("num_runners must be at least 1".into()))?;
        let num_runners = threading.runner_count();
        if num_runners > self.max_runners {
            return Err(PackageError::InvalidConfig(format!(
                "num_runners {} exceeds the maximum of {}",
                num_runners, self.max_runners
            )));
        }

        let dir = PackageDir::open(&self.path)?;
        let entry = dir.read_model_entry(&self.model_name)?;

        let devices = self.devices.unwrap_or_else(DeviceManager::detect);
        let device = devices.resolve(DeviceSelector::from_index(self.device_index), entry.target)?;

        let backends = self.backends.unwrap_or_else(BackendRegistry::with_defaults);
        let backend = backends.get(&entry.backend)?;
        if !backend.supports(&device) {
            return Err(BackendError::UnsupportedDevice {
                backend: entry.backend.clone(),
                device: device.to_string(),
            }
            .into());
        }

        let constants = Arc::new(ConstantSet::load(
            dir.root(),
            &entry.constants,
            self.verify_constants,
        )?);

        let runners = (0..num_runners)
            .map(|runner_index| {
                backend.link(&LinkRequest {
                    model_name: &self.model_name,
                    entry_point: &entry.entry_point,
                    call_spec: &entry.call_spec,
                    constants: &constants,
                    device: &device,
                    runner_index,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        span.record("runners", num_runners);
        span.record("device", device.to_string().as_str());
        telemetry::record_package_loaded(&entry.backend);

        let dispatcher = ExecutionDispatcher::new(self.model_name.clone(), threading, runners);
        let info = PackageInfo {
            path: dir.root().to_path_buf(),
            model_name: self.model_name,
            backend: entry.backend,
            target: entry.target,
            threading,
            num_runners,
            device,
        };
        let loaded = LoadedModel {
            metadata: entry.metadata,
            call_spec: entry.call_spec,
            constants,
            dispatcher,
        };

        Ok(ModelPackage {
            inner: Arc::new(PackageInner {
                id: Uuid::new_v4(),
                info,
                loaded: RwLock::new(Some(Arc::new(loaded))),
            }),
        })
    }
}

//! Backend traits: linking compiled entry points into runners.
//!
//! A `KernelBackend` is the compiled-artifact collaborator. Linking happens
//! once per runner slot at load time; the resulting `ModelRunner` executes
//! one call at a time on the device it was linked for.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::device::Device;
use super::error::ExecutionError;
use super::signature::SignatureBackend;
use crate::models::ConstantSet;
use crate::tensor::{Tensor, TensorHandle};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    #[error("Backend {backend} cannot run on {device}")]
    UnsupportedDevice { backend: String, device: String },

    #[error("Invalid entry point: {0}")]
    InvalidEntryPoint(String),

    #[error("Link failed: {0}")]
    LinkFailed(String),
}

/// Execution context bound to one device.
///
/// Runners are never shared: the pool hands each one to a single caller at
/// a time, so implementations may keep mutable scratch state.
pub trait ModelRunner: Send {
    /// Execute the entry point. Inputs are matched positionally.
    ///
    /// `Owned` inputs may be consumed or reused for outputs; `Borrowed`
    /// inputs must only be read.
    fn execute(&mut self, inputs: Vec<TensorHandle<'_>>) -> Result<Vec<Tensor>, ExecutionError>;
}

/// Everything a backend needs to link one runner.
pub struct LinkRequest<'a> {
    pub model_name: &'a str,
    pub entry_point: &'a serde_json::Value,
    pub call_spec: &'a [String],
    pub constants: &'a Arc<ConstantSet>,
    pub device: &'a Device,
    /// Slot of the runner in the pool.
    pub runner_index: usize,
}

/// Produces runners for compiled entry points.
pub trait KernelBackend: Send + Sync {
    /// Name referenced by the package manifest.
    fn name(&self) -> &str;

    fn supports(&self, _device: &Device) -> bool {
        true
    }

    fn link(&self, request: &LinkRequest<'_>) -> Result<Box<dyn ModelRunner>, BackendError>;
}

/// Backends available to the loader, keyed by name.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn KernelBackend>>,
}

impl BackendRegistry {
    /// Registry without any backend.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in backends.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(SignatureBackend));
        registry
    }

    /// Add a backend, replacing any previous one with the same name.
    pub fn register(&mut self, backend: Arc<dyn KernelBackend>) -> Option<Arc<dyn KernelBackend>> {
        self.backends.insert(backend.name().to_string(), backend)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn KernelBackend>, BackendError> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| BackendError::UnknownBackend(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    /// Sorted backend names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }
}

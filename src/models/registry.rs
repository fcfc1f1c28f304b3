//! Id-keyed registry of open packages.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use super::package::ModelPackage;
use crate::error::PackageError;

/// Opaque handle to a registered package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId(u64);

impl PackageId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "package#{}", self.0)
    }
}

/// Thread-safe registry of open packages.
pub struct PackageRegistry {
    packages: DashMap<PackageId, ModelPackage>,
    next_id: AtomicU64,
}

impl PackageRegistry {
    pub fn new() -> Self {
        Self {
            packages: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a package and return its id.
    pub fn insert(&self, package: ModelPackage) -> PackageId {
        let id = PackageId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.packages.insert(id, package);
        id
    }

    /// Shared handle to a registered package.
    pub fn get(&self, id: PackageId) -> Result<ModelPackage, PackageError> {
        self.packages
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| PackageError::InvalidHandle(format!("unknown {}", id)))
    }

    /// Unregister and release a package.
    pub fn release(&self, id: PackageId) -> Result<(), PackageError> {
        let (_, package) = self
            .packages
            .remove(&id)
            .ok_or_else(|| PackageError::InvalidHandle(format!("unknown {}", id)))?;
        package.release()
    }

    pub fn contains(&self, id: PackageId) -> bool {
        self.packages.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> Vec<PackageId> {
        let mut ids: Vec<PackageId> = self.packages.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }
}

impl Default for PackageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DeviceManager;
    use crate::models::loader::MANIFEST_FILE;
    use tempfile::TempDir;

    fn open() -> (TempDir, ModelPackage) {
        let dir = TempDir::new().unwrap();
        let manifest = r#"{
            "format_version": 1,
            "models": { "model": { "backend": "signature", "call_spec": ["x"],
                                   "entry_point": { "inputs": [], "outputs": [] } } }
        }"#;
        std::fs::write(dir.path().join(MANIFEST_FILE), manifest).unwrap();
        let package = ModelPackage::builder(dir.path())
            .device_manager(DeviceManager::host_only())
            .build()
            .unwrap();
        (dir, package)
    }

    #[test]
    fn test_insert_get_release() {
        let registry = PackageRegistry::new();
        let (_dir, package) = open();
        let id = registry.insert(package);

        assert_eq!(registry.ids(), vec![id]);
        assert_eq!(registry.get(id).unwrap().get_call_spec().unwrap(), vec!["x"]);

        let held = registry.get(id).unwrap();
        registry.release(id).unwrap();
        assert!(registry.is_empty());
        assert!(!held.is_ready());
        assert!(matches!(registry.get(id), Err(PackageError::InvalidHandle(_))));
        assert!(matches!(registry.release(id), Err(PackageError::InvalidHandle(_))));
    }
}

//! Package location, manifest reading and validation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::manifest::{ManifestError, ModelEntry, PackageManifest};

/// Manifest file name at the package root.
pub const MANIFEST_FILE: &str = "package.json";

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Package not found: {0}")]
    NotFound(PathBuf),

    #[error("Model {model} not found in package (available: {available:?})")]
    ModelNotFound { model: String, available: Vec<String> },

    #[error("Path escapes package directory: {0}")]
    PathNotAllowed(PathBuf),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Invalid constant {fqn}: {reason}")]
    InvalidConstant { fqn: String, reason: String },

    #[error("Hash mismatch for constant {fqn}: expected {expected}, got {actual}")]
    HashMismatch {
        fqn: String,
        expected: String,
        actual: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Canonical root of a package directory holding a manifest.
#[derive(Debug, Clone)]
pub struct PackageDir {
    root: PathBuf,
}

impl PackageDir {
    /// Locate a package. Fails with `NotFound` unless `path` is a directory
    /// containing the manifest file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let root = path
            .canonicalize()
            .map_err(|_| LoadError::NotFound(path.to_path_buf()))?;
        if !root.is_dir() || !root.join(MANIFEST_FILE).is_file() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Read and validate the manifest.
    pub fn read_manifest(&self) -> Result<PackageManifest, LoadError> {
        let bytes = std::fs::read(self.manifest_path())?;
        let manifest = PackageManifest::from_slice(&bytes)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Manifest entry of one model.
    pub fn read_model_entry(&self, model_name: &str) -> Result<ModelEntry, LoadError> {
        let mut manifest = self.read_manifest()?;
        match manifest.models.remove(model_name) {
            Some(entry) => Ok(entry),
            None => Err(LoadError::ModelNotFound {
                model: model_name.to_string(),
                available: manifest.model_names(),
            }),
        }
    }
}

/// Read a model's metadata from the manifest alone.
///
/// Touches no constants, devices or runners.
pub fn load_metadata_from_package(
    path: impl AsRef<Path>,
    model_name: &str,
) -> Result<HashMap<String, String>, LoadError> {
    let dir = PackageDir::open(path)?;
    Ok(dir.read_model_entry(model_name)?.metadata)
}

//! Package manifest parsing and validation.
//!
//! `package.json` lists the models of a package with their metadata, call
//! spec, constants and backend entry point.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::DeviceKind;
use crate::tensor::{checked_numel, DType};

/// Manifest format versions this crate reads.
pub const SUPPORTED_FORMAT_VERSIONS: &[u32] = &[1];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("Invalid manifest JSON: {0}")]
    Json(String),

    #[error("Unsupported format version {found} (supported: {supported:?})")]
    UnsupportedVersion { found: u32, supported: Vec<u32> },

    #[error("Invalid manifest: {0}")]
    Invalid(String),
}

/// Top-level `package.json` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageManifest {
    pub format_version: u32,
    pub models: BTreeMap<String, ModelEntry>,
}

/// One compiled model inside a package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Backend that links the entry point.
    pub backend: String,
    /// Device kind the model was compiled for.
    #[serde(default)]
    pub target: DeviceKind,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub call_spec: Vec<String>,
    #[serde(default)]
    pub constants: Vec<ConstantEntry>,
    /// Backend-specific description of the compiled entry point.
    #[serde(default)]
    pub entry_point: serde_json::Value,
}

/// A constant tensor stored in its own file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstantEntry {
    pub fqn: String,
    /// Path relative to the package root.
    pub file: String,
    pub dtype: DType,
    pub shape: Vec<usize>,
    /// Hex SHA-256 of the file contents.
    #[serde(default)]
    pub sha256: Option<String>,
}

impl ConstantEntry {
    /// Expected size of the constant file.
    pub fn byte_len(&self) -> Option<usize> {
        checked_numel(&self.shape).and_then(|n| n.checked_mul(self.dtype.size_bytes()))
    }
}

impl PackageManifest {
    /// Parse a manifest from JSON bytes. Does not validate.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ManifestError> {
        serde_json::from_slice(bytes).map_err(|e| ManifestError::Json(e.to_string()))
    }

    /// Parse a manifest from a JSON string. Does not validate.
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        Self::from_slice(json.as_bytes())
    }

    pub fn to_json(&self) -> Result<String, ManifestError> {
        serde_json::to_string_pretty(self).map_err(|e| ManifestError::Json(e.to_string()))
    }

    /// Validate the whole manifest.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if !SUPPORTED_FORMAT_VERSIONS.contains(&self.format_version) {
            return Err(ManifestError::UnsupportedVersion {
                found: self.format_version,
                supported: SUPPORTED_FORMAT_VERSIONS.to_vec(),
            });
        }
        if self.models.is_empty() {
            return Err(ManifestError::Invalid("package contains no models".into()));
        }
        for (name, entry) in &self.models {
            if name.is_empty() {
                return Err(ManifestError::Invalid("model name cannot be empty".into()));
            }
            entry
                .validate()
                .map_err(|e| ManifestError::Invalid(format!("model {}: {}", name, e)))?;
        }
        Ok(())
    }

    pub fn model(&self, name: &str) -> Option<&ModelEntry> {
        self.models.get(name)
    }

    pub fn model_names(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }
}

impl ModelEntry {
    fn validate(&self) -> Result<(), String> {
        if self.backend.is_empty() {
            return Err("backend cannot be empty".into());
        }
        if self.call_spec.is_empty() {
            return Err("call_spec cannot be empty".into());
        }

        let mut seen = HashSet::new();
        for constant in &self.constants {
            if constant.fqn.is_empty() {
                return Err("constant fqn cannot be empty".into());
            }
            if !seen.insert(constant.fqn.as_str()) {
                return Err(format!("duplicate constant {}", constant.fqn));
            }
            if !is_contained_relative(Path::new(&constant.file)) {
                return Err(format!(
                    "constant {} file must be a relative path inside the package",
                    constant.fqn
                ));
            }
            if constant.byte_len().is_none() {
                return Err(format!("constant {} shape overflows", constant.fqn));
            }
            if let Some(hash) = &constant.sha256 {
                if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(format!(
                        "constant {} sha256 must be 64 hex characters",
                        constant.fqn
                    ));
                }
            }
        }
        Ok(())
    }

    /// Constant names in declaration order.
    pub fn constant_fqns(&self) -> Vec<String> {
        self.constants.iter().map(|c| c.fqn.clone()).collect()
    }
}

/// Relative path with only normal components.
fn is_contained_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_json() -> String {
        r#"{
            "format_version": 1,
            "models": {
                "forward": {
                    "backend": "signature",
                    "metadata": { "AOTI_DEVICE_KEY": "cpu" },
                    "call_spec": ["input_0", "output_0"],
                    "constants": [
                        {
                            "fqn": "fc.bias",
                            "file": "constants/fc.bias.bin",
                            "dtype": "f32",
                            "shape": [4]
                        }
                    ],
                    "entry_point": { "inputs": [], "outputs": [] }
                }
            }
        }"#
        .to_string()
    }

    #[test]
    fn test_parse_and_validate() {
        let manifest = PackageManifest::from_json(&manifest_json()).unwrap();
        manifest.validate().unwrap();

        let entry = manifest.model("forward").unwrap();
        assert_eq!(entry.target, DeviceKind::Host);
        assert_eq!(entry.call_spec, vec!["input_0", "output_0"]);
        assert_eq!(entry.constant_fqns(), vec!["fc.bias"]);
        assert_eq!(entry.constants[0].byte_len(), Some(16));
    }

    #[test]
    fn test_invalid_json() {
        let result = PackageManifest::from_json("{ not json");
        assert!(matches!(result, Err(ManifestError::Json(_))));
    }

    #[test]
    fn test_unsupported_version() {
        let mut manifest = PackageManifest::from_json(&manifest_json()).unwrap();
        manifest.format_version = 7;
        assert!(matches!(
            manifest.validate(),
            Err(ManifestError::UnsupportedVersion { found: 7, .. })
        ));
    }

    #[test]
    fn test_empty_call_spec_rejected() {
        let mut manifest = PackageManifest::from_json(&manifest_json()).unwrap();
        manifest.models.get_mut("forward").unwrap().call_spec.clear();
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("call_spec"));
    }

    #[test]
    fn test_constant_path_escape_rejected() {
        let mut manifest = PackageManifest::from_json(&manifest_json()).unwrap();
        manifest.models.get_mut("forward").unwrap().constants[0].file = "../secret.bin".into();
        assert!(manifest.validate().is_err());

        manifest.models.get_mut("forward").unwrap().constants[0].file = "/etc/passwd".into();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_duplicate_constant_rejected() {
        let mut manifest = PackageManifest::from_json(&manifest_json()).unwrap();
        let entry = manifest.models.get_mut("forward").unwrap();
        let dup = entry.constants[0].clone();
        entry.constants.push(dup);
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate constant fc.bias"));
    }

    #[test]
    fn test_bad_sha256_rejected() {
        let mut manifest = PackageManifest::from_json(&manifest_json()).unwrap();
        manifest.models.get_mut("forward").unwrap().constants[0].sha256 = Some("abc".into());
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_no_models_rejected() {
        let manifest =
            PackageManifest::from_json(r#"{ "format_version": 1, "models": {} }"#).unwrap();
        assert!(matches!(manifest.validate(), Err(ManifestError::Invalid(_))));
    }
}

//! Shared fixtures: packages written into temporary directories.

#![allow(dead_code)]

use modelpack_core::models::MANIFEST_FILE;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

/// Builder for an on-disk package with one or more models.
pub struct PackageFixture {
    dir: TempDir,
    models: serde_json::Map<String, Value>,
}

impl PackageFixture {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            models: serde_json::Map::new(),
        }
    }

    /// Add a model entry verbatim.
    pub fn model(mut self, name: &str, entry: Value) -> Self {
        self.models.insert(name.to_string(), entry);
        self
    }

    /// Write an f32 constant file and return its manifest entry.
    pub fn f32_constant(&self, fqn: &str, shape: &[usize], values: &[f32]) -> Value {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let file = format!("constants/{}.bin", fqn);
        let path = self.dir.path().join(&file);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, &bytes).unwrap();
        json!({
            "fqn": fqn,
            "file": file,
            "dtype": "f32",
            "shape": shape,
            "sha256": hex::encode(Sha256::digest(&bytes)),
        })
    }

    /// Write the manifest and return the package directory.
    pub fn write(self) -> TempDir {
        let manifest = json!({ "format_version": 1, "models": self.models });
        std::fs::write(
            self.dir.path().join(MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest).unwrap(),
        )
        .unwrap();
        self.dir
    }
}

/// ResNet-style image classifier: `(N,3,224,224) f32 -> (1,1000) f32`.
pub fn resnet_entry(target: &str) -> Value {
    json!({
        "backend": "signature",
        "target": target,
        "metadata": {
            "AOTI_DEVICE_KEY": target,
            "model_type": "resnet18",
        },
        "call_spec": ["input_0", "output_0"],
        "entry_point": {
            "inputs": [{ "name": "x", "dtype": "f32", "shape": [null, 3, 224, 224] }],
            "outputs": [{ "name": "logits", "dtype": "f32", "shape": [1, 1000] }]
        }
    })
}

/// Identity model over a 1-D f32 vector of length `len`.
pub fn identity_entry(len: usize) -> Value {
    json!({
        "backend": "signature",
        "metadata": { "kind": "identity" },
        "call_spec": ["x", "y"],
        "entry_point": {
            "inputs": [{ "dtype": "f32", "shape": [len] }],
            "outputs": [{ "init": { "input": 0 } }]
        }
    })
}

/// Single-model package holding `identity_entry(len)` under `model`.
pub fn identity_package(len: usize) -> TempDir {
    PackageFixture::new().model("model", identity_entry(len)).write()
}

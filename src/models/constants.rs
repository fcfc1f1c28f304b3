//! Constant tensors bundled with a compiled model.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use sha2::{Digest, Sha256};

use super::loader::LoadError;
use super::manifest::ConstantEntry;
use crate::tensor::{Tensor, TensorError};

/// Named constants of one model, in manifest order.
#[derive(Debug, Default)]
pub struct ConstantSet {
    order: Vec<String>,
    tensors: HashMap<String, Tensor>,
}

impl ConstantSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a set from in-memory tensors. Names must be unique and non-empty.
    pub fn from_entries(entries: Vec<(String, Tensor)>) -> Result<Self, LoadError> {
        let mut set = Self::empty();
        for (fqn, tensor) in entries {
            set.push(fqn, tensor)?;
        }
        Ok(set)
    }

    fn push(&mut self, fqn: String, tensor: Tensor) -> Result<(), LoadError> {
        if fqn.is_empty() {
            return Err(LoadError::InvalidConstant {
                fqn,
                reason: "empty name".into(),
            });
        }
        if self.tensors.contains_key(&fqn) {
            return Err(LoadError::InvalidConstant {
                fqn,
                reason: "duplicate name".into(),
            });
        }
        self.order.push(fqn.clone());
        self.tensors.insert(fqn, tensor);
        Ok(())
    }

    /// Map and check every constant listed for a model.
    pub(crate) fn load(
        root: &Path,
        entries: &[ConstantEntry],
        verify: bool,
    ) -> Result<Self, LoadError> {
        let mut set = Self::empty();
        for entry in entries {
            let tensor = load_constant(root, entry, verify)?;
            set.push(entry.fqn.clone(), tensor)?;
        }
        Ok(set)
    }

    pub fn get(&self, fqn: &str) -> Option<&Tensor> {
        self.tensors.get(fqn)
    }

    /// Names in manifest order.
    pub fn fqns(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.order
            .iter()
            .filter_map(|fqn| self.tensors.get(fqn).map(|t| (fqn.as_str(), t)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.tensors.values().map(|t| t.as_bytes().len()).sum()
    }
}

fn load_constant(root: &Path, entry: &ConstantEntry, verify: bool) -> Result<Tensor, LoadError> {
    let path = root.join(&entry.file);
    let canonical = path
        .canonicalize()
        .map_err(|_| LoadError::InvalidConstant {
            fqn: entry.fqn.clone(),
            reason: format!("file missing: {}", entry.file),
        })?;
    if !canonical.starts_with(root) {
        return Err(LoadError::PathNotAllowed(canonical));
    }

    let expected = entry.byte_len().ok_or_else(|| LoadError::InvalidConstant {
        fqn: entry.fqn.clone(),
        reason: "shape overflows".into(),
    })?;

    let file = File::open(&canonical)?;
    let len = file.metadata()?.len() as usize;
    if len != expected {
        return Err(LoadError::InvalidConstant {
            fqn: entry.fqn.clone(),
            reason: format!("expected {} bytes, file has {}", expected, len),
        });
    }

    let invalid = |e: TensorError| LoadError::InvalidConstant {
        fqn: entry.fqn.clone(),
        reason: e.to_string(),
    };

    // Zero-length files cannot be mapped on every platform.
    if len == 0 {
        return Tensor::from_bytes(entry.dtype, entry.shape.clone(), Vec::new()).map_err(invalid);
    }

    // SAFETY: constant files are opened read-only and not modified while mapped.
    let mmap = unsafe { Mmap::map(&file)? };
    if verify {
        if let Some(expected_hash) = &entry.sha256 {
            verify_hash(&entry.fqn, &mmap, expected_hash)?;
        }
    }

    Tensor::from_mapped(entry.dtype, entry.shape.clone(), mmap).map_err(invalid)
}

fn verify_hash(fqn: &str, bytes: &[u8], expected: &str) -> Result<(), LoadError> {
    let actual = hex::encode(Sha256::digest(bytes));
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(LoadError::HashMismatch {
            fqn: fqn.to_string(),
            expected: expected.to_lowercase(),
            actual,
        });
    }
    Ok(())
}

//! Tensor values exchanged with the execution backends.
//!
//! A `Tensor` is a dtype, a shape and a reference-counted byte storage.
//! Storage lives on the heap or, for packaged constants, in a read-only
//! file mapping. Cloning shares the storage; `deep_copy` allocates a new
//! heap buffer. The dispatcher relies on storage identity to guarantee
//! that outputs never alias caller-visible tensors.

mod handle;
mod table;

pub use handle::{Ownership, TensorHandle};
pub use table::{TensorId, TensorTable};

use std::fmt;
use std::sync::Arc;

use half::{bf16, f16};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TensorError {
    #[error("{dtype} tensor of shape {shape:?} needs {expected} bytes, got {actual}")]
    SizeMismatch {
        dtype: DType,
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("Element count overflow for shape {0:?}")]
    Overflow(Vec<usize>),
}

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F32,
    F64,
    F16,
    Bf16,
    I64,
    I32,
    I16,
    I8,
    U8,
    Bool,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_bytes(&self) -> usize {
        match self {
            DType::F64 | DType::I64 => 8,
            DType::F32 | DType::I32 => 4,
            DType::F16 | DType::Bf16 | DType::I16 => 2,
            DType::I8 | DType::U8 | DType::Bool => 1,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::F64 | DType::F16 | DType::Bf16)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::F16 => "f16",
            DType::Bf16 => "bf16",
            DType::I64 => "i64",
            DType::I32 => "i32",
            DType::I16 => "i16",
            DType::I8 => "i8",
            DType::U8 => "u8",
            DType::Bool => "bool",
        }
    }

    /// Little-endian encoding of `value` as one element of this dtype.
    pub fn encode_scalar(&self, value: f64) -> Vec<u8> {
        match self {
            DType::F32 => (value as f32).to_le_bytes().to_vec(),
            DType::F64 => value.to_le_bytes().to_vec(),
            DType::F16 => f16::from_f64(value).to_le_bytes().to_vec(),
            DType::Bf16 => bf16::from_f64(value).to_le_bytes().to_vec(),
            DType::I64 => (value as i64).to_le_bytes().to_vec(),
            DType::I32 => (value as i32).to_le_bytes().to_vec(),
            DType::I16 => (value as i16).to_le_bytes().to_vec(),
            DType::I8 => (value as i8).to_le_bytes().to_vec(),
            DType::U8 => vec![value as u8],
            DType::Bool => vec![u8::from(value != 0.0)],
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of elements for `shape`, `None` on overflow.
pub fn checked_numel(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

#[derive(Clone)]
enum Storage {
    Heap(Arc<[u8]>),
    /// Read-only file mapping; never mutable in place.
    Mapped(Arc<Mmap>),
}

impl Storage {
    fn bytes(&self) -> &[u8] {
        match self {
            Storage::Heap(bytes) => &bytes[..],
            Storage::Mapped(mmap) => &mmap[..],
        }
    }

    fn ptr_eq(&self, other: &Storage) -> bool {
        match (self, other) {
            (Storage::Heap(a), Storage::Heap(b)) => Arc::ptr_eq(a, b),
            (Storage::Mapped(a), Storage::Mapped(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn ref_count(&self) -> usize {
        match self {
            Storage::Heap(bytes) => Arc::strong_count(bytes),
            Storage::Mapped(mmap) => Arc::strong_count(mmap),
        }
    }
}

/// Tensor value backed by shared, immutable-unless-exclusive storage.
#[derive(Clone)]
pub struct Tensor {
    dtype: DType,
    shape: Vec<usize>,
    storage: Storage,
}

impl Tensor {
    /// Build a tensor from little-endian element bytes.
    pub fn from_bytes(
        dtype: DType,
        shape: Vec<usize>,
        bytes: Vec<u8>,
    ) -> Result<Self, TensorError> {
        let expected = Self::byte_len(dtype, &shape)?;
        if bytes.len() != expected {
            return Err(TensorError::SizeMismatch {
                dtype,
                shape,
                expected,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            dtype,
            shape,
            storage: Storage::Heap(Arc::from(bytes)),
        })
    }

    /// Wrap a read-only file mapping without copying it.
    pub(crate) fn from_mapped(
        dtype: DType,
        shape: Vec<usize>,
        mmap: Mmap,
    ) -> Result<Self, TensorError> {
        let expected = Self::byte_len(dtype, &shape)?;
        if mmap.len() != expected {
            return Err(TensorError::SizeMismatch {
                dtype,
                shape,
                expected,
                actual: mmap.len(),
            });
        }
        Ok(Self {
            dtype,
            shape,
            storage: Storage::Mapped(Arc::new(mmap)),
        })
    }

    /// Copy `bytes` into a fresh tensor.
    pub fn copy_from_slice(
        dtype: DType,
        shape: Vec<usize>,
        bytes: &[u8],
    ) -> Result<Self, TensorError> {
        Self::from_bytes(dtype, shape, bytes.to_vec())
    }

    pub fn zeros(dtype: DType, shape: Vec<usize>) -> Result<Self, TensorError> {
        let len = Self::byte_len(dtype, &shape)?;
        Self::from_bytes(dtype, shape, vec![0u8; len])
    }

    /// Tensor with every element set to `value`.
    pub fn full(dtype: DType, shape: Vec<usize>, value: f64) -> Result<Self, TensorError> {
        let len = Self::byte_len(dtype, &shape)?;
        let bytes = dtype.encode_scalar(value).repeat(len / dtype.size_bytes());
        Self::from_bytes(dtype, shape, bytes)
    }

    pub fn from_f32(shape: Vec<usize>, values: &[f32]) -> Result<Self, TensorError> {
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::from_bytes(DType::F32, shape, bytes)
    }

    /// Storage size for `dtype` and `shape`. Fails when the size does not
    /// fit a single allocation.
    pub fn byte_len(dtype: DType, shape: &[usize]) -> Result<usize, TensorError> {
        checked_numel(shape)
            .and_then(|n| n.checked_mul(dtype.size_bytes()))
            .filter(|&len| len <= isize::MAX as usize)
            .ok_or_else(|| TensorError::Overflow(shape.to_vec()))
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.storage.bytes()
    }

    /// Mutable access to heap storage that no other tensor shares.
    pub fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.storage {
            Storage::Heap(bytes) => Arc::get_mut(bytes),
            Storage::Mapped(_) => None,
        }
    }

    /// True when the bytes live in a file mapping.
    pub fn is_mapped(&self) -> bool {
        matches!(self.storage, Storage::Mapped(_))
    }

    /// Decode elements as `f32`. Returns `None` for non-float dtypes.
    pub fn to_f32_vec(&self) -> Option<Vec<f32>> {
        let bytes = self.as_bytes();
        let values = match self.dtype {
            DType::F32 => bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            DType::F64 => bytes
                .chunks_exact(8)
                .map(|c| {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(c);
                    f64::from_le_bytes(raw) as f32
                })
                .collect(),
            DType::F16 => bytes
                .chunks_exact(2)
                .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect(),
            DType::Bf16 => bytes
                .chunks_exact(2)
                .map(|c| bf16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect(),
            _ => return None,
        };
        Some(values)
    }

    /// True when both tensors reference the same storage allocation.
    pub fn shares_storage(&self, other: &Tensor) -> bool {
        self.storage.ptr_eq(&other.storage)
    }

    /// Address of the storage allocation, for identity comparisons.
    pub fn storage_addr(&self) -> usize {
        self.as_bytes().as_ptr() as usize
    }

    /// True when no other tensor references this storage.
    pub fn is_exclusive(&self) -> bool {
        self.storage.ref_count() == 1
    }

    /// Copy into a newly allocated storage.
    pub fn deep_copy(&self) -> Tensor {
        Tensor {
            dtype: self.dtype,
            shape: self.shape.clone(),
            storage: Storage::Heap(Arc::from(self.as_bytes())),
        }
    }

    /// Return a tensor whose storage is referenced by nobody else,
    /// copying only if the storage is currently shared.
    pub fn into_exclusive(self) -> Tensor {
        if self.is_exclusive() {
            self
        } else {
            self.deep_copy()
        }
    }

    /// Same shape, dtype and bytes.
    pub fn value_eq(&self, other: &Tensor) -> bool {
        self.dtype == other.dtype
            && self.shape == other.shape
            && self.as_bytes() == other.as_bytes()
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("dtype", &self.dtype)
            .field("shape", &self.shape)
            .field("bytes", &self.as_bytes().len())
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes_rejects_wrong_length() {
        let result = Tensor::from_bytes(DType::F32, vec![2, 2], vec![0u8; 15]);
        assert!(matches!(
            result,
            Err(TensorError::SizeMismatch { expected: 16, actual: 15, .. })
        ));
    }

    #[test]
    fn test_overflowing_shape() {
        let result = Tensor::zeros(DType::F64, vec![usize::MAX, 2]);
        assert!(matches!(result, Err(TensorError::Overflow(_))));
    }

    #[test]
    fn test_full_rejects_unallocatable_shape() {
        let result = Tensor::full(DType::F32, vec![usize::MAX / 4 + 1], 1.0);
        assert!(matches!(result, Err(TensorError::Overflow(_))));

        let result = Tensor::full(DType::U8, vec![usize::MAX / 2 + 1], 1.0);
        assert!(matches!(result, Err(TensorError::Overflow(_))));
        assert!(Tensor::byte_len(DType::U8, &[usize::MAX / 2 + 1]).is_err());
    }

    #[test]
    fn test_clone_shares_and_deep_copy_does_not() {
        let a = Tensor::from_f32(vec![3], &[1.0, 2.0, 3.0]).unwrap();
        assert!(a.is_exclusive());

        let b = a.clone();
        assert!(a.shares_storage(&b));
        assert!(!a.is_exclusive());

        let c = a.deep_copy();
        assert!(!a.shares_storage(&c));
        assert!(c.value_eq(&a));
    }

    #[test]
    fn test_into_exclusive_copies_only_when_shared() {
        let a = Tensor::zeros(DType::U8, vec![4]).unwrap();
        let addr = a.storage_addr();
        let kept = a.into_exclusive();
        assert_eq!(kept.storage_addr(), addr);

        let shared = kept.clone();
        let copied = shared.into_exclusive();
        assert!(!copied.shares_storage(&kept));
    }

    #[test]
    fn test_bytes_mut_requires_exclusive_storage() {
        let mut a = Tensor::zeros(DType::I8, vec![2]).unwrap();
        assert!(a.bytes_mut().is_some());
        let _b = a.clone();
        assert!(a.bytes_mut().is_none());
    }

    #[test]
    fn test_full_half_precision() {
        let t = Tensor::full(DType::F16, vec![2, 2], 0.5).unwrap();
        assert_eq!(t.as_bytes().len(), 8);
        assert_eq!(t.to_f32_vec().unwrap(), vec![0.5; 4]);

        let t = Tensor::full(DType::Bf16, vec![3], -2.0).unwrap();
        assert_eq!(t.to_f32_vec().unwrap(), vec![-2.0; 3]);
    }

    #[test]
    fn test_dtype_serde_names() {
        let dtype: DType = serde_json::from_str("\"bf16\"").unwrap();
        assert_eq!(dtype, DType::Bf16);
        assert_eq!(serde_json::to_string(&DType::Bool).unwrap(), "\"bool\"");
        assert_eq!(DType::I64.size_bytes(), 8);
    }
}

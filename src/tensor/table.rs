//! Id-keyed tensor table for handing tensors across an API boundary.
//!
//! Callers that cannot hold Rust references register tensors here and
//! pass opaque `TensorId`s instead. Ownership is explicit: `get` yields a
//! borrowed view, `take` moves the tensor out of the table.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use super::Tensor;

/// Opaque identifier of a tensor registered in a `TensorTable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(u64);

impl TensorId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor#{}", self.0)
    }
}

/// Thread-safe table of caller-owned tensors.
pub struct TensorTable {
    tensors: DashMap<TensorId, Tensor>,
    next_id: AtomicU64,
}

impl TensorTable {
    pub fn new() -> Self {
        Self {
            tensors: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a tensor; the table becomes its owner.
    pub fn insert(&self, tensor: Tensor) -> TensorId {
        let id = TensorId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.tensors.insert(id, tensor);
        id
    }

    /// Borrowed view of a registered tensor (shares storage).
    pub fn get(&self, id: TensorId) -> Option<Tensor> {
        self.tensors.get(&id).map(|entry| entry.value().clone())
    }

    /// Move a tensor out of the table.
    pub fn take(&self, id: TensorId) -> Option<Tensor> {
        self.tensors.remove(&id).map(|(_, tensor)| tensor)
    }

    /// Move several tensors out, all or nothing.
    ///
    /// Returns `None` and leaves the table unchanged if any id is unknown
    /// or repeated.
    pub fn take_all(&self, ids: &[TensorId]) -> Option<Vec<Tensor>> {
        let mut taken: Vec<(TensorId, Tensor)> = Vec::with_capacity(ids.len());
        for &id in ids {
            match self.tensors.remove(&id) {
                Some((_, tensor)) => taken.push((id, tensor)),
                None => {
                    for (id, tensor) in taken {
                        self.tensors.insert(id, tensor);
                    }
                    return None;
                }
            }
        }
        Some(taken.into_iter().map(|(_, tensor)| tensor).collect())
    }

    /// Drop a registered tensor. Returns false for unknown ids.
    pub fn release(&self, id: TensorId) -> bool {
        self.tensors.remove(&id).is_some()
    }

    pub fn contains(&self, id: TensorId) -> bool {
        self.tensors.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

impl Default for TensorTable {
    fn default() -> Self {
        Self::new()
    }
}

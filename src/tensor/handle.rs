//! Ownership-tagged tensor handles passed across the dispatch boundary.

use super::Tensor;

/// Who owns a tensor while it crosses the dispatch boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Caller keeps ownership; the handle is valid for one call only.
    Borrowed,
    /// The callee owns the tensor and may reuse or discard its storage.
    Owned,
}

/// A tensor reference together with its ownership tag.
///
/// Backends receive inputs as handles. Only `Owned` handles may be
/// consumed; borrowed ones must be read and left untouched.
#[derive(Debug)]
pub enum TensorHandle<'a> {
    Borrowed(&'a Tensor),
    Owned(Tensor),
}

impl<'a> TensorHandle<'a> {
    pub fn ownership(&self) -> Ownership {
        match self {
            TensorHandle::Borrowed(_) => Ownership::Borrowed,
            TensorHandle::Owned(_) => Ownership::Owned,
        }
    }

    pub fn tensor(&self) -> &Tensor {
        match self {
            TensorHandle::Borrowed(t) => t,
            TensorHandle::Owned(t) => t,
        }
    }

    /// Take the tensor out of an owned handle. Borrowed handles are
    /// returned unchanged in `Err`.
    pub fn try_into_owned(self) -> Result<Tensor, TensorHandle<'a>> {
        match self {
            TensorHandle::Owned(t) => Ok(t),
            borrowed => Err(borrowed),
        }
    }

    /// Produce a tensor the caller can keep: owned handles are moved,
    /// borrowed handles yield a shared view of the caller's storage.
    pub fn to_tensor(self) -> Tensor {
        match self {
            TensorHandle::Borrowed(t) => t.clone(),
            TensorHandle::Owned(t) => t,
        }
    }
}

impl<'a> From<&'a Tensor> for TensorHandle<'a> {
    fn from(tensor: &'a Tensor) -> Self {
        TensorHandle::Borrowed(tensor)
    }
}

impl From<Tensor> for TensorHandle<'static> {
    fn from(tensor: Tensor) -> Self {
        TensorHandle::Owned(tensor)
    }
}

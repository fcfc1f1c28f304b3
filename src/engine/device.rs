// Copyright 2024-2026 modelpack-core Contributors
// Licensed under the Apache License, Version 2.0

//! Compute device descriptions and device selection.
//!
//! A runner is bound to exactly one `Device`. The host is always present;
//! accelerators are discovered by the `DeviceManager`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Device index value meaning "run on the host".
pub const HOST_DEVICE_INDEX: i8 = -1;

/// Kind of compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Host CPU execution
    #[default]
    Host,
    /// NVIDIA CUDA device
    Cuda,
    /// Apple Metal device (macOS only)
    Metal,
}

impl DeviceKind {
    pub fn is_accelerator(&self) -> bool {
        *self != DeviceKind::Host
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Host => write!(f, "host"),
            DeviceKind::Cuda => write!(f, "cuda"),
            DeviceKind::Metal => write!(f, "metal"),
        }
    }
}

/// Device a runner executes on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub kind: DeviceKind,
    /// Ordinal among devices of the same kind
    pub index: usize,
    pub name: String,
    /// Total memory in bytes (0 when unknown)
    pub total_memory: u64,
}

impl Device {
    pub fn host() -> Self {
        Self {
            kind: DeviceKind::Host,
            index: 0,
            name: "host".to_string(),
            total_memory: 0,
        }
    }

    pub fn accelerator(kind: DeviceKind, index: usize, name: impl Into<String>) -> Self {
        Self {
            kind,
            index,
            name: name.into(),
            total_memory: 0,
        }
    }

    pub fn is_host(&self) -> bool {
        self.kind == DeviceKind::Host
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_host() {
            write!(f, "host")
        } else {
            write!(f, "{}:{}", self.kind, self.index)
        }
    }
}

/// Requested placement, decoded from a signed device index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSelector {
    /// Host-only execution
    Host,
    /// Accelerator with the given ordinal
    Index(usize),
}

impl DeviceSelector {
    /// Negative indices select the host.
    pub fn from_index(index: i8) -> Self {
        if index < 0 {
            Self::Host
        } else {
            Self::Index(index as usize)
        }
    }
}

impl From<i8> for DeviceSelector {
    fn from(index: i8) -> Self {
        Self::from_index(index)
    }
}

/// Device resolution errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("Device index {0} not available")]
    NotFound(usize),

    #[error("No {kind} device with index {index}")]
    KindNotFound { kind: DeviceKind, index: usize },

    #[error("Model compiled for {0} cannot run on the host")]
    HostNotSupported(DeviceKind),

    #[error("Device detection failed: {0}")]
    DetectionFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_from_index() {
        assert_eq!(DeviceSelector::from_index(HOST_DEVICE_INDEX), DeviceSelector::Host);
        assert_eq!(DeviceSelector::from_index(-7), DeviceSelector::Host);
        assert_eq!(DeviceSelector::from_index(0), DeviceSelector::Index(0));
        assert_eq!(DeviceSelector::from(3i8), DeviceSelector::Index(3));
    }

    #[test]
    fn test_device_display() {
        assert_eq!(Device::host().to_string(), "host");
        assert_eq!(Device::accelerator(DeviceKind::Cuda, 1, "sim").to_string(), "cuda:1");
    }

    #[test]
    fn test_kind_serde() {
        let kind: DeviceKind = serde_json::from_str("\"metal\"").unwrap();
        assert_eq!(kind, DeviceKind::Metal);
        assert!(kind.is_accelerator());
        assert!(!DeviceKind::default().is_accelerator());
    }
}

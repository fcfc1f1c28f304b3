// Copyright 2024-2026 modelpack-core Contributors
// Licensed under the Apache License, Version 2.0

//! Device Manager - detects compute devices and resolves placement requests.

use super::device::{Device, DeviceError, DeviceKind, DeviceSelector};

/// Device Manager - holds the devices runners can be bound to
#[derive(Debug, Clone)]
pub struct DeviceManager {
    devices: Vec<Device>,
}

impl DeviceManager {
    /// Detect available devices. The host is always present.
    pub fn detect() -> Self {
        #[cfg_attr(not(any(feature = "cuda", feature = "metal")), allow(unused_mut))]
        let mut devices = vec![Device::host()];

        #[cfg(feature = "cuda")]
        {
            match Self::detect_cuda_devices() {
                Ok(cuda_devices) => devices.extend(cuda_devices),
                Err(e) => tracing::debug!(error = %e, "CUDA detection skipped"),
            }
        }

        #[cfg(all(feature = "metal", target_os = "macos"))]
        {
            devices.extend(Self::detect_metal_devices());
        }

        tracing::debug!(count = devices.len(), "devices detected");
        Self { devices }
    }

    /// Host-only manager.
    pub fn host_only() -> Self {
        Self {
            devices: vec![Device::host()],
        }
    }

    /// Manager over an explicit device list. The host is added if missing.
    pub fn with_devices(devices: Vec<Device>) -> Self {
        let mut devices = devices;
        if !devices.iter().any(Device::is_host) {
            devices.insert(0, Device::host());
        }
        Self { devices }
    }

    /// All known devices, host first.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn accelerators(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter().filter(|d| !d.is_host())
    }

    pub fn has_accelerator(&self) -> bool {
        self.accelerators().next().is_some()
    }

    /// Resolve a placement request for a model compiled for `target`.
    ///
    /// Host-compiled models accept the host or any existing accelerator
    /// ordinal. Accelerator-compiled models need a device of that kind.
    pub fn resolve(
        &self,
        selector: DeviceSelector,
        target: DeviceKind,
    ) -> Result<Device, DeviceError> {
        match (selector, target) {
            (DeviceSelector::Host, DeviceKind::Host) => Ok(Device::host()),
            (DeviceSelector::Host, kind) => Err(DeviceError::HostNotSupported(kind)),
            (DeviceSelector::Index(index), DeviceKind::Host) => self
                .accelerators()
                .find(|d| d.index == index)
                .cloned()
                .ok_or(DeviceError::NotFound(index)),
            (DeviceSelector::Index(index), kind) => self
                .accelerators()
                .find(|d| d.kind == kind && d.index == index)
                .cloned()
                .ok_or(DeviceError::KindNotFound { kind, index }),
        }
    }

    #[cfg(feature = "cuda")]
    fn detect_cuda_devices() -> Result<Vec<Device>, DeviceError> {
        use cudarc::driver::CudaDevice;

        let count = CudaDevice::count().map_err(|e| DeviceError::DetectionFailed(e.to_string()))?;
        Ok((0..count.max(0) as usize)
            .map(|index| {
                Device::accelerator(DeviceKind::Cuda, index, format!("CUDA device {}", index))
            })
            .collect())
    }

    #[cfg(all(feature = "metal", target_os = "macos"))]
    fn detect_metal_devices() -> Vec<Device> {
        metal::Device::all()
            .iter()
            .enumerate()
            .map(|(index, device)| Device {
                kind: DeviceKind::Metal,
                index,
                name: device.name().to_string(),
                total_memory: device.recommended_max_working_set_size(),
            })
            .collect()
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::detect()
    }
}

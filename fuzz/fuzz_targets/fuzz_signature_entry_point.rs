//! Fuzz target for linking signature entry points.
//!
//! Any JSON value must either link or fail with an error.

#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use modelpack_core::engine::{Device, KernelBackend, LinkRequest, SignatureBackend};
use modelpack_core::models::ConstantSet;

fuzz_target!(|data: &[u8]| {
    let Ok(entry_point) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let constants = Arc::new(ConstantSet::empty());
    let device = Device::host();
    let call_spec = vec!["x".to_string()];
    let request = LinkRequest {
        model_name: "fuzz",
        entry_point: &entry_point,
        call_spec: &call_spec,
        constants: &constants,
        device: &device,
        runner_index: 0,
    };
    let _ = SignatureBackend.link(&request);
});

//! Fuzz target for package manifest decoding.
//!
//! Arbitrary bytes parsed as `package.json` must only ever produce Ok or Err.

#![no_main]

use libfuzzer_sys::fuzz_target;
use modelpack_core::models::PackageManifest;

fuzz_target!(|data: &[u8]| {
    if let Ok(manifest) = PackageManifest::from_slice(data) {
        let _ = manifest.validate();
        for entry in manifest.models.values() {
            for constant in &entry.constants {
                let _ = constant.byte_len();
            }
        }
    }
});

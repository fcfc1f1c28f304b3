//! Model packages.
//!
//! Handles manifest parsing, constant loading, package handles and the
//! registry of open packages.

pub mod manifest;

mod constants;
mod loader;
mod package;
mod registry;

pub use constants::ConstantSet;
pub use loader::{load_metadata_from_package, LoadError, PackageDir, MANIFEST_FILE};
pub use manifest::{
    ConstantEntry, ManifestError, ModelEntry, PackageManifest, SUPPORTED_FORMAT_VERSIONS,
};
pub use package::{ModelPackage, ModelPackageBuilder, PackageInfo, PackageState};
pub use registry::{PackageId, PackageRegistry};

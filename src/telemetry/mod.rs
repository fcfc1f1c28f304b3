//! Telemetry module for model packages.
//!
//! Provides structured logging, tracing spans, and metrics recording.
//! Nothing here opens network connections.

mod logging;
pub mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use self::metrics::{describe_metrics, record_package_loaded, record_run, record_runner_wait};
pub use spans::{PackageSpan, SpanExt};

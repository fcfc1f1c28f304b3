//! Span utilities and extension traits for package tracing.
//!
//! Provides standardized span creation and result recording.

use tracing::{info_span, Span};

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;

    /// Record elapsed time in milliseconds.
    fn record_latency(&self, elapsed: std::time::Duration);
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }

    fn record_latency(&self, elapsed: std::time::Duration) {
        self.record("latency_ms", elapsed.as_secs_f64() * 1000.0);
    }
}

/// Factory for package lifecycle and dispatch spans.
pub struct PackageSpan;

impl PackageSpan {
    /// Span around opening a package.
    ///
    /// `status`, `error.message` and `latency_ms` are filled in on completion.
    pub fn load(path: &str, model_name: &str) -> Span {
        info_span!(
            "package_load",
            path = %path,
            model_name = %model_name,
            runners = tracing::field::Empty,
            device = tracing::field::Empty,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    }

    /// Span around one dispatched call.
    pub fn run(model_name: &str, mode: &'static str, inputs: usize) -> Span {
        info_span!(
            "package_run",
            model_name = %model_name,
            mode = mode,
            inputs = inputs,
            runner = tracing::field::Empty,
            outputs = tracing::field::Empty,
            copied_outputs = tracing::field::Empty,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    }
}

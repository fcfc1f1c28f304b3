//! Metric recording through the `metrics` facade.
//!
//! No exporter is installed here; the embedding application chooses one.

use std::time::Duration;

use ::metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

pub const RUNS_TOTAL: &str = "modelpack_runs_total";
pub const RUN_LATENCY_SECONDS: &str = "modelpack_run_latency_seconds";
pub const RUNNER_WAIT_SECONDS: &str = "modelpack_runner_wait_seconds";
pub const PACKAGES_LOADED_TOTAL: &str = "modelpack_packages_loaded_total";

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(RUNS_TOTAL, Unit::Count, "Dispatched model runs by mode and status");
    describe_histogram!(RUN_LATENCY_SECONDS, Unit::Seconds, "End-to-end run latency");
    describe_histogram!(
        RUNNER_WAIT_SECONDS,
        Unit::Seconds,
        "Time spent waiting for an idle runner"
    );
    describe_counter!(PACKAGES_LOADED_TOTAL, Unit::Count, "Model packages opened");
}

/// Record a finished run.
pub fn record_run(mode: &'static str, ok: bool, latency: Duration) {
    let status = if ok { "ok" } else { "error" };
    counter!(RUNS_TOTAL, "mode" => mode, "status" => status).increment(1);
    if ok {
        histogram!(RUN_LATENCY_SECONDS, "mode" => mode).record(latency.as_secs_f64());
    }
}

pub fn record_runner_wait(wait: Duration) {
    histogram!(RUNNER_WAIT_SECONDS).record(wait.as_secs_f64());
}

pub fn record_package_loaded(backend: &str) {
    counter!(PACKAGES_LOADED_TOTAL, "backend" => backend.to_string()).increment(1);
}

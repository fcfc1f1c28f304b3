//! Execution dispatch: runner checkout, execution and output hand-off.

use std::time::Instant;

use thiserror::Error;

use super::pool::{PoolError, PoolStats, RunnerPool, ThreadingMode};
use crate::engine::{ExecutionError, ModelRunner};
use crate::telemetry::{self, PackageSpan, SpanExt};
use crate::tensor::{Tensor, TensorHandle};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// How the caller handed over its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Inputs stay with the caller.
    Borrowed,
    /// Inputs are consumed by the call.
    Boxed,
}

impl DispatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchMode::Borrowed => "run",
            DispatchMode::Boxed => "boxed_run",
        }
    }
}

/// Runs calls for one loaded model over its runner pool.
pub struct ExecutionDispatcher {
    model_name: String,
    mode: ThreadingMode,
    pool: RunnerPool<Box<dyn ModelRunner>>,
}

impl ExecutionDispatcher {
    pub fn new(
        model_name: impl Into<String>,
        mode: ThreadingMode,
        runners: Vec<Box<dyn ModelRunner>>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            mode,
            pool: RunnerPool::new(runners),
        }
    }

    pub fn threading_mode(&self) -> ThreadingMode {
        self.mode
    }

    pub fn runner_count(&self) -> usize {
        self.pool.capacity()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Execute with borrowed inputs.
    pub fn run(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>, DispatchError> {
        let handles = inputs.iter().map(TensorHandle::Borrowed).collect();
        self.dispatch(handles, DispatchMode::Borrowed)
    }

    /// Execute with consumed inputs.
    pub fn boxed_run(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>, DispatchError> {
        let handles = inputs.into_iter().map(TensorHandle::Owned).collect();
        self.dispatch(handles, DispatchMode::Boxed)
    }

    /// Check out a runner, execute, and make every output exclusively owned.
    pub fn dispatch(
        &self,
        inputs: Vec<TensorHandle<'_>>,
        mode: DispatchMode,
    ) -> Result<Vec<Tensor>, DispatchError> {
        let span = PackageSpan::run(&self.model_name, mode.as_str(), inputs.len());
        let _enter = span.enter();
        let start = Instant::now();

        let result = self.execute(inputs, &span);

        let elapsed = start.elapsed();
        span.record_result(&result);
        span.record_latency(elapsed);
        telemetry::record_run(mode.as_str(), result.is_ok(), elapsed);
        if let Err(e) = &result {
            tracing::debug!(error = %e, "run failed");
        }
        result
    }

    fn execute(
        &self,
        inputs: Vec<TensorHandle<'_>>,
        span: &tracing::Span,
    ) -> Result<Vec<Tensor>, DispatchError> {
        let wait = Instant::now();
        let mut runner = self.pool.acquire()?;
        telemetry::record_runner_wait(wait.elapsed());
        span.record("runner", runner.slot());

        let outputs = runner.execute(inputs)?;
        drop(runner);

        let (outputs, copied) = make_exclusive(outputs);
        span.record("outputs", outputs.len());
        span.record("copied_outputs", copied);
        Ok(outputs)
    }

    /// Close the pool. Idle runners are dropped now, busy ones on return.
    pub fn close(&self) -> usize {
        self.pool.close()
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

/// Deep-copy every output whose storage is still shared with anything:
/// a borrowed input, a constant, runner state, or another output.
fn make_exclusive(outputs: Vec<Tensor>) -> (Vec<Tensor>, usize) {
    let mut copied = 0;
    // Sequential: once one sibling is copied, the next may become exclusive.
    let exclusive = outputs
        .into_iter()
        .map(|output| {
            if !output.is_exclusive() {
                copied += 1;
            }
            output.into_exclusive()
        })
        .collect();
    (exclusive, copied)
}

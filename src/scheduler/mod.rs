//! Runner scheduling for loaded models.
//!
//! A fixed-size pool of runners, and the dispatcher that checks them out
//! for each call.

mod dispatch;
mod pool;

pub use dispatch::{DispatchError, DispatchMode, ExecutionDispatcher};
pub use pool::{PoolError, PoolStats, RunnerGuard, RunnerPool, ThreadingMode};

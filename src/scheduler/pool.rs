//! Fixed-size runner pool with exclusive checkout.
//!
//! Idle runners wait in a mutex-protected queue. `acquire` blocks on a
//! condition variable until one is free; the returned guard puts the runner
//! back when dropped. Closing the pool drops idle runners at once and
//! in-flight runners when their guard is released.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::ops::{Deref, DerefMut};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error("Runner pool is closed")]
    Closed,
}

/// How many runners a loaded model gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadingMode {
    /// One runner; all calls are serialized.
    SingleThreaded,
    /// A fixed number of runners used concurrently.
    Pooled(NonZeroUsize),
}

impl ThreadingMode {
    /// Mode for the loader's `single_threaded` / `num_runners` pair.
    /// Returns `None` for a pooled request with zero runners.
    pub fn from_request(single_threaded: bool, num_runners: usize) -> Option<Self> {
        if single_threaded {
            Some(ThreadingMode::SingleThreaded)
        } else {
            NonZeroUsize::new(num_runners).map(ThreadingMode::Pooled)
        }
    }

    pub fn runner_count(&self) -> usize {
        match self {
            ThreadingMode::SingleThreaded => 1,
            ThreadingMode::Pooled(n) => n.get(),
        }
    }

    pub fn is_single_threaded(&self) -> bool {
        matches!(self, ThreadingMode::SingleThreaded)
    }
}

struct PoolState<R> {
    idle: VecDeque<(usize, R)>,
    in_use: usize,
    closed: bool,
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub idle: usize,
    pub in_use: usize,
    pub closed: bool,
}

pub struct RunnerPool<R> {
    state: Mutex<PoolState<R>>,
    available: Condvar,
    capacity: usize,
}

impl<R> RunnerPool<R> {
    /// Pool over an already-linked set of runners. Slot numbers follow
    /// the order of `runners`.
    pub fn new(runners: Vec<R>) -> Self {
        let capacity = runners.len();
        Self {
            state: Mutex::new(PoolState {
                idle: runners.into_iter().enumerate().collect(),
                in_use: 0,
                closed: false,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Check out a runner, blocking until one is idle.
    pub fn acquire(&self) -> Result<RunnerGuard<'_, R>, PoolError> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(PoolError::Closed);
            }
            if let Some((slot, runner)) = state.idle.pop_front() {
                state.in_use += 1;
                return Ok(RunnerGuard {
                    pool: self,
                    slot,
                    runner: Some(runner),
                });
            }
            self.available.wait(&mut state);
        }
    }

    /// Check out a runner if one is idle right now.
    pub fn try_acquire(&self) -> Result<Option<RunnerGuard<'_, R>>, PoolError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }
        Ok(state.idle.pop_front().map(|(slot, runner)| {
            state.in_use += 1;
            RunnerGuard {
                pool: self,
                slot,
                runner: Some(runner),
            }
        }))
    }

    /// Close the pool and wake all waiters. Returns the number of idle
    /// runners dropped; returns 0 if already closed.
    pub fn close(&self) -> usize {
        let idle = {
            let mut state = self.state.lock();
            if state.closed {
                return 0;
            }
            state.closed = true;
            std::mem::take(&mut state.idle)
        };
        self.available.notify_all();
        let dropped = idle.len();
        drop(idle);
        dropped
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            capacity: self.capacity,
            idle: state.idle.len(),
            in_use: state.in_use,
            closed: state.closed,
        }
    }

    fn check_in(&self, slot: usize, runner: R) {
        let mut state = self.state.lock();
        state.in_use -= 1;
        if state.closed {
            drop(state);
            drop(runner);
            return;
        }
        state.idle.push_back((slot, runner));
        drop(state);
        self.available.notify_one();
    }
}

/// Exclusive checkout of one runner.
pub struct RunnerGuard<'a, R> {
    pool: &'a RunnerPool<R>,
    slot: usize,
    runner: Option<R>,
}

impl<R> RunnerGuard<'_, R> {
    /// Pool slot of the checked-out runner.
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl<R> Deref for RunnerGuard<'_, R> {
    type Target = R;

    fn deref(&self) -> &R {
        // Only `Drop` takes the runner out.
        match &self.runner {
            Some(runner) => runner,
            None => unreachable!("runner guard used after release"),
        }
    }
}

impl<R> DerefMut for RunnerGuard<'_, R> {
    fn deref_mut(&mut self) -> &mut R {
        match &mut self.runner {
            Some(runner) => runner,
            None => unreachable!("runner guard used after release"),
        }
    }
}

impl<R> Drop for RunnerGuard<'_, R> {
    fn drop(&mut self) {
        if let Some(runner) = self.runner.take() {
            self.pool.check_in(self.slot, runner);
        }
    }
}

//! Interchangeable task-execution engines sharing one submission contract.
//!
//! Four variants differ in how they queue, dispatch, and size their worker
//! population:
//!
//! - [`FixedPool`]: exactly N workers over one shared FIFO queue.
//! - [`ElasticPool`]: between min and max workers over one shared FIFO queue;
//!   idle workers above the minimum retire after a timeout.
//! - [`StealingPool`]: exactly N workers, one double-ended queue per worker,
//!   work stealing between them.
//! - [`ElasticStealingPool`]: per-worker queues plus stealing, with workers
//!   spawned on backlog and retired when idle.
//!
//! All of them drain already-queued work on drop before joining their
//! workers, and refuse submissions once shutdown has begun.

use crate::error::PoolError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub(crate) mod context;
pub(crate) mod queue;

mod fixed;
pub use fixed::FixedPool;

mod elastic;
pub use elastic::ElasticPool;

mod stealing;
pub use stealing::StealingPool;

mod elastic_stealing;
pub use elastic_stealing::ElasticStealingPool;

#[cfg(test)]
mod tests;

/// An owned, run-once unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// The submission capability every pool variant implements.
///
/// Object safe so callers that select a variant at startup can hold a
/// `Box<dyn Pool>` and treat all variants uniformly.
pub trait Pool: Send + Sync + 'static {
    /// Queue a job for execution on some worker of this pool.
    ///
    /// Once this returns `Ok`, the job runs exactly once before the pool's
    /// drop completes. Fails with [`PoolError::ShutdownInProgress`] after
    /// destruction has begun.
    fn submit_job(&self, job: Job) -> Result<(), PoolError>;
}

/// A cheap, clonable submission handle.
///
/// A `Remote` keeps the pool's allocation alive but never its workers: the
/// owning handle's drop still shuts the pool down, after which submissions
/// through any remote fail with [`PoolError::ShutdownInProgress`]. This is
/// what jobs capture when they need to submit follow-up work from inside a
/// worker.
#[derive(Clone)]
pub struct Remote {
    pool: Arc<dyn Pool>,
}

impl Remote {
    pub(crate) fn new(pool: Arc<dyn Pool>) -> Self {
        Self { pool }
    }

    pub fn submit(&self, f: impl FnOnce() + Send + 'static) -> Result<(), PoolError> {
        self.pool.submit_job(Box::new(f))
    }
}

impl Pool for Remote {
    fn submit_job(&self, job: Job) -> Result<(), PoolError> {
        self.pool.submit_job(job)
    }
}

/// Pool flavor, as selected by the benchmark and demo binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Classic,
    Elastic,
    WorkStealing,
    ElasticStealing,
}

impl FromStr for PoolKind {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "classic" => Ok(Self::Classic),
            "elastic" => Ok(Self::Elastic),
            "ws" => Ok(Self::WorkStealing),
            "advws" => Ok(Self::ElasticStealing),
            other => Err(PoolError::InvalidConfiguration(format!(
                "unknown pool kind: {other} (use classic/elastic/ws/advws)"
            ))),
        }
    }
}

/// Build a boxed pool of the given kind.
///
/// Fixed kinds use `min_threads` as their worker count; elastic kinds grow
/// between `min_threads` and `max_threads`, retiring idlers after
/// `idle_timeout`.
pub fn build_pool(
    kind: PoolKind,
    min_threads: usize,
    max_threads: usize,
    idle_timeout: Duration,
) -> Result<Box<dyn Pool>, PoolError> {
    Ok(match kind {
        PoolKind::Classic => Box::new(FixedPool::new(min_threads)?),
        PoolKind::WorkStealing => Box::new(StealingPool::new(min_threads)?),
        PoolKind::Elastic => Box::new(ElasticPool::new(min_threads, max_threads, idle_timeout)?),
        PoolKind::ElasticStealing => Box::new(ElasticStealingPool::new(
            min_threads,
            max_threads,
            idle_timeout,
        )?),
    })
}

/// Run a job, containing any panic so the worker loop survives user bugs.
pub(crate) fn run_job(job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        tracing::warn!("work item panicked; worker continues");
    }
}

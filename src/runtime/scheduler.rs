//! The adapter that makes a pool usable as an executor.

use crate::pool::Remote;
use crate::runtime::task::TaskCell;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Drives suspendable computations through a worker pool.
///
/// Cloning is cheap; every clone posts to the same pool. A scheduler never
/// owns the pool's lifecycle: once the owning handle drops, resumptions fail
/// and the affected tasks are dropped with a warning.
#[derive(Clone)]
pub struct Scheduler {
    pub(crate) pool: Remote,
}

impl Scheduler {
    pub fn new(pool: Remote) -> Self {
        Self { pool }
    }

    /// The submission handle this scheduler posts through.
    pub fn remote(&self) -> Remote {
        self.pool.clone()
    }

    /// Relocate execution onto a pool worker.
    ///
    /// Awaiting this suspends the current computation and posts its
    /// resumption as an ordinary work item, so the code after the await runs
    /// on some worker of the pool, behind any items the same thread already
    /// submitted through the pool's shared FIFO path.
    pub fn schedule(&self) -> Schedule {
        Schedule { yielded: false }
    }

    /// Start a detached computation.
    ///
    /// It begins immediately on the calling thread, is not held, and cannot
    /// be awaited; a panic inside it terminates the process.
    pub fn spawn_detached<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cell = TaskCell::new(self.pool.clone(), Box::pin(future));
        TaskCell::step(&cell);
    }
}

/// Awaiter returned by [`Scheduler::schedule`].
pub struct Schedule {
    yielded: bool,
}

impl Future for Schedule {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.yielded {
            return Poll::Ready(());
        }

        this.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

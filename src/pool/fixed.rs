//! Fixed-size pool over one shared FIFO queue.

use crate::error::PoolError;
use crate::pool::{run_job, Job, Pool, Remote};
use crate::runtime::Scheduler;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// A pool with exactly `num_threads` workers draining one shared FIFO queue.
///
/// Submissions from a single producer are dequeued in submission order.
/// Dropping the handle begins shutdown: already-queued work is drained, then
/// every worker is joined before `drop` returns.
pub struct FixedPool {
    core: Arc<Core>,
    workers: Vec<thread::JoinHandle<()>>,
}

struct Core {
    queue: Mutex<VecDeque<Job>>,
    available: Condvar,
    shutdown: AtomicBool,
}

impl FixedPool {
    pub fn new(num_threads: usize) -> Result<Self, PoolError> {
        if num_threads == 0 {
            return Err(PoolError::InvalidConfiguration(
                "fixed pool needs at least one worker".into(),
            ));
        }

        let core = Arc::new(Core {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let workers = (0..num_threads)
            .map(|slot| {
                let core = Arc::clone(&core);
                thread::Builder::new()
                    .name(format!("threadmill-fixed-{slot}"))
                    .spawn(move || core.worker_loop())
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Ok(Self { core, workers })
    }

    /// Queue a closure for execution on some worker.
    pub fn submit(&self, f: impl FnOnce() + Send + 'static) -> Result<(), PoolError> {
        self.core.submit_job(Box::new(f))
    }

    /// A clonable submission handle that does not own the pool's lifecycle.
    pub fn remote(&self) -> Remote {
        Remote::new(Arc::clone(&self.core) as Arc<dyn Pool>)
    }

    /// A scheduler driving suspendable computations through this pool.
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.remote())
    }
}

impl Pool for FixedPool {
    fn submit_job(&self, job: Job) -> Result<(), PoolError> {
        self.core.submit_job(job)
    }
}

impl Pool for Core {
    fn submit_job(&self, job: Job) -> Result<(), PoolError> {
        let mut queue = self.queue.lock();
        if self.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::ShutdownInProgress);
        }
        queue.push_back(job);
        drop(queue);

        self.available.notify_one();
        Ok(())
    }
}

impl Core {
    fn worker_loop(&self) {
        loop {
            let mut queue = self.queue.lock();
            self.available.wait_while(&mut queue, |queue| {
                !self.shutdown.load(Ordering::Acquire) && queue.is_empty()
            });

            // Leave only once the queue has been drained.
            if self.shutdown.load(Ordering::Acquire) && queue.is_empty() {
                return;
            }

            let Some(job) = queue.pop_front() else { continue };
            drop(queue);

            run_job(job);
        }
    }
}

impl Drop for FixedPool {
    fn drop(&mut self) {
        self.core.shutdown.store(true, Ordering::Release);
        self.core.available.notify_all();

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        tracing::debug!("fixed pool drained and joined");
    }
}

//! Fixed-size work-stealing pool with per-worker deques.

use crate::error::PoolError;
use crate::pool::context::{self, PoolId};
use crate::pool::queue::WorkerQueue;
use crate::pool::{run_job, Job, Pool, Remote};
use crate::runtime::Scheduler;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// A pool with exactly `num_threads` workers, one deque per worker.
///
/// A submission from inside one of the pool's own workers is a fork-style
/// spawn: it lands on the front of that worker's deque and is the next item
/// that worker runs. External submissions are placed round-robin on the back
/// of a deque, and idle workers steal from the back of their peers', so no
/// cross-producer ordering is promised.
pub struct StealingPool {
    core: Arc<Core>,
    workers: Vec<thread::JoinHandle<()>>,
}

struct Core {
    id: PoolId,
    queues: Vec<WorkerQueue>,

    // Guards the condvar and external round-robin placement.
    wake_lock: Mutex<()>,
    wake: Condvar,

    /// Enqueued but not yet dequeued; the workers' wake predicate.
    queued: AtomicUsize,
    round_robin: AtomicUsize,
    shutdown: AtomicBool,
}

impl StealingPool {
    pub fn new(num_threads: usize) -> Result<Self, PoolError> {
        if num_threads == 0 {
            return Err(PoolError::InvalidConfiguration(
                "work-stealing pool needs at least one worker".into(),
            ));
        }

        let core = Arc::new(Core {
            id: PoolId::next(),
            queues: (0..num_threads).map(|_| WorkerQueue::new()).collect(),
            wake_lock: Mutex::new(()),
            wake: Condvar::new(),
            queued: AtomicUsize::new(0),
            round_robin: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
        });

        let workers = (0..num_threads)
            .map(|slot| {
                let core = Arc::clone(&core);
                thread::Builder::new()
                    .name(format!("threadmill-ws-{slot}"))
                    .spawn(move || {
                        let _worker = context::enter_worker(core.id, slot);
                        core.worker_loop(slot);
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Ok(Self { core, workers })
    }

    pub fn submit(&self, f: impl FnOnce() + Send + 'static) -> Result<(), PoolError> {
        self.core.submit_job(Box::new(f))
    }

    pub fn remote(&self) -> Remote {
        Remote::new(Arc::clone(&self.core) as Arc<dyn Pool>)
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.remote())
    }
}

impl Pool for StealingPool {
    fn submit_job(&self, job: Job) -> Result<(), PoolError> {
        self.core.submit_job(job)
    }
}

impl Pool for Core {
    fn submit_job(&self, job: Job) -> Result<(), PoolError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::ShutdownInProgress);
        }

        // Fork-style spawn from one of our own workers: the child runs next
        // on the same thread.
        if let Some(slot) = context::current_slot(self.id) {
            self.queues[slot].push_front(job);
            self.queued.fetch_add(1, Ordering::Release);
            self.wake.notify_one();
            return Ok(());
        }

        {
            let _placement = self.wake_lock.lock();
            let idx = self.round_robin.fetch_add(1, Ordering::Relaxed) % self.queues.len();
            self.queues[idx].push_back(job);
            self.queued.fetch_add(1, Ordering::Release);
        }
        self.wake.notify_one();
        Ok(())
    }
}

impl Core {
    fn worker_loop(&self, slot: usize) {
        loop {
            if self.shutdown.load(Ordering::Acquire) && self.queued.load(Ordering::Acquire) == 0 {
                return;
            }

            if let Some(job) = self.find_job(slot) {
                run_job(job);
                continue;
            }

            // A wakeup only means "something was queued somewhere"; the item
            // may already be gone by the time we look, so loop rather than
            // assume it was ours.
            let mut guard = self.wake_lock.lock();
            self.wake.wait_while(&mut guard, |_| {
                !self.shutdown.load(Ordering::Acquire)
                    && self.queued.load(Ordering::Acquire) == 0
            });
        }
    }

    fn find_job(&self, slot: usize) -> Option<Job> {
        self.queues[slot]
            .pop_front(&self.queued)
            .or_else(|| self.steal_from_others(slot))
    }

    fn steal_from_others(&self, thief: usize) -> Option<Job> {
        let num_queues = self.queues.len();
        if num_queues <= 1 {
            return None;
        }

        (1..num_queues).find_map(|k| {
            let victim = (thief + k) % num_queues;
            self.queues[victim].try_steal(&self.queued)
        })
    }
}

impl Drop for StealingPool {
    fn drop(&mut self) {
        self.core.shutdown.store(true, Ordering::Release);
        self.core.wake.notify_all();

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        tracing::debug!("work-stealing pool drained and joined");
    }
}

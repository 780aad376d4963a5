//! Elastic work-stealing pool: per-worker deques, stealing, and a worker
//! population that grows on backlog and shrinks when idle.
//!
//! Up to `max_threads` deque slots exist from construction; a slot is either
//! held by a running worker or free for a future spawn. Reusing a slot first
//! joins its previous occupant, so at most one thread ever owns a slot.

use crate::error::PoolError;
use crate::pool::context::{self, PoolId};
use crate::pool::queue::WorkerQueue;
use crate::pool::{run_job, Job, Pool, Remote};
use crate::runtime::Scheduler;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

pub struct ElasticStealingPool {
    core: Arc<Core>,
}

struct Core {
    self_ref: Weak<Core>,
    id: PoolId,
    queues: Vec<WorkerQueue>,

    // Slot table and elastic counters; also the condvar's mutex, so spawn,
    // retirement, and idle waits are serialized against each other.
    policy: Mutex<Policy>,
    wake: Condvar,

    queued: AtomicUsize,
    round_robin: AtomicUsize,
    shutdown: AtomicBool,

    min_threads: usize,
    max_threads: usize,
    idle_timeout: Duration,
}

struct Policy {
    running: Vec<bool>,
    handles: Vec<Option<thread::JoinHandle<()>>>,
    active: usize,
    idle: usize,
}

impl Policy {
    fn first_inactive_slot(&self) -> Option<usize> {
        self.running.iter().position(|running| !running)
    }
}

impl ElasticStealingPool {
    pub fn new(
        min_threads: usize,
        max_threads: usize,
        idle_timeout: Duration,
    ) -> Result<Self, PoolError> {
        if min_threads == 0 || max_threads == 0 || min_threads > max_threads {
            return Err(PoolError::InvalidConfiguration(format!(
                "elastic bounds must satisfy 0 < min <= max, got {min_threads}..{max_threads}"
            )));
        }

        let core = Arc::new_cyclic(|weak| Core {
            self_ref: weak.clone(),
            id: PoolId::next(),
            queues: (0..max_threads).map(|_| WorkerQueue::new()).collect(),
            policy: Mutex::new(Policy {
                running: vec![false; max_threads],
                handles: (0..max_threads).map(|_| None).collect(),
                active: 0,
                idle: 0,
            }),
            wake: Condvar::new(),
            queued: AtomicUsize::new(0),
            round_robin: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            min_threads,
            max_threads,
            idle_timeout,
        });

        let mut policy = core.policy.lock();
        for slot in 0..min_threads {
            core.spawn_worker(&mut policy, slot);
        }
        drop(policy);

        Ok(Self { core })
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

impl Pool for ElasticStealingPool {
    fn submit_job(&self, job: Job) -> Result<(), PoolError> {
        self.core.submit_job(job)
    }
}

impl Pool for Core {
    fn submit_job(&self, job: Job) -> Result<(), PoolError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::ShutdownInProgress);
        }

        if let Some(slot) = context::current_slot(self.id) {
            self.queues[slot].push_front(job);
            self.queued.fetch_add(1, Ordering::Release);
            self.wake.notify_one();
            return Ok(());
        }

        let spawn_slot = {
            let mut policy = self.policy.lock();
            let idx = self.round_robin.fetch_add(1, Ordering::Relaxed) % self.queues.len();
            self.queues[idx].push_back(job);
            self.queued.fetch_add(1, Ordering::Release);

            if policy.idle == 0 && policy.active < self.max_threads {
                policy.first_inactive_slot()
            } else {
                None
            }
        };

        if let Some(slot) = spawn_slot {
            let mut policy = self.policy.lock();
            // Re-check under the lock: concurrent submitters must not
            // overspawn onto the same slot, and a spawn decided just before
            // shutdown must not create a worker the destructor cannot join.
            if !self.shutdown.load(Ordering::Acquire)
                && !policy.running[slot]
                && policy.active < self.max_threads
            {
                self.spawn_worker(&mut policy, slot);
            }
        }

        self.wake.notify_one();
        Ok(())
    }
}

impl Core {
    fn spawn_worker(&self, policy: &mut MutexGuard<'_, Policy>, slot: usize) {
        // The slot is only reused once its previous occupant is fully joined.
        if let Some(prior) = policy.handles[slot].take() {
            let _ = prior.join();
        }

        policy.running[slot] = true;
        policy.active += 1;

        let core = self.self_ref.upgrade().expect("pool core already released");
        let handle = thread::Builder::new()
            .name(format!("threadmill-advws-{slot}"))
            .spawn(move || {
                let _worker = context::enter_worker(core.id, slot);
                core.worker_loop(slot);
            })
            .expect("failed to spawn worker thread");

        policy.handles[slot] = Some(handle);
        tracing::debug!(slot, active = policy.active, "stealing worker spawned");
    }

    fn worker_loop(&self, slot: usize) {
        loop {
            if self.shutdown.load(Ordering::Acquire) && self.queued.load(Ordering::Acquire) == 0 {
                self.release_slot(&mut self.policy.lock(), slot);
                return;
            }

            if let Some(job) = self.find_job(slot) {
                run_job(job);
                continue;
            }

            let mut policy = self.policy.lock();
            policy.idle += 1;
            let timed_out = self
                .wake
                .wait_while_for(
                    &mut policy,
                    |_| {
                        !self.shutdown.load(Ordering::Acquire)
                            && self.queued.load(Ordering::Acquire) == 0
                    },
                    self.idle_timeout,
                )
                .timed_out();
            policy.idle -= 1;

            if self.shutdown.load(Ordering::Acquire) && self.queued.load(Ordering::Acquire) == 0 {
                self.release_slot(&mut policy, slot);
                return;
            }

            if timed_out
                && self.queued.load(Ordering::Acquire) == 0
                && policy.active > self.min_threads
            {
                self.release_slot(&mut policy, slot);
                tracing::debug!(slot, "idle stealing worker retired");
                return;
            }
        }
    }

    /// Announce this worker's retirement: the slot becomes free for a future
    /// spawn, but the departing thread is joined later, by that spawn or by
    /// the pool's drop.
    fn release_slot(&self, policy: &mut MutexGuard<'_, Policy>, slot: usize) {
        if policy.running[slot] {
            policy.running[slot] = false;
            policy.active -= 1;
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

    #[cfg(test)]
    pub(crate) fn active_threads(&self) -> usize {
        self.policy.lock().active
    }
}

#[cfg(test)]
impl ElasticStealingPool {
    pub(crate) fn active_threads(&self) -> usize {
        self.core.active_threads()
    }
}

impl Drop for ElasticStealingPool {
    fn drop(&mut self) {
        self.core.shutdown.store(true, Ordering::Release);
        self.core.wake.notify_all();

        // Spawns happen under the policy mutex behind a shutdown re-check,
        // so once the flag is up and the lock has been taken, the slot table
        // is complete: no later submission can fill a slot.
        let handles: Vec<_> = {
            let mut policy = self.core.policy.lock();
            policy.handles.iter_mut().filter_map(Option::take).collect()
        };
        for handle in handles {
            let _ = handle.join();
        }
        tracing::debug!("elastic stealing pool drained and joined");
    }
}

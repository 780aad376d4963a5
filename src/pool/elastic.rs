//! Elastic pool over one shared FIFO queue.
//!
//! The worker population floats between `min_threads` and `max_threads`: a
//! submission that finds no idle worker spawns one (budget permitting), and a
//! worker whose timed idle wait elapses with nothing queued retires if the
//! pool is above its minimum.

use crate::error::PoolError;
use crate::pool::{run_job, Job, Pool, Remote};
use crate::runtime::Scheduler;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

pub struct ElasticPool {
    core: Arc<Core>,
}

struct Core {
    // Handed to workers spawned from `submit`, which only sees `&self`.
    self_ref: Weak<Core>,

    state: Mutex<State>,
    available: Condvar,
    shutdown: AtomicBool,
    spawn_seq: AtomicUsize,

    min_threads: usize,
    max_threads: usize,
    idle_timeout: Duration,
}

/// Queue, elastic counters, and worker handles live under one mutex: a spawn
/// decision is atomic with the enqueue that motivated it, and a new worker's
/// handle is registered in the same critical section that decided to spawn
/// it, so shutdown can never miss a join.
struct State {
    queue: VecDeque<Job>,
    active: usize,
    idle: usize,
    // Retired workers are joined lazily, at drop.
    handles: Vec<thread::JoinHandle<()>>,
}

impl ElasticPool {
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
            state: Mutex::new(State {
                queue: VecDeque::new(),
                active: 0,
                idle: 0,
                handles: Vec::new(),
            }),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
            spawn_seq: AtomicUsize::new(0),
            min_threads,
            max_threads,
            idle_timeout,
        });

        let mut state = core.state.lock();
        state.active = min_threads;
        for _ in 0..min_threads {
            core.spawn_worker(&mut state);
        }
        drop(state);

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

impl Pool for ElasticPool {
    fn submit_job(&self, job: Job) -> Result<(), PoolError> {
        self.core.submit_job(job)
    }
}

impl Pool for Core {
    fn submit_job(&self, job: Job) -> Result<(), PoolError> {
        {
            let mut state = self.state.lock();
            if self.shutdown.load(Ordering::Acquire) {
                return Err(PoolError::ShutdownInProgress);
            }
            state.queue.push_back(job);

            // No worker is waiting for this item; grow if the budget allows.
            if state.idle == 0 && state.active < self.max_threads {
                state.active += 1;
                self.spawn_worker(&mut state);
            }
        }

        self.available.notify_one();
        Ok(())
    }
}

impl Core {
    fn spawn_worker(&self, state: &mut MutexGuard<'_, State>) {
        let seq = self.spawn_seq.fetch_add(1, Ordering::Relaxed);
        let worker = self.self_ref.upgrade().expect("pool core already released");

        let handle = thread::Builder::new()
            .name(format!("threadmill-elastic-{seq}"))
            .spawn(move || worker.worker_loop())
            .expect("failed to spawn worker thread");

        state.handles.push(handle);
        tracing::debug!(seq, "elastic worker spawned");
    }

    fn worker_loop(&self) {
        loop {
            let mut state = self.state.lock();

            state.idle += 1;
            let timed_out = self
                .available
                .wait_while_for(
                    &mut state,
                    |state| !self.shutdown.load(Ordering::Acquire) && state.queue.is_empty(),
                    self.idle_timeout,
                )
                .timed_out();
            state.idle -= 1;

            if self.shutdown.load(Ordering::Acquire) && state.queue.is_empty() {
                state.active -= 1;
                return;
            }

            if timed_out && state.queue.is_empty() && state.active > self.min_threads {
                state.active -= 1;
                tracing::debug!(active = state.active, "idle elastic worker retired");
                return;
            }

            let Some(job) = state.queue.pop_front() else { continue };
            drop(state);

            run_job(job);
        }
    }

    #[cfg(test)]
    pub(crate) fn active_threads(&self) -> usize {
        self.state.lock().active
    }
}

#[cfg(test)]
impl ElasticPool {
    pub(crate) fn active_threads(&self) -> usize {
        self.core.active_threads()
    }
}

impl Drop for ElasticPool {
    fn drop(&mut self) {
        self.core.shutdown.store(true, Ordering::Release);
        self.core.available.notify_all();

        // Spawns register their handle inside the same critical section as
        // the decision, so once the flag is up and the lock has been taken,
        // the vector is complete: no later submission can spawn.
        let handles = std::mem::take(&mut self.core.state.lock().handles);
        for handle in handles {
            let _ = handle.join();
        }
        tracing::debug!("elastic pool drained and joined");
    }
}

//! Per-worker double-ended job queue.

use super::Job;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One worker's deque.
///
/// The owning worker pushes and pops the front, so freshly forked child work
/// runs next on the same, cache-warm thread. Producers append to the back,
/// and thieves take the back through [`WorkerQueue::try_steal`], which skips
/// the queue entirely when its lock is contended.
///
/// The pool-wide queued-task counter is decremented under the queue lock,
/// immediately after the pop it accounts for.
pub(crate) struct WorkerQueue {
    jobs: Mutex<VecDeque<Job>>,
}

impl WorkerQueue {
    pub(crate) fn new() -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
        }
    }

    /// Owner-side push: the item becomes the next to run on this worker.
    pub(crate) fn push_front(&self, job: Job) {
        self.jobs.lock().push_front(job);
    }

    /// Producer-side push: append in arrival order.
    pub(crate) fn push_back(&self, job: Job) {
        self.jobs.lock().push_back(job);
    }

    /// Owner-side pop (LIFO with respect to the owner's own pushes).
    pub(crate) fn pop_front(&self, queued: &AtomicUsize) -> Option<Job> {
        let mut jobs = self.jobs.lock();
        let job = jobs.pop_front()?;
        queued.fetch_sub(1, Ordering::AcqRel);
        Some(job)
    }

    /// Thief-side pop from the back, biased toward older entries.
    ///
    /// Returns `None` without blocking if the queue is locked or empty.
    pub(crate) fn try_steal(&self, queued: &AtomicUsize) -> Option<Job> {
        let mut jobs = self.jobs.try_lock()?;
        let job = jobs.pop_back()?;
        queued.fetch_sub(1, Ordering::AcqRel);
        Some(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn owner_sees_lifo_thief_sees_fifo() {
        let queued = AtomicUsize::new(3);
        let queue = WorkerQueue::new();
        let log: &'static Mutex<Vec<u8>> = Box::leak(Box::new(Mutex::new(Vec::new())));

        for tag in [1u8, 2, 3] {
            queue.push_front(Box::new(move || log.lock().push(tag)));
        }

        // The thief takes the oldest entry, the owner the newest.
        queue.try_steal(&queued).unwrap()();
        queue.pop_front(&queued).unwrap()();
        queue.pop_front(&queued).unwrap()();

        assert_eq!(*log.lock(), vec![1, 3, 2]);
        assert_eq!(queued.load(Ordering::Relaxed), 0);
        assert!(queue.pop_front(&queued).is_none());
    }
}

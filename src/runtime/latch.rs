//! Count-down synchronizer for joining detached fan-outs.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

/// A single-use latch: initialize with the fan-out width, have every detached
/// computation call [`DetachedLatch::count_down`] exactly once, and block on
/// [`DetachedLatch::wait`] until all of them have.
pub struct DetachedLatch {
    remaining: AtomicUsize,
    lock: Mutex<()>,
    zeroed: Condvar,
}

impl DetachedLatch {
    /// `initial` must be greater than zero.
    pub fn new(initial: usize) -> Self {
        assert!(initial > 0, "latch count must be positive");
        Self {
            remaining: AtomicUsize::new(initial),
            lock: Mutex::new(()),
            zeroed: Condvar::new(),
        }
    }

    pub fn count_down(&self) {
        let prev = self.remaining.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 {
            let _guard = self.lock.lock();
            self.zeroed.notify_one();
        }
    }

    pub fn wait(&self) {
        let mut guard = self.lock.lock();
        self.zeroed
            .wait_while(&mut guard, |_| self.remaining.load(Ordering::Acquire) != 0);
    }
}

//! The cell that turns "poll this future again" into pool work items.

use crate::pool::Remote;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::process;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

/// Suspended; nobody is scheduled to poll.
const IDLE: u8 = 0;
/// A step job is queued on the pool.
const SCHEDULED: u8 = 1;
/// A thread is polling right now.
const RUNNING: u8 = 2;
/// Woken while running; the current stepper must requeue after its poll.
const NOTIFIED: u8 = 3;
/// The future returned `Ready` (or was dropped after a failed resume).
const COMPLETE: u8 = 4;

/// A suspendable computation bound to a pool.
///
/// The cell owns the future between polls. Its waker transitions the state
/// machine and, when the cell is idle, submits a step job; this guarantees a
/// single stepper at a time, so the future mutex is never held across a poll
/// by anyone else and wakes arriving mid-poll are not lost.
pub(crate) struct TaskCell {
    state: AtomicU8,
    future: Mutex<Option<BoxFuture<'static, ()>>>,
    pool: Remote,
}

impl TaskCell {
    /// Create a cell ready for its first, inline [`TaskCell::step`].
    pub(crate) fn new(pool: Remote, future: BoxFuture<'static, ()>) -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(SCHEDULED),
            future: Mutex::new(Some(future)),
            pool,
        })
    }

    /// Run one poll step. Called inline when the computation starts, and from
    /// pool workers for every resumption after that.
    pub(crate) fn step(this: &Arc<Self>) {
        this.state.store(RUNNING, Ordering::Release);

        let taken = this.future.lock().take();
        let Some(mut future) = taken else { return };

        let waker = Waker::from(Arc::clone(this));
        let mut cx = Context::from_waker(&waker);

        match catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
            Ok(Poll::Ready(())) => {
                this.state.store(COMPLETE, Ordering::Release);
            }
            Ok(Poll::Pending) => {
                // Store the future back before giving up RUNNING, so whoever
                // steps next finds it in place.
                *this.future.lock() = Some(future);

                if this
                    .state
                    .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    // A wake arrived mid-poll; we are the designated requeuer.
                    this.state.store(SCHEDULED, Ordering::Release);
                    Self::resubmit(this);
                }
            }
            Err(_) => {
                // A detached computation has no holder left to observe the
                // failure; letting it vanish would mask the bug.
                tracing::error!("detached task panicked; aborting process");
                process::abort();
            }
        }
    }

    fn resubmit(this: &Arc<Self>) {
        let cell = Arc::clone(this);
        if this.pool.submit(move || TaskCell::step(&cell)).is_err() {
            tracing::warn!("task resumed after pool shutdown; dropping it");
            this.state.store(COMPLETE, Ordering::Release);
            *this.future.lock() = None;
        }
    }
}

impl Wake for TaskCell {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        loop {
            match self.state.load(Ordering::Acquire) {
                IDLE => {
                    if self
                        .state
                        .compare_exchange(IDLE, SCHEDULED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        Self::resubmit(self);
                        return;
                    }
                }
                RUNNING => {
                    if self
                        .state
                        .compare_exchange(RUNNING, NOTIFIED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return;
                    }
                }
                // Already queued, already notified, or finished.
                _ => return,
            }
        }
    }
}

//! Thread-local worker identity.
//!
//! A submission from inside a worker must route to that worker's own queue,
//! and the same OS thread may be a worker of one pool while acting as a plain
//! producer into another, so the identity is keyed by pool instance rather
//! than a bare slot index.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of one pool instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PoolId(u64);

impl PoolId {
    pub(crate) fn next() -> Self {
        Self(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

thread_local! {
    static CURRENT_WORKER: Cell<Option<(PoolId, usize)>> = const { Cell::new(None) };
}

/// Mark the current thread as worker `slot` of `pool` until the guard drops.
pub(crate) fn enter_worker(pool: PoolId, slot: usize) -> WorkerGuard {
    CURRENT_WORKER.with(|current| current.set(Some((pool, slot))));
    WorkerGuard { _priv: () }
}

/// The slot the current thread occupies in `pool`, if it is one of its
/// workers.
pub(crate) fn current_slot(pool: PoolId) -> Option<usize> {
    CURRENT_WORKER.with(|current| match current.get() {
        Some((id, slot)) if id == pool => Some(slot),
        _ => None,
    })
}

/// Clears the worker marker when the worker function returns.
pub(crate) struct WorkerGuard {
    _priv: (),
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        CURRENT_WORKER.with(|current| current.set(None));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn identity_is_scoped_to_pool_and_thread() {
        let pool_a = PoolId::next();
        let pool_b = PoolId::next();

        let guard = enter_worker(pool_a, 3);
        assert_eq!(current_slot(pool_a), Some(3));
        assert_eq!(current_slot(pool_b), None);

        // Another thread is not a worker of anything.
        thread::spawn(move || assert_eq!(current_slot(pool_a), None))
            .join()
            .unwrap();

        drop(guard);
        assert_eq!(current_slot(pool_a), None);
    }
}

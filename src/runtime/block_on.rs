//! The bridge from blocking code into the cooperative world.

use crate::runtime::task::TaskCell;
use crate::runtime::Scheduler;
use futures::FutureExt;
use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

struct Completion<T> {
    result: Mutex<Option<thread::Result<T>>>,
    done: Condvar,
}

impl Scheduler {
    /// Drive `future` to completion from blocking code.
    ///
    /// The first poll happens on the calling thread; every resumption after a
    /// suspension runs on a pool worker while the caller blocks. Returns the
    /// produced value, or resumes the unwind if the future panicked.
    pub fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let completion = Arc::new(Completion {
            result: Mutex::new(None),
            done: Condvar::new(),
        });

        let inner = Arc::clone(&completion);
        let recorder = async move {
            let result = AssertUnwindSafe(future).catch_unwind().await;
            *inner.result.lock() = Some(result);
            inner.done.notify_one();
        };

        let cell = TaskCell::new(self.pool.clone(), Box::pin(recorder));
        TaskCell::step(&cell);

        let mut result = completion.result.lock();
        completion
            .done
            .wait_while(&mut result, |result| result.is_none());

        match result.take().expect("completion signalled without a result") {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

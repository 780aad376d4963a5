//! Timer suspension backed by one-shot helper threads.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;

/// Suspend the awaiting computation for at least `duration`.
///
/// A detached helper thread performs the wait, so precision is whatever the
/// operating system's sleep provides. The resumption is posted as a pool
/// work item and therefore runs on a pool worker, no earlier than `duration`
/// after the suspension.
pub fn sleep_for(duration: Duration) -> Sleep {
    Sleep {
        duration,
        fired: None,
    }
}

/// Awaiter returned by [`sleep_for`].
pub struct Sleep {
    duration: Duration,
    fired: Option<Arc<AtomicBool>>,
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.duration.is_zero() {
            return Poll::Ready(());
        }

        match &this.fired {
            Some(fired) if fired.load(Ordering::Acquire) => Poll::Ready(()),
            Some(_) => Poll::Pending,
            None => {
                let fired = Arc::new(AtomicBool::new(false));
                this.fired = Some(Arc::clone(&fired));

                let waker = cx.waker().clone();
                let duration = this.duration;
                thread::Builder::new()
                    .name("threadmill-timer".into())
                    .spawn(move || {
                        thread::sleep(duration);
                        fired.store(true, Ordering::Release);
                        waker.wake();
                    })
                    .expect("failed to spawn timer thread");

                Poll::Pending
            }
        }
    }
}

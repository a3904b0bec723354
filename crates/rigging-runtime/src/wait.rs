#![forbid(unsafe_code)]

//! Futures that suspend until the event loop reaches a condition.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;

use tracing::trace;

use crate::event_loop::EventLoop;

/// Longest single sleep used to wake a pending wait on the real clock.
const MAX_SLEEP: Duration = Duration::from_secs(60);

/// Future returned by [`EventLoop::wait_until`].
///
/// Each poll runs all ready work, then checks the condition. When the
/// condition does not hold the future registers for new-work wakeups, and on
/// the real clock also arms a sleeper thread for the next timer deadline.
/// Under the virtual clock nothing advances time, so a wait on pending timers
/// only completes once another party ticks or flushes the loop.
#[must_use = "futures do nothing unless awaited"]
pub struct WaitUntil<F> {
    event_loop: EventLoop,
    condition: F,
    armed_for: Option<Duration>,
}

impl<F> WaitUntil<F> {
    pub(crate) fn new(event_loop: EventLoop, condition: F) -> Self {
        Self {
            event_loop,
            condition,
            armed_for: None,
        }
    }
}

impl<F: FnMut() -> bool + Unpin> Future for WaitUntil<F> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = &mut *self;
        this.event_loop.run_ready();
        if (this.condition)() {
            return Poll::Ready(());
        }
        this.event_loop.register_waker(cx.waker());
        if !this.event_loop.is_fake_time()
            && let Some(deadline) = this.event_loop.next_deadline()
            && this.armed_for != Some(deadline)
        {
            let delay = deadline
                .saturating_sub(this.event_loop.now())
                .min(MAX_SLEEP);
            this.armed_for = Some(deadline);
            trace!(?delay, "arming sleeper for next timer");
            let waker = cx.waker().clone();
            thread::spawn(move || {
                thread::sleep(delay);
                waker.wake();
            });
        }
        Poll::Pending
    }
}

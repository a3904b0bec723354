#![forbid(unsafe_code)]

//! Single-threaded task queue with a real or virtual clock.
//!
//! # Design
//!
//! [`EventLoop`] owns two queues: a FIFO of microtasks and an ordered map of
//! timers keyed by `(deadline, sequence)`. Microtasks always drain before the
//! next timer runs, and timers with equal deadlines run in scheduling order.
//!
//! The clock is either the wall clock ([`TimeMode::Real`]) or a virtual
//! offset that only moves when [`tick`](EventLoop::tick) or
//! [`flush`](EventLoop::flush) advances it ([`TimeMode::Virtual`]). The
//! virtual mode is what tests call "fake async": pending timers are drained
//! synchronously instead of being awaited.
//!
//! # Invariants
//!
//! 1. No `RefCell` borrow is held while a task runs, so tasks may schedule
//!    or cancel other tasks.
//! 2. Virtual time never moves backwards.
//! 3. A cancelled timer never runs.
//!
//! # Failure Modes
//!
//! - **Polling timers under virtual time**: a timer that re-arms itself makes
//!   [`flush`](EventLoop::flush) fail with
//!   [`RuntimeError::FlushLimitExceeded`] instead of spinning forever.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::task::Waker;
use std::time::Duration;

use tracing::{debug, trace};
use web_time::Instant;

use crate::error::{Result, RuntimeError};
use crate::wait::WaitUntil;

/// Default number of timers a single virtual-time flush may run.
pub const DEFAULT_MAX_FLUSH_TURNS: usize = 20;

/// Environment variable overriding [`EventLoopConfig::max_flush_turns`].
pub const MAX_FLUSH_TURNS_ENV: &str = "RIGGING_MAX_FLUSH_TURNS";

type Task = Box<dyn FnOnce()>;

/// Clock driving timer deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeMode {
    /// Deadlines follow the wall clock.
    #[default]
    Real,
    /// Deadlines follow a virtual clock advanced explicitly.
    Virtual,
}

/// Event loop configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLoopConfig {
    /// Clock used for timers.
    pub time_mode: TimeMode,
    /// Timers a single [`EventLoop::flush`] may run before failing.
    pub max_flush_turns: usize,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            time_mode: TimeMode::Real,
            max_flush_turns: DEFAULT_MAX_FLUSH_TURNS,
        }
    }
}

impl EventLoopConfig {
    /// Wall-clock configuration.
    #[must_use]
    pub fn real() -> Self {
        Self::default()
    }

    /// Virtual-clock configuration.
    #[must_use]
    pub fn virtual_time() -> Self {
        Self {
            time_mode: TimeMode::Virtual,
            ..Self::default()
        }
    }

    /// Set the flush limit.
    #[must_use]
    pub fn with_max_flush_turns(mut self, turns: usize) -> Self {
        self.max_flush_turns = turns.max(1);
        self
    }

    /// Apply `RIGGING_MAX_FLUSH_TURNS` if it is set to a positive integer.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(raw) = std::env::var(MAX_FLUSH_TURNS_ENV)
            && let Ok(turns) = raw.trim().parse::<usize>()
            && turns > 0
        {
            self.max_flush_turns = turns;
        }
        self
    }
}

/// Handle to a scheduled timer.
///
/// Ordering is by deadline, then by scheduling order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId {
    deadline: Duration,
    seq: u64,
}

impl TimerId {
    /// Deadline as an offset from the loop's origin.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.deadline
    }
}

struct LoopState {
    config: EventLoopConfig,
    origin: Instant,
    virtual_now: Duration,
    microtasks: VecDeque<Task>,
    timers: BTreeMap<TimerId, Task>,
    next_seq: u64,
    wakers: Vec<Waker>,
}

/// Shared handle to a single-threaded event loop.
///
/// Cloning creates another handle to the **same** queues.
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<RefCell<LoopState>>,
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("EventLoop")
            .field("time_mode", &inner.config.time_mode)
            .field("microtasks", &inner.microtasks.len())
            .field("timers", &inner.timers.len())
            .finish()
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new(EventLoopConfig::default())
    }
}

impl EventLoop {
    /// Create an event loop.
    #[must_use]
    pub fn new(config: EventLoopConfig) -> Self {
        Self {
            inner: Rc::new(RefCell::new(LoopState {
                config,
                origin: Instant::now(),
                virtual_now: Duration::ZERO,
                microtasks: VecDeque::new(),
                timers: BTreeMap::new(),
                next_seq: 0,
                wakers: Vec::new(),
            })),
        }
    }

    /// Event loop on the virtual clock, honoring the env flush override.
    #[must_use]
    pub fn virtual_time() -> Self {
        Self::new(EventLoopConfig::virtual_time().with_env_overrides())
    }

    /// Whether both handles refer to the same loop.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> EventLoopConfig {
        self.inner.borrow().config.clone()
    }

    /// Whether timers run on the virtual clock.
    #[must_use]
    pub fn is_fake_time(&self) -> bool {
        self.inner.borrow().config.time_mode == TimeMode::Virtual
    }

    /// Time elapsed since the loop was created.
    #[must_use]
    pub fn now(&self) -> Duration {
        let inner = self.inner.borrow();
        match inner.config.time_mode {
            TimeMode::Real => inner.origin.elapsed(),
            TimeMode::Virtual => inner.virtual_now,
        }
    }

    /// Queue a microtask.
    pub fn schedule_microtask(&self, task: impl FnOnce() + 'static) {
        self.inner.borrow_mut().microtasks.push_back(Box::new(task));
        self.wake_all();
    }

    /// Queue a timer firing `delay` from now.
    pub fn schedule_timer(&self, delay: Duration, task: impl FnOnce() + 'static) -> TimerId {
        let deadline = self.now() + delay;
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = TimerId {
                deadline,
                seq: inner.next_seq,
            };
            inner.next_seq += 1;
            inner.timers.insert(id, Box::new(task));
            id
        };
        trace!(?deadline, ?delay, "timer scheduled");
        self.wake_all();
        id
    }

    /// Cancel a timer. Returns `false` if it already ran or was cancelled.
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        let removed = self.inner.borrow_mut().timers.remove(&id).is_some();
        if removed {
            trace!(deadline = ?id.deadline, "timer cancelled");
        }
        removed
    }

    /// Number of queued microtasks.
    #[must_use]
    pub fn pending_microtasks(&self) -> usize {
        self.inner.borrow().microtasks.len()
    }

    /// Number of pending timers.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.inner.borrow().timers.len()
    }

    /// Deadline of the earliest pending timer.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        self.inner
            .borrow()
            .timers
            .first_key_value()
            .map(|(id, _)| id.deadline)
    }

    /// Drain the microtask queue, including microtasks queued while
    /// draining. Returns how many ran.
    pub fn run_microtasks(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.inner.borrow_mut().microtasks.pop_front();
            let Some(task) = task else {
                break;
            };
            task();
            ran += 1;
        }
        ran
    }

    /// Run microtasks and every timer whose deadline has passed.
    /// Returns how many tasks ran.
    pub fn run_ready(&self) -> usize {
        let mut ran = self.run_microtasks();
        let now = self.now();
        while let Some(task) = self.pop_due_timer(now) {
            task();
            ran += 1 + self.run_microtasks();
        }
        ran
    }

    /// Advance the virtual clock by `delay`, running every timer that
    /// becomes due along the way.
    pub fn tick(&self, delay: Duration) -> Result<()> {
        if !self.is_fake_time() {
            return Err(RuntimeError::real_time("tick"));
        }
        let target = self.now() + delay;
        self.run_microtasks();
        while let Some(task) = self.pop_due_timer(target) {
            task();
            self.run_microtasks();
        }
        self.set_virtual_now(target);
        debug!(?delay, now = ?target, "virtual clock ticked");
        Ok(())
    }

    /// Run every pending timer on the virtual clock, jumping time forward
    /// to each deadline. Returns the virtual time that elapsed.
    pub fn flush(&self) -> Result<Duration> {
        if !self.is_fake_time() {
            return Err(RuntimeError::real_time("flush"));
        }
        let start = self.now();
        let limit = self.inner.borrow().config.max_flush_turns;
        let mut turns = 0;
        self.run_microtasks();
        while let Some(deadline) = self.next_deadline() {
            turns += 1;
            if turns > limit {
                return Err(RuntimeError::FlushLimitExceeded { limit });
            }
            let Some(task) = self.pop_due_timer(deadline) else {
                break;
            };
            task();
            self.run_microtasks();
        }
        let elapsed = self.now().saturating_sub(start);
        debug!(?elapsed, turns, "virtual clock flushed");
        Ok(elapsed)
    }

    /// Future resolving once `condition` holds, running ready work each
    /// time it is polled.
    pub fn wait_until<F>(&self, condition: F) -> WaitUntil<F>
    where
        F: FnMut() -> bool + Unpin,
    {
        WaitUntil::new(self.clone(), condition)
    }

    /// Register a waker to be notified when new work is queued.
    pub fn register_waker(&self, waker: &Waker) {
        let mut inner = self.inner.borrow_mut();
        if !inner.wakers.iter().any(|w| w.will_wake(waker)) {
            inner.wakers.push(waker.clone());
        }
    }

    /// Wake every registered waker.
    pub fn wake_all(&self) {
        let wakers = std::mem::take(&mut self.inner.borrow_mut().wakers);
        for waker in wakers {
            waker.wake();
        }
    }

    fn pop_due_timer(&self, limit: Duration) -> Option<Task> {
        let mut inner = self.inner.borrow_mut();
        let id = *inner.timers.first_key_value()?.0;
        if id.deadline > limit {
            return None;
        }
        let task = inner.timers.remove(&id)?;
        if inner.config.time_mode == TimeMode::Virtual && id.deadline > inner.virtual_now {
            inner.virtual_now = id.deadline;
        }
        Some(task)
    }

    fn set_virtual_now(&self, now: Duration) {
        let mut inner = self.inner.borrow_mut();
        if now > inner.virtual_now {
            inner.virtual_now = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn log() -> Rc<RefCell<Vec<&'static str>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn microtasks_run_before_timers() {
        let event_loop = EventLoop::new(EventLoopConfig::virtual_time());
        let seen = log();
        let s = Rc::clone(&seen);
        event_loop.schedule_timer(Duration::ZERO, move || s.borrow_mut().push("timer"));
        let s = Rc::clone(&seen);
        event_loop.schedule_microtask(move || s.borrow_mut().push("micro"));
        event_loop.run_ready();
        assert_eq!(*seen.borrow(), vec!["micro", "timer"]);
    }

    #[test]
    fn tick_runs_only_due_timers() {
        let event_loop = EventLoop::new(EventLoopConfig::virtual_time());
        let seen = log();
        let s = Rc::clone(&seen);
        event_loop.schedule_timer(Duration::from_millis(10), move || s.borrow_mut().push("10"));
        let s = Rc::clone(&seen);
        event_loop.schedule_timer(Duration::from_millis(30), move || s.borrow_mut().push("30"));

        event_loop.tick(Duration::from_millis(20)).unwrap();
        assert_eq!(*seen.borrow(), vec!["10"]);
        assert_eq!(event_loop.now(), Duration::from_millis(20));

        event_loop.tick(Duration::from_millis(10)).unwrap();
        assert_eq!(*seen.borrow(), vec!["10", "30"]);
    }

    #[test]
    fn equal_deadlines_run_in_schedule_order() {
        let event_loop = EventLoop::new(EventLoopConfig::virtual_time());
        let seen = log();
        for label in ["a", "b", "c"] {
            let s = Rc::clone(&seen);
            event_loop.schedule_timer(Duration::from_millis(5), move || s.borrow_mut().push(label));
        }
        event_loop.flush().unwrap();
        assert_eq!(*seen.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn cancelled_timer_never_runs() {
        let event_loop = EventLoop::new(EventLoopConfig::virtual_time());
        let seen = log();
        let s = Rc::clone(&seen);
        let id = event_loop.schedule_timer(Duration::from_millis(1), move || s.borrow_mut().push("x"));
        assert!(event_loop.cancel_timer(id));
        assert!(!event_loop.cancel_timer(id));
        event_loop.flush().unwrap();
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn flush_reports_elapsed_virtual_time() {
        let event_loop = EventLoop::new(EventLoopConfig::virtual_time());
        event_loop.schedule_timer(Duration::from_millis(40), || {});
        event_loop.schedule_timer(Duration::from_millis(15), || {});
        assert_eq!(event_loop.flush().unwrap(), Duration::from_millis(40));
        assert_eq!(event_loop.pending_timers(), 0);
    }

    #[test]
    fn polling_timer_hits_flush_limit() {
        fn rearm(event_loop: EventLoop) {
            let next = event_loop.clone();
            event_loop.schedule_timer(Duration::from_millis(1), move || rearm(next));
        }
        let event_loop = EventLoop::new(EventLoopConfig::virtual_time().with_max_flush_turns(5));
        rearm(event_loop.clone());
        assert_eq!(
            event_loop.flush(),
            Err(RuntimeError::FlushLimitExceeded { limit: 5 })
        );
    }

    #[test]
    fn virtual_controls_reject_real_time() {
        let event_loop = EventLoop::new(EventLoopConfig::real());
        assert!(!event_loop.is_fake_time());
        assert!(matches!(
            event_loop.tick(Duration::from_millis(1)),
            Err(RuntimeError::RealTimeClock { operation: "tick" })
        ));
        assert!(event_loop.flush().is_err());
    }

    #[test]
    fn tasks_may_schedule_more_work() {
        let event_loop = EventLoop::new(EventLoopConfig::virtual_time());
        let seen = log();
        let s = Rc::clone(&seen);
        let inner_loop = event_loop.clone();
        event_loop.schedule_microtask(move || {
            s.borrow_mut().push("outer");
            let s2 = Rc::clone(&s);
            inner_loop.schedule_microtask(move || s2.borrow_mut().push("inner"));
        });
        assert_eq!(event_loop.run_microtasks(), 2);
        assert_eq!(*seen.borrow(), vec!["outer", "inner"]);
    }
}

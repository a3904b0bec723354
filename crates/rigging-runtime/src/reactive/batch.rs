#![forbid(unsafe_code)]

//! Batch update coalescing for [`Observable`](super::Observable)
//! notifications.
//!
//! A recomputation that updates many observables at once (for example every
//! row's hover state) should reach subscribers as one pass rather than one
//! notification per intermediate write. While a [`BatchScope`] is alive,
//! notifications are deferred; when the outermost scope drops, each unique
//! callback fires at most once with the latest value.
//!
//! ```ignore
//! let x = Observable::new(0);
//! let y = Observable::new(0);
//! {
//!     let _batch = BatchScope::new();
//!     x.set(1);
//!     y.set(2);
//!     x.set(3);
//! } // x subscribers called once with 3, y subscribers once with 2
//! ```
//!
//! # Invariants
//!
//! 1. Nested batches are supported: only the outermost scope flushes.
//! 2. Within a batch, `Observable::get()` returns the latest value (values
//!    are updated immediately, only notifications are deferred).
//! 3. After a batch exits, subscribers see the final state only.
//! 4. Flush calls deferred callbacks in the order they were first enqueued.
//! 5. Callbacks run after the batch is detached: values they set notify
//!    immediately, so derived values settle within the same flush.
//!
//! # Failure Modes
//!
//! - **Callback panics during flush**: Remaining callbacks are still called.
//!   The first panic is re-raised after all callbacks have been attempted.

use std::cell::RefCell;

use tracing::{debug, info_span};
use web_time::Instant;

type DeferredNotify = Box<dyn FnOnce()>;

struct DeferredEntry {
    key: Option<usize>,
    notify: DeferredNotify,
}

struct BatchContext {
    /// Nesting depth. Only flush when this reaches 0.
    depth: u32,
    deferred: Vec<DeferredEntry>,
    /// Number of source updates coalesced into this batch.
    sources_changed: u64,
}

thread_local! {
    static BATCH_CTX: RefCell<Option<BatchContext>> = const { RefCell::new(None) };
}

/// Returns true if a batch is currently active on this thread.
pub fn is_batching() -> bool {
    BATCH_CTX.with(|ctx| ctx.borrow().is_some())
}

/// Enqueue a notification for the current batch, or run it now if no batch
/// is active. Returns `true` if it was deferred.
pub fn defer_or_run(f: impl FnOnce() + 'static) -> bool {
    BATCH_CTX.with(|ctx| {
        let mut guard = ctx.borrow_mut();
        if let Some(ref mut batch) = *guard {
            batch.deferred.push(DeferredEntry {
                key: None,
                notify: Box::new(f),
            });
            true
        } else {
            drop(guard);
            f();
            false
        }
    })
}

/// Enqueue a notification keyed by `key`.
///
/// If the key is already queued, the earlier callback is replaced: the
/// latest callback wins and keeps the original queue position.
pub fn defer_or_run_keyed(key: usize, f: impl FnOnce() + 'static) -> bool {
    BATCH_CTX.with(|ctx| {
        let mut guard = ctx.borrow_mut();
        if let Some(ref mut batch) = *guard {
            if let Some(entry) = batch
                .deferred
                .iter_mut()
                .find(|entry| entry.key == Some(key))
            {
                entry.notify = Box::new(f);
            } else {
                batch.deferred.push(DeferredEntry {
                    key: Some(key),
                    notify: Box::new(f),
                });
            }
            true
        } else {
            drop(guard);
            f();
            false
        }
    })
}

/// Record source changes while a batch is active.
pub fn record_sources_changed(count: u64) {
    if count == 0 {
        return;
    }
    BATCH_CTX.with(|ctx| {
        if let Some(ref mut batch) = *ctx.borrow_mut() {
            batch.sources_changed = batch.sources_changed.saturating_add(count);
        }
    });
}

/// Detach the finished batch and run its callbacks. The context is cleared
/// first, so updates made by a callback propagate immediately and nested
/// scopes opened by a callback flush on their own.
fn flush() {
    let (sources_changed, deferred): (u64, Vec<DeferredNotify>) = BATCH_CTX.with(|ctx| {
        match ctx.borrow_mut().take() {
            Some(batch) => (
                batch.sources_changed,
                batch
                    .deferred
                    .into_iter()
                    .map(|entry| entry.notify)
                    .collect(),
            ),
            None => (0, Vec::new()),
        }
    });

    if deferred.is_empty() {
        return;
    }

    let subscribers_notified = deferred.len() as u64;
    let propagation_start = Instant::now();
    let _span = info_span!(
        "reactive.batch",
        sources_changed,
        subscribers_notified,
        duration_us = tracing::field::Empty
    )
    .entered();

    let mut first_panic: Option<Box<dyn std::any::Any + Send>> = None;
    for notify in deferred {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(notify));
        if let Err(payload) = result
            && first_panic.is_none()
        {
            first_panic = Some(payload);
        }
    }

    let duration_us = propagation_start.elapsed().as_micros() as u64;
    tracing::Span::current().record("duration_us", duration_us);
    debug!(
        duration_us,
        sources_changed, subscribers_notified, "batch flushed"
    );

    if let Some(payload) = first_panic {
        std::panic::resume_unwind(payload);
    }
}

/// RAII guard that begins a batch scope.
///
/// Nested `BatchScope`s are supported; only the outermost one flushes.
pub struct BatchScope {
    is_root: bool,
}

impl BatchScope {
    /// Begin a new batch scope, or nest inside the active one.
    #[must_use]
    pub fn new() -> Self {
        let is_root = BATCH_CTX.with(|ctx| {
            let mut guard = ctx.borrow_mut();
            match *guard {
                Some(ref mut batch) => {
                    batch.depth += 1;
                    false
                }
                None => {
                    *guard = Some(BatchContext {
                        depth: 1,
                        deferred: Vec::new(),
                        sources_changed: 0,
                    });
                    true
                }
            }
        });
        Self { is_root }
    }

    /// Number of deferred notifications queued in the current batch.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        BATCH_CTX.with(|ctx| ctx.borrow().as_ref().map_or(0, |b| b.deferred.len()))
    }
}

impl Default for BatchScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        let should_flush = BATCH_CTX.with(|ctx| {
            let mut guard = ctx.borrow_mut();
            if let Some(ref mut batch) = *guard {
                batch.depth -= 1;
                batch.depth == 0
            } else {
                false
            }
        });

        if should_flush {
            flush();
        }
    }
}

impl std::fmt::Debug for BatchScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScope")
            .field("is_root", &self.is_root)
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Observable;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn batch_defers_and_coalesces() {
        let obs = Observable::new(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        let _sub = obs.subscribe(move |v| seen_clone.borrow_mut().push(*v));

        {
            let _batch = BatchScope::new();
            obs.set(1);
            obs.set(2);
            obs.set(3);
            assert!(seen.borrow().is_empty());
        }
        assert_eq!(*seen.borrow(), vec![3]);
    }

    #[test]
    fn nested_batch_only_outermost_flushes() {
        let obs = Observable::new(0);
        let count = Rc::new(Cell::new(0u32));
        let count_clone = Rc::clone(&count);
        let _sub = obs.subscribe(move |_| count_clone.set(count_clone.get() + 1));

        {
            let _outer = BatchScope::new();
            obs.set(1);
            {
                let _inner = BatchScope::new();
                obs.set(2);
            }
            assert_eq!(count.get(), 0);
        }
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn is_batching_flag() {
        assert!(!is_batching());
        {
            let _batch = BatchScope::new();
            assert!(is_batching());
        }
        assert!(!is_batching());
    }

    #[test]
    fn defer_or_run_without_batch_runs_now() {
        let ran = Rc::new(Cell::new(false));
        let ran_clone = Rc::clone(&ran);
        assert!(!defer_or_run(move || ran_clone.set(true)));
        assert!(ran.get());
    }

    #[test]
    fn keyed_entries_keep_first_position_and_latest_callback() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let o1 = Rc::clone(&order);
        let o2 = Rc::clone(&order);
        let o3 = Rc::clone(&order);

        {
            let batch = BatchScope::new();
            defer_or_run_keyed(1, move || o1.borrow_mut().push("first-old"));
            defer_or_run_keyed(2, move || o2.borrow_mut().push("second"));
            defer_or_run_keyed(1, move || o3.borrow_mut().push("first-new"));
            assert_eq!(batch.pending_count(), 2);
        }

        assert_eq!(*order.borrow(), vec!["first-new", "second"]);
    }

    #[test]
    fn many_observables_flush_in_one_pass() {
        let rows: Vec<Observable<u8>> = (0..4).map(|_| Observable::new(0)).collect();
        let hits = Rc::new(Cell::new(0u32));
        let subs: Vec<_> = rows
            .iter()
            .map(|row| {
                let hits = Rc::clone(&hits);
                row.subscribe(move |_| hits.set(hits.get() + 1))
            })
            .collect();

        {
            let _batch = BatchScope::new();
            for row in &rows {
                row.set(1);
                row.set(2);
            }
            assert_eq!(hits.get(), 0);
        }
        assert_eq!(hits.get(), 4);
        drop(subs);
    }

    #[test]
    fn updates_made_during_flush_still_propagate() {
        let source = Observable::new(0);
        let doubled = source.map(|v| v * 2);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _sub = doubled.subscribe(move |v| sink.borrow_mut().push(*v));

        {
            let _batch = BatchScope::new();
            source.set(4);
        }
        assert_eq!(doubled.get(), 8);
        assert_eq!(*seen.borrow(), vec![8]);
        assert!(!is_batching());
    }

    #[test]
    fn scope_opened_by_a_callback_flushes_itself() {
        let a = Observable::new(0);
        let b = Observable::new(0);
        let hits = Rc::new(Cell::new(0u32));
        let b_in = b.clone();
        let _chain = a.subscribe(move |v| {
            let _inner = BatchScope::new();
            b_in.set(*v + 1);
        });
        let count = Rc::clone(&hits);
        let _sub = b.subscribe(move |_| count.set(count.get() + 1));

        {
            let _batch = BatchScope::new();
            a.set(1);
        }
        assert_eq!(b.get(), 2);
        assert_eq!(hits.get(), 1);
        assert!(!is_batching());
    }

    #[test]
    fn pending_count_zero_without_subscribers() {
        let obs = Observable::new(0);
        let batch = BatchScope::new();
        obs.set(42);
        assert_eq!(batch.pending_count(), 0);
        drop(batch);
    }
}

#![forbid(unsafe_code)]

//! Observable value wrapper with change notification and version tracking.
//!
//! # Design
//!
//! [`Observable<T>`] wraps a value of type `T` in shared, reference-counted
//! storage (`Rc<RefCell<..>>`). When the value changes (determined by
//! `PartialEq`), all live subscribers are notified in registration order.
//! Late subscribers read the cached latest value with [`Observable::get`].
//!
//! # Performance
//!
//! | Operation     | Complexity                 |
//! |---------------|----------------------------|
//! | `get()`       | O(1)                       |
//! | `set()`       | O(S) where S = subscribers |
//! | `subscribe()` | O(1) amortized             |
//!
//! # Failure Modes
//!
//! - **Subscriber leak**: If `Subscription` guards are stored indefinitely
//!   without being dropped, callbacks accumulate. Dead weak references are
//!   cleaned lazily during `notify()`.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::{debug, info_span};
use web_time::Instant;

use super::computed::Computed;

/// A subscriber callback stored as a strong `Rc` internally, handed out
/// as `Weak` to the observable.
pub(crate) type CallbackRc<T> = Rc<dyn Fn(&T)>;
pub(crate) type CallbackWeak<T> = Weak<dyn Fn(&T)>;

struct ObservableInner<T> {
    value: T,
    version: u64,
    /// Subscribers stored as weak references. Dead entries are pruned on notify.
    subscribers: Vec<CallbackWeak<T>>,
}

/// A shared, version-tracked value with change notification.
///
/// Cloning an `Observable` creates a new handle to the **same** inner state:
/// both handles see the same value and share subscribers.
///
/// # Invariants
///
/// 1. `version` increments by exactly 1 on each value-changing mutation.
/// 2. `set(v)` where `v == current` is a no-op.
/// 3. Subscribers are notified in registration order.
/// 4. Dead subscribers (dropped [`Subscription`] guards) are pruned lazily.
pub struct Observable<T> {
    inner: Rc<RefCell<ObservableInner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Observable")
            .field("value", &inner.value)
            .field("version", &inner.version)
            .field("subscriber_count", &inner.subscribers.len())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    /// Create a new observable with the given initial value.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ObservableInner {
                value,
                version: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Get a clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.borrow().value.clone()
    }

    /// Access the current value by reference without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow().value)
    }

    /// Set a new value. If it differs from the current value (by
    /// `PartialEq`), the version is incremented and live subscribers are
    /// notified. Safe to call from within subscriber callbacks.
    pub fn set(&self, value: T) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.value == value {
                return;
            }
            inner.value = value;
            inner.version += 1;
        }
        self.notify();
    }

    /// Modify the value in place. Subscribers are notified only if the
    /// result differs from the previous value.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let changed = {
            let mut inner = self.inner.borrow_mut();
            let old = inner.value.clone();
            f(&mut inner.value);
            if inner.value != old {
                inner.version += 1;
                true
            } else {
                false
            }
        };
        if changed {
            self.notify();
        }
    }

    /// Subscribe to value changes.
    ///
    /// Returns a [`Subscription`] guard. Dropping the guard unsubscribes
    /// the callback.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let strong: CallbackRc<T> = Rc::new(callback);
        self.inner
            .borrow_mut()
            .subscribers
            .push(Rc::downgrade(&strong));
        Subscription::new(Box::new(strong))
    }

    /// Derive a value that follows this observable through `f`.
    pub fn map<U>(&self, f: impl Fn(&T) -> U + 'static) -> Computed<U>
    where
        U: Clone + PartialEq + 'static,
    {
        Computed::new(self, f)
    }

    /// Current version number.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Number of registered subscribers, including dead ones not yet pruned.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }

    /// Whether both handles share the same state.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Notify live subscribers and prune dead ones.
    ///
    /// If a batch scope is active (see [`super::batch::BatchScope`]),
    /// notifications are deferred until the batch exits.
    fn notify(&self) {
        let callbacks: Vec<CallbackRc<T>> = {
            let mut inner = self.inner.borrow_mut();
            inner.subscribers.retain(|w| w.strong_count() > 0);
            inner
                .subscribers
                .iter()
                .filter_map(Weak::upgrade)
                .collect()
        };

        if callbacks.is_empty() {
            return;
        }

        let subscribers_notified = callbacks.len() as u64;

        if super::batch::is_batching() {
            super::batch::record_sources_changed(1);
            for cb in callbacks {
                let callback_key = Rc::as_ptr(&cb) as *const () as usize;
                let source = self.clone();
                super::batch::defer_or_run_keyed(callback_key, move || {
                    let latest = source.get();
                    cb(&latest);
                });
            }
            return;
        }

        let value = self.inner.borrow().value.clone();
        let propagation_start = Instant::now();
        let _span = info_span!(
            "reactive.notify",
            sources_changed = 1_u64,
            subscribers_notified,
            duration_us = tracing::field::Empty
        )
        .entered();

        for cb in &callbacks {
            cb(&value);
        }

        let duration_us = propagation_start.elapsed().as_micros() as u64;
        tracing::Span::current().record("duration_us", duration_us);
        debug!(duration_us, subscribers_notified, "observable propagated");
    }
}

/// RAII guard for a subscriber callback.
///
/// Dropping the `Subscription` makes the callback unreachable: the strong
/// `Rc` is dropped, so the `Weak` held by the source fails to upgrade on the
/// next notification.
pub struct Subscription {
    _guard: Box<dyn std::any::Any>,
}

impl Subscription {
    pub(crate) fn new(guard: Box<dyn std::any::Any>) -> Self {
        Self { _guard: guard }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

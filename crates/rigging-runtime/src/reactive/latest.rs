#![forbid(unsafe_code)]

//! Event stream that remembers its last emission.
//!
//! A [`LatestStream`] sits between [`EventStream`] and
//! [`Observable`](super::Observable): like a stream, every
//! [`set`](LatestStream::set) reaches every subscriber, repeated values
//! included; like an observable, the last value can be read back with
//! [`get`](LatestStream::get). Use it for raw input whose repetitions matter
//! to a downstream filter.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::event_stream::EventStream;
use super::observable::Subscription;

/// Multicast sink with a cached last value and no deduplication.
///
/// Cloning creates another handle to the **same** stream.
pub struct LatestStream<T> {
    latest: Rc<RefCell<T>>,
    stream: EventStream<T>,
}

impl<T> Clone for LatestStream<T> {
    fn clone(&self) -> Self {
        Self {
            latest: Rc::clone(&self.latest),
            stream: self.stream.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for LatestStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatestStream")
            .field("latest", &*self.latest.borrow())
            .field("stream", &self.stream)
            .finish()
    }
}

impl<T: Clone + 'static> LatestStream<T> {
    /// Stream whose last value starts as `initial`. Nothing is emitted.
    #[must_use]
    pub fn new(initial: T) -> Self {
        Self {
            latest: Rc::new(RefCell::new(initial)),
            stream: EventStream::new(),
        }
    }

    /// Last value set, or the initial value.
    #[must_use]
    pub fn get(&self) -> T {
        self.latest.borrow().clone()
    }

    /// Record `value` and deliver it to every subscriber, even when it
    /// equals the previous value.
    pub fn set(&self, value: T) {
        *self.latest.borrow_mut() = value.clone();
        self.stream.emit(value);
    }

    /// Subscribe to emissions. Dropping the guard unsubscribes.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        self.stream.subscribe(callback)
    }

    /// Whether both handles refer to the same stream.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.latest, &other.latest)
    }
}

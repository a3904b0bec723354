#![forbid(unsafe_code)]

//! Derived observable values.

use std::fmt;
use std::rc::Rc;

use super::observable::{Observable, Subscription};

/// A value derived from a source [`Observable`].
///
/// The derivation runs once at construction and again on every source
/// change; its result is published through an inner observable, so equal
/// consecutive results do not notify subscribers. The computed value keeps
/// its source subscription alive for as long as any handle exists.
pub struct Computed<T> {
    value: Observable<T>,
    _source: Rc<Subscription>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            _source: Rc::clone(&self._source),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

impl<T: Clone + PartialEq + 'static> Computed<T> {
    /// Derive a value from `source` through `f`.
    pub fn new<S>(source: &Observable<S>, f: impl Fn(&S) -> T + 'static) -> Self
    where
        S: Clone + PartialEq + 'static,
    {
        let value = Observable::new(source.with(|s| f(s)));
        let target = value.clone();
        let subscription = source.subscribe(move |s| target.set(f(s)));
        Self {
            value,
            _source: Rc::new(subscription),
        }
    }

    /// Current derived value.
    #[must_use]
    pub fn get(&self) -> T {
        self.value.get()
    }

    /// Access the derived value by reference.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.value.with(f)
    }

    /// Subscribe to changes of the derived value.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        self.value.subscribe(callback)
    }

    /// Number of times the derived value changed.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.value.version()
    }

    /// Whether both handles share the same derived state.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.value.ptr_eq(&other.value)
    }
}

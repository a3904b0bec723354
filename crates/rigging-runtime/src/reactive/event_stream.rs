#![forbid(unsafe_code)]

//! Multicast event stream without a current value.
//!
//! Unlike [`Observable`](super::Observable), an [`EventStream`] does not
//! cache the last value and does not skip repeated values: every
//! [`emit`](EventStream::emit) reaches every live subscriber. Widgets push
//! raw input (hover, focus, mouse moves) into streams; derived state lives in
//! observables.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::observable::{CallbackRc, CallbackWeak, Subscription};

/// Shared multicast sink.
///
/// Cloning creates another handle to the **same** subscriber list.
pub struct EventStream<T> {
    subscribers: Rc<RefCell<Vec<CallbackWeak<T>>>>,
}

impl<T> Clone for EventStream<T> {
    fn clone(&self) -> Self {
        Self {
            subscribers: Rc::clone(&self.subscribers),
        }
    }
}

impl<T> fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("subscriber_count", &self.subscribers.borrow().len())
            .finish()
    }
}

impl<T: 'static> Default for EventStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> EventStream<T> {
    /// Create a stream with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Deliver `value` to every live subscriber in registration order.
    ///
    /// Subscribers added while an emission is in progress see the next
    /// emission, not this one.
    pub fn emit(&self, value: T) {
        let callbacks: Vec<CallbackRc<T>> = {
            let mut subscribers = self.subscribers.borrow_mut();
            subscribers.retain(|w| w.strong_count() > 0);
            subscribers.iter().filter_map(Weak::upgrade).collect()
        };
        for cb in &callbacks {
            cb(&value);
        }
    }

    /// Subscribe to emissions. Dropping the guard unsubscribes.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let strong: CallbackRc<T> = Rc::new(callback);
        self.subscribers.borrow_mut().push(Rc::downgrade(&strong));
        Subscription::new(Box::new(strong))
    }

    /// Number of registered subscribers, including dead ones not yet pruned.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    /// Whether both handles share the same subscriber list.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.subscribers, &other.subscribers)
    }
}

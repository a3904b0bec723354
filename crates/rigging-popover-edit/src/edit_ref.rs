#![forbid(unsafe_code)]

//! Edit sessions.
//!
//! An [`EditRef`] is opened when a cell's edit popover is created and
//! destroyed with it. While open it is the dispatcher's active edit ref;
//! a newer session replaces it, and destroying a replaced session leaves
//! the newer one in place.
//!
//! A session does not keep its dispatcher alive. Once the dispatcher is
//! dropped, operations that reach it do nothing.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use rigging_runtime::{EventStream, Observable, Subscription};
use tracing::{debug, trace};

use crate::dispatcher::{ActiveEdit, ActiveEditRef, EditEventDispatcher, WeakDispatcher};

/// Form state edited by a session.
pub trait EditForm<V> {
    /// Current value.
    fn value(&self) -> V;

    /// Replace the value, discarding edits.
    fn reset(&self, value: V);

    /// Whether the value passes validation.
    fn is_valid(&self) -> bool;
}

type Validator<V> = Rc<dyn Fn(&V) -> bool>;

/// In-memory form: an observable value and an optional validator.
pub struct FormModel<V> {
    value: Observable<V>,
    validator: Option<Validator<V>>,
}

impl<V> Clone for FormModel<V> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            validator: self.validator.clone(),
        }
    }
}

impl<V: fmt::Debug + Clone + PartialEq + 'static> fmt::Debug for FormModel<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormModel")
            .field("value", &self.value.get())
            .field("validated", &self.validator.is_some())
            .finish()
    }
}

impl<V: Clone + PartialEq + 'static> FormModel<V> {
    /// Form holding `value`, always valid.
    #[must_use]
    pub fn new(value: V) -> Self {
        Self {
            value: Observable::new(value),
            validator: None,
        }
    }

    /// Validate values with `validator`.
    #[must_use]
    pub fn with_validator(mut self, validator: impl Fn(&V) -> bool + 'static) -> Self {
        self.validator = Some(Rc::new(validator));
        self
    }

    /// Observable value, for binding inputs.
    #[must_use]
    pub fn observable(&self) -> &Observable<V> {
        &self.value
    }

    /// Set the value as the user would.
    pub fn set(&self, value: V) {
        self.value.set(value);
    }
}

impl<V: Clone + PartialEq + 'static> EditForm<V> for FormModel<V> {
    fn value(&self) -> V {
        self.value.get()
    }

    fn reset(&self, value: V) {
        self.value.set(value);
    }

    fn is_valid(&self) -> bool {
        self.validator
            .as_ref()
            .is_none_or(|validator| self.value.with(|value| validator(value)))
    }
}

struct EditRefInner<V> {
    form: Rc<dyn EditForm<V>>,
    dispatcher: WeakDispatcher,
    revert_value: RefCell<Option<V>>,
    blurred: EventStream<()>,
    finalized: EventStream<V>,
    destroyed: Cell<bool>,
    pending_init: RefCell<Option<Subscription>>,
}

impl<V: Clone + 'static> EditRefInner<V> {
    fn update_revert_value(&self) {
        *self.revert_value.borrow_mut() = Some(self.form.value());
    }
}

impl<V: Clone + 'static> ActiveEdit for EditRefInner<V> {
    fn blur(&self) {
        self.blurred.emit(());
    }

    fn is_valid(&self) -> bool {
        self.form.is_valid()
    }
}

/// Handle to one edit session.
///
/// Cloning creates another handle to the **same** session.
pub struct EditRef<V> {
    inner: Rc<EditRefInner<V>>,
}

impl<V> Clone for EditRef<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for EditRef<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditRef")
            .field("destroyed", &self.inner.destroyed.get())
            .finish_non_exhaustive()
    }
}

impl<V: Clone + 'static> EditRef<V> {
    /// Open a session over `form` and make it the dispatcher's active edit
    /// ref.
    pub fn open(form: Rc<dyn EditForm<V>>, dispatcher: &EditEventDispatcher) -> Self {
        let edit = Self {
            inner: Rc::new(EditRefInner {
                form,
                dispatcher: dispatcher.downgrade(),
                revert_value: RefCell::new(None),
                blurred: EventStream::new(),
                finalized: EventStream::new(),
                destroyed: Cell::new(false),
                pending_init: RefCell::new(None),
            }),
        };
        dispatcher.set_active_edit_ref(edit.as_active());
        debug!("edit session opened");
        edit
    }

    fn as_active(&self) -> ActiveEditRef {
        Rc::clone(&self.inner) as ActiveEditRef
    }

    fn dispatcher(&self) -> Option<EditEventDispatcher> {
        self.inner.dispatcher.upgrade()
    }

    /// Snapshot the revert value once the dispatcher's zone next becomes
    /// stable, then restore `previous` if given.
    pub fn init(&self, previous: Option<V>) {
        let Some(dispatcher) = self.dispatcher() else {
            trace!("edit session init after its dispatcher was dropped");
            return;
        };
        let weak = Rc::downgrade(&self.inner);
        let subscription = dispatcher
            .zone()
            .on_stable()
            .subscribe(move |_| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let Some(_once) = inner.pending_init.borrow_mut().take() else {
                    return;
                };
                inner.update_revert_value();
                if let Some(previous) = &previous {
                    inner.form.reset(previous.clone());
                }
                trace!(restored = previous.is_some(), "edit session initialized");
            });
        *self.inner.pending_init.borrow_mut() = Some(subscription);
    }

    /// Whether `init` is still waiting for the zone.
    #[must_use]
    pub fn is_initializing(&self) -> bool {
        self.inner.pending_init.borrow().is_some()
    }

    /// Whether the form validates.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.inner.form.is_valid()
    }

    /// Value the form reverts to.
    #[must_use]
    pub fn revert_value(&self) -> Option<V> {
        self.inner.revert_value.borrow().clone()
    }

    /// Take the form's current value as the revert value.
    pub fn update_revert_value(&self) {
        self.inner.update_revert_value();
    }

    /// End editing: the dispatcher stops editing any cell.
    pub fn close(&self) {
        if let Some(dispatcher) = self.dispatcher() {
            dispatcher.editing().set(None);
        }
    }

    /// Announce that focus left the session.
    pub fn blur(&self) {
        self.inner.blurred.emit(());
    }

    /// Reset the form to `value`, or to the revert value. Does nothing
    /// before a revert value exists.
    pub fn reset(&self, value: Option<V>) {
        if let Some(value) = value.or_else(|| self.revert_value()) {
            self.inner.form.reset(value);
        }
    }

    /// Emitted on [`blur`](Self::blur).
    #[must_use]
    pub fn blurred(&self) -> EventStream<()> {
        self.inner.blurred.clone()
    }

    /// Emitted once with the form's final value on
    /// [`destroy`](Self::destroy).
    #[must_use]
    pub fn finalized(&self) -> EventStream<V> {
        self.inner.finalized.clone()
    }

    /// Whether this session is the dispatcher's active edit ref.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.dispatcher()
            .and_then(|dispatcher| dispatcher.active_edit_ref())
            .is_some_and(|active| std::ptr::addr_eq(Rc::as_ptr(&active), Rc::as_ptr(&self.inner)))
    }

    /// End the session. Idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }
        self.inner.pending_init.borrow_mut().take();
        if let Some(dispatcher) = self.dispatcher() {
            dispatcher.unset_active_edit_ref(&self.as_active());
        }
        let value = self.inner.form.value();
        debug!("edit session finalized");
        self.inner.finalized.emit(value);
    }

    /// Whether [`destroy`](Self::destroy) has run.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }
}

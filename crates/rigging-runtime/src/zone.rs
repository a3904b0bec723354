#![forbid(unsafe_code)]

//! Execution zones: task accounting over a shared [`EventLoop`].
//!
//! # Design
//!
//! A [`Zone`] is a named execution context forked from a parent. Work
//! scheduled through a zone (timers, microtasks, external pending work) is
//! counted against it while pending, and its callbacks run inside it.
//!
//! Each zone keeps two sets of counters:
//!
//! - **own** counters track tasks scheduled directly in the zone. A 0↔1
//!   transition of an own counter raises a has-task notification, delivered
//!   to the zone's hook and then to every ancestor's hook with the same
//!   `target`. A hook can tell its own zone's changes apart from a child's by
//!   comparing `target` with the zone it was invoked for.
//! - **subtree** counters include descendants. A zone is *stable* when its
//!   subtree has nothing pending; [`Zone::on_stable`] fires whenever it
//!   becomes stable outside a [`Zone::run`] call, and when the outermost
//!   `run` exits with the zone stable.
//!
//! Proxy zones (forked with [`ZoneSpec::proxy`]) expose a replaceable hook
//! slot, the interception point used by task-state observers. Hooks of other
//! zones are fixed when the zone is forked.
//!
//! # Invariants
//!
//! 1. Counters never go negative.
//! 2. A timer's macro task is released after its callback has run, so work
//!    re-armed by the callback keeps the zone unstable without a transient
//!    stable notification.
//! 3. No `RefCell` borrow is held while hooks or callbacks run.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::{Result, RuntimeError};
use crate::event_loop::{EventLoop, TimerId};
use crate::reactive::EventStream;
use crate::wait::WaitUntil;

/// Callback invoked on has-task transitions: `(current, state)`.
pub type HasTaskHook = Rc<dyn Fn(&Zone, &HasTaskState)>;

/// Kind of counted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Timers and external pending work.
    Macro,
    /// Microtasks.
    Micro,
}

/// Pending-task counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskCounts {
    /// Pending timers and external work.
    pub macro_tasks: usize,
    /// Pending microtasks.
    pub micro_tasks: usize,
}

impl TaskCounts {
    /// Whether nothing is pending.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.macro_tasks == 0 && self.micro_tasks == 0
    }

    fn get(&self, kind: TaskKind) -> usize {
        match kind {
            TaskKind::Macro => self.macro_tasks,
            TaskKind::Micro => self.micro_tasks,
        }
    }

    fn adjust(&mut self, kind: TaskKind, delta: isize) -> (usize, usize) {
        let slot = match kind {
            TaskKind::Macro => &mut self.macro_tasks,
            TaskKind::Micro => &mut self.micro_tasks,
        };
        let before = *slot;
        *slot = before.saturating_add_signed(delta);
        (before, *slot)
    }
}

/// Snapshot delivered to has-task hooks.
#[derive(Debug, Clone)]
pub struct HasTaskState {
    /// Whether the target zone has pending macro tasks.
    pub macro_task: bool,
    /// Whether the target zone has pending micro tasks.
    pub micro_task: bool,
    /// Which counter transitioned.
    pub change: TaskKind,
    /// Zone whose own counters changed.
    pub target: Zone,
}

/// Parameters for [`Zone::fork`].
pub struct ZoneSpec {
    name: String,
    proxy: bool,
    on_has_task: Option<HasTaskHook>,
}

impl ZoneSpec {
    /// Plain zone named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            proxy: false,
            on_has_task: None,
        }
    }

    /// Make the zone a proxy with a replaceable hook slot.
    #[must_use]
    pub fn proxy(mut self) -> Self {
        self.proxy = true;
        self
    }

    /// Install a has-task hook.
    #[must_use]
    pub fn on_has_task(mut self, hook: impl Fn(&Zone, &HasTaskState) + 'static) -> Self {
        self.on_has_task = Some(Rc::new(hook));
        self
    }
}

struct ZoneState {
    own: TaskCounts,
    subtree: TaskCounts,
    hook: Option<HasTaskHook>,
    run_depth: usize,
    extensions: Vec<(TypeId, Rc<dyn Any>)>,
}

struct ZoneInner {
    name: String,
    parent: Option<Zone>,
    event_loop: EventLoop,
    proxy: bool,
    on_stable: EventStream<()>,
    state: RefCell<ZoneState>,
}

/// Shared handle to an execution zone.
#[derive(Clone)]
pub struct Zone {
    inner: Rc<ZoneInner>,
}

impl fmt::Debug for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Zone")
            .field("name", &self.inner.name)
            .field("proxy", &self.inner.proxy)
            .field("own", &state.own)
            .field("subtree", &state.subtree)
            .finish()
    }
}

thread_local! {
    static CURRENT: RefCell<Vec<Zone>> = const { RefCell::new(Vec::new()) };
}

struct RunGuard<'a> {
    zone: &'a Zone,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        CURRENT.with(|stack| {
            stack.borrow_mut().pop();
        });
        self.zone.inner.state.borrow_mut().run_depth -= 1;
    }
}

impl Zone {
    /// Root zone over `event_loop`.
    #[must_use]
    pub fn root(event_loop: &EventLoop) -> Self {
        Self::build(
            ZoneSpec::new("<root>"),
            None,
            event_loop.clone(),
        )
    }

    /// Fork a child zone.
    #[must_use]
    pub fn fork(&self, spec: ZoneSpec) -> Self {
        let child = Self::build(spec, Some(self.clone()), self.inner.event_loop.clone());
        debug!(parent = %self.inner.name, child = %child.inner.name, proxy = child.inner.proxy, "zone forked");
        child
    }

    fn build(spec: ZoneSpec, parent: Option<Zone>, event_loop: EventLoop) -> Self {
        Self {
            inner: Rc::new(ZoneInner {
                name: spec.name,
                parent,
                event_loop,
                proxy: spec.proxy,
                on_stable: EventStream::new(),
                state: RefCell::new(ZoneState {
                    own: TaskCounts::default(),
                    subtree: TaskCounts::default(),
                    hook: spec.on_has_task,
                    run_depth: 0,
                    extensions: Vec::new(),
                }),
            }),
        }
    }

    /// Innermost zone entered with [`run`](Self::run) on this thread.
    #[must_use]
    pub fn current() -> Option<Zone> {
        CURRENT.with(|stack| stack.borrow().last().cloned())
    }

    /// Zone name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Parent zone.
    #[must_use]
    pub fn parent(&self) -> Option<&Zone> {
        self.inner.parent.as_ref()
    }

    /// Event loop this zone schedules onto.
    #[must_use]
    pub fn event_loop(&self) -> &EventLoop {
        &self.inner.event_loop
    }

    /// Whether this zone has a replaceable hook slot.
    #[must_use]
    pub fn is_proxy(&self) -> bool {
        self.inner.proxy
    }

    /// Whether both handles refer to the same zone.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Nearest proxy zone, starting with this one.
    #[must_use]
    pub fn nearest_proxy(&self) -> Option<Zone> {
        let mut cursor = Some(self);
        while let Some(zone) = cursor {
            if zone.is_proxy() {
                return Some(zone.clone());
            }
            cursor = zone.parent();
        }
        None
    }

    /// Currently installed has-task hook.
    #[must_use]
    pub fn has_task_hook(&self) -> Option<HasTaskHook> {
        self.inner.state.borrow().hook.clone()
    }

    /// Replace the has-task hook of a proxy zone, returning the previous one.
    pub fn replace_has_task_hook(&self, hook: Option<HasTaskHook>) -> Result<Option<HasTaskHook>> {
        if !self.inner.proxy {
            return Err(RuntimeError::NotAProxyZone {
                zone: self.inner.name.clone(),
            });
        }
        Ok(std::mem::replace(&mut self.inner.state.borrow_mut().hook, hook))
    }

    /// Typed extension value attached to this zone.
    #[must_use]
    pub fn extension<T: 'static>(&self) -> Option<Rc<T>> {
        let state = self.inner.state.borrow();
        let (_, value) = state
            .extensions
            .iter()
            .find(|(id, _)| *id == TypeId::of::<T>())?;
        Rc::clone(value).downcast::<T>().ok()
    }

    /// Attach a typed extension value, replacing any previous one of the
    /// same type.
    pub fn set_extension<T: 'static>(&self, value: Rc<T>) {
        let mut state = self.inner.state.borrow_mut();
        let id = TypeId::of::<T>();
        state.extensions.retain(|(existing, _)| *existing != id);
        state.extensions.push((id, value));
    }

    /// Tasks scheduled directly in this zone.
    #[must_use]
    pub fn task_counts(&self) -> TaskCounts {
        self.inner.state.borrow().own
    }

    /// Tasks scheduled in this zone or any descendant.
    #[must_use]
    pub fn subtree_task_counts(&self) -> TaskCounts {
        self.inner.state.borrow().subtree
    }

    /// Whether neither this zone nor its descendants have pending work.
    #[must_use]
    pub fn is_stable(&self) -> bool {
        self.subtree_task_counts().is_idle()
    }

    /// Stream notified when the zone becomes stable.
    #[must_use]
    pub fn on_stable(&self) -> EventStream<()> {
        self.inner.on_stable.clone()
    }

    /// Run `f` inside this zone.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        CURRENT.with(|stack| stack.borrow_mut().push(self.clone()));
        self.inner.state.borrow_mut().run_depth += 1;
        let result = {
            let _guard = RunGuard { zone: self };
            f()
        };
        let outermost = self.inner.state.borrow().run_depth == 0;
        if outermost && self.is_stable() {
            self.inner.on_stable.emit(());
        }
        result
    }

    /// Schedule `f` to run in this zone after `delay`.
    pub fn set_timeout(&self, delay: Duration, f: impl FnOnce() + 'static) -> TimerId {
        self.adjust(TaskKind::Macro, 1);
        let zone = self.clone();
        self.inner.event_loop.schedule_timer(delay, move || {
            zone.run(f);
            zone.adjust(TaskKind::Macro, -1);
        })
    }

    /// Cancel a timer scheduled with [`set_timeout`](Self::set_timeout).
    /// Returns `false` if it already ran or was cancelled.
    pub fn clear_timeout(&self, id: TimerId) -> bool {
        let cancelled = self.inner.event_loop.cancel_timer(id);
        if cancelled {
            self.adjust(TaskKind::Macro, -1);
        }
        cancelled
    }

    /// Queue `f` as a microtask in this zone.
    pub fn schedule_microtask(&self, f: impl FnOnce() + 'static) {
        self.adjust(TaskKind::Micro, 1);
        let zone = self.clone();
        self.inner.event_loop.schedule_microtask(move || {
            zone.run(f);
            zone.adjust(TaskKind::Micro, -1);
        });
    }

    /// Count outstanding external work (for example a pending resource
    /// load) as a macro task until the returned handle completes or drops.
    pub fn begin_pending_work(&self, label: impl Into<String>) -> PendingWork {
        let label = label.into();
        trace!(zone = %self.inner.name, %label, "pending work started");
        self.adjust(TaskKind::Macro, 1);
        PendingWork {
            zone: Some(self.clone()),
            label,
        }
    }

    /// Future resolving once the zone is stable.
    pub fn when_stable(&self) -> WaitUntil<impl FnMut() -> bool + Unpin + use<>> {
        let zone = self.clone();
        self.inner.event_loop.wait_until(move || zone.is_stable())
    }

    fn adjust(&self, kind: TaskKind, delta: isize) {
        let own_transition = {
            let mut state = self.inner.state.borrow_mut();
            let (before, after) = state.own.adjust(kind, delta);
            ((before == 0) != (after == 0)).then(|| HasTaskState {
                macro_task: state.own.macro_tasks > 0,
                micro_task: state.own.micro_tasks > 0,
                change: kind,
                target: self.clone(),
            })
        };

        let mut became_stable = Vec::new();
        let mut cursor = Some(self);
        while let Some(zone) = cursor {
            let mut state = zone.inner.state.borrow_mut();
            let was_idle = state.subtree.is_idle();
            state.subtree.adjust(kind, delta);
            if !was_idle && state.subtree.is_idle() && state.run_depth == 0 {
                became_stable.push(zone.clone());
            }
            drop(state);
            cursor = zone.parent();
        }

        if let Some(has_task) = own_transition {
            trace!(
                zone = %self.inner.name,
                ?kind,
                pending = self.inner.state.borrow().own.get(kind),
                "has-task transition"
            );
            let mut cursor = Some(self);
            while let Some(zone) = cursor {
                if let Some(hook) = zone.has_task_hook() {
                    hook(zone, &has_task);
                }
                cursor = zone.parent();
            }
        }

        for zone in became_stable {
            trace!(zone = %zone.inner.name, "zone stable");
            zone.inner.on_stable.emit(());
        }
    }
}

/// Handle for external work counted as a pending macro task.
///
/// Completing or dropping the handle releases the task and wakes pending
/// waits on the event loop.
#[must_use = "dropping the handle completes the work immediately"]
pub struct PendingWork {
    zone: Option<Zone>,
    label: String,
}

impl PendingWork {
    /// Mark the work as finished.
    pub fn complete(mut self) {
        self.release();
    }

    /// Label given at creation.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    fn release(&mut self) {
        if let Some(zone) = self.zone.take() {
            trace!(zone = %zone.inner.name, label = %self.label, "pending work finished");
            zone.adjust(TaskKind::Macro, -1);
            zone.event_loop().wake_all();
        }
    }
}

impl Drop for PendingWork {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for PendingWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingWork")
            .field("label", &self.label)
            .field("active", &self.zone.is_some())
            .finish()
    }
}

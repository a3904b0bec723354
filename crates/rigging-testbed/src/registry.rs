#![forbid(unsafe_code)]

//! Active-fixture registry and the batch stabilization handler.
//!
//! # Design
//!
//! A [`FixtureRegistry`] tracks every live fixture that shares one
//! [`StabilizationContext`]. The batch handler is installed on the context
//! when the first fixture registers and removed when the last one leaves,
//! so a context with no fixtures never calls back into this crate.
//!
//! When a batch asks to settle now, the handler runs change detection on
//! every registered fixture and waits for all of them concurrently before
//! the batch continues.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use async_trait::async_trait;
use futures::future::join_all;
use rigging_harness::{Result, StabilizationContext, StabilizationHandler};
use tracing::{Instrument, debug, info_span};
use web_time::Instant;

use crate::fixture::FixtureCore;

struct RegistryInner {
    context: StabilizationContext,
    fixtures: RefCell<Vec<Rc<FixtureCore>>>,
    next_id: Cell<u64>,
}

/// Set of fixtures participating in batched stabilization.
///
/// Cloning creates another handle to the **same** registry.
#[derive(Clone)]
pub struct FixtureRegistry {
    inner: Rc<RegistryInner>,
}

impl fmt::Debug for FixtureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixtureRegistry")
            .field("fixtures", &self.len())
            .field("context", &self.inner.context)
            .finish()
    }
}

impl Default for FixtureRegistry {
    /// Registry over a fresh, private stabilization context.
    fn default() -> Self {
        Self::new(StabilizationContext::new())
    }
}

thread_local! {
    static SHARED: FixtureRegistry = FixtureRegistry::new(StabilizationContext::shared());
}

impl FixtureRegistry {
    /// Registry coordinating through `context`.
    #[must_use]
    pub fn new(context: StabilizationContext) -> Self {
        Self {
            inner: Rc::new(RegistryInner {
                context,
                fixtures: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
            }),
        }
    }

    /// Registry over [`StabilizationContext::shared`] for this thread.
    #[must_use]
    pub fn shared() -> Self {
        SHARED.with(Clone::clone)
    }

    /// Stabilization context the registry coordinates through.
    #[must_use]
    pub fn context(&self) -> &StabilizationContext {
        &self.inner.context
    }

    /// Number of live fixtures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.fixtures.borrow().len()
    }

    /// Whether no fixture is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether both handles refer to the same registry.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn next_fixture_id(&self) -> u64 {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        id
    }

    pub(crate) fn register(&self, fixture: Rc<FixtureCore>) {
        let first = {
            let mut fixtures = self.inner.fixtures.borrow_mut();
            fixtures.push(fixture);
            fixtures.len() == 1
        };
        if first {
            debug!("first fixture registered; installing batch handler");
            self.inner.context.install_handler(Rc::new(BatchHandler {
                registry: Rc::downgrade(&self.inner),
            }));
        }
    }

    pub(crate) fn unregister(&self, id: u64) {
        let emptied = {
            let mut fixtures = self.inner.fixtures.borrow_mut();
            let before = fixtures.len();
            fixtures.retain(|fixture| fixture.id() != id);
            before > 0 && fixtures.is_empty()
        };
        if emptied {
            debug!("last fixture unregistered; removing batch handler");
            self.inner.context.uninstall_handler();
        }
    }
}

struct BatchHandler {
    registry: Weak<RegistryInner>,
}

#[async_trait(?Send)]
impl StabilizationHandler for BatchHandler {
    async fn status_changed(&self, is_disabled: bool, settle_now: bool) -> Result<()> {
        debug!(is_disabled, settle_now, "auto stabilization status changed");
        if !settle_now {
            return Ok(());
        }
        let Some(registry) = self.registry.upgrade() else {
            return Ok(());
        };
        let fixtures: Vec<Rc<FixtureCore>> = registry.fixtures.borrow().clone();
        let span = info_span!("testbed.settle_all", fixtures = fixtures.len());
        let start = Instant::now();
        let results = join_all(fixtures.iter().map(|fixture| fixture.settle()))
            .instrument(span)
            .await;
        debug!(
            fixtures = fixtures.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "all fixtures settled"
        );
        results.into_iter().collect()
    }
}

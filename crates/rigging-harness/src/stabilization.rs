#![forbid(unsafe_code)]

//! Auto-stabilization control shared by every environment in a test.
//!
//! # Design
//!
//! Environments normally stabilize their fixture before and after every
//! operation. A caller that wants to drive several elements without
//! intermediate settling opens a batch through
//! [`StabilizationContext::manual_stabilization`] or
//! [`StabilizationContext::parallel`]; while the batch runs,
//! [`StabilizationContext::is_auto_disabled`] reports `true` and environments
//! skip their own stabilization.
//!
//! Settling work is delegated to an installed [`StabilizationHandler`]. The
//! testbed installs one when its first fixture registers and removes it when
//! the last one is destroyed; the handler flushes **every** active fixture
//! when a batch asks for it. Without a handler, status changes are no-ops.
//!
//! # Invariants
//!
//! 1. Nested batches run inline: only the outermost batch toggles the flag.
//! 2. The flag is restored when the batch body fails.
//! 3. At most one handler is installed at a time.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use async_trait::async_trait;
use futures::future::{LocalBoxFuture, join_all};
use tracing::{debug, trace};

use crate::error::Result;

/// Receiver of auto-stabilization status changes.
#[async_trait(?Send)]
pub trait StabilizationHandler {
    /// Auto-stabilization was turned on or off. When `settle_now` is set the
    /// returned future must not resolve before every participating fixture
    /// has settled.
    async fn status_changed(&self, is_disabled: bool, settle_now: bool) -> Result<()>;
}

#[derive(Default)]
struct ContextState {
    disabled: bool,
    handler: Option<Rc<dyn StabilizationHandler>>,
}

/// Shared switch for automatic stabilization.
///
/// Cloning creates another handle to the **same** state.
#[derive(Clone, Default)]
pub struct StabilizationContext {
    state: Rc<RefCell<ContextState>>,
}

impl fmt::Debug for StabilizationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("StabilizationContext")
            .field("disabled", &state.disabled)
            .field("handler_installed", &state.handler.is_some())
            .finish()
    }
}

thread_local! {
    static SHARED: StabilizationContext = StabilizationContext::default();
}

impl StabilizationContext {
    /// Fresh context, independent of the shared one.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The context shared by all fixtures of the current test thread.
    #[must_use]
    pub fn shared() -> Self {
        SHARED.with(Clone::clone)
    }

    /// Whether both handles refer to the same context.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    /// Whether a batch has suspended automatic stabilization.
    #[must_use]
    pub fn is_auto_disabled(&self) -> bool {
        self.state.borrow().disabled
    }

    /// Whether a handler is installed.
    #[must_use]
    pub fn has_handler(&self) -> bool {
        self.state.borrow().handler.is_some()
    }

    /// Install the status handler, replacing any previous one.
    pub fn install_handler(&self, handler: Rc<dyn StabilizationHandler>) {
        debug!("stabilization handler installed");
        self.state.borrow_mut().handler = Some(handler);
    }

    /// Remove the status handler.
    pub fn uninstall_handler(&self) {
        if self.state.borrow_mut().handler.take().is_some() {
            debug!("stabilization handler removed");
        }
    }

    /// Run `body` with automatic stabilization suspended. Fixtures are not
    /// settled before or after; the caller stabilizes explicitly.
    pub async fn manual_stabilization<T, F, Fut>(&self, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.batch(body, false).await
    }

    /// Run `operations` concurrently with automatic stabilization
    /// suspended, settling every fixture once before and once after.
    pub async fn parallel<'a, T: 'a>(
        &self,
        operations: Vec<LocalBoxFuture<'a, Result<T>>>,
    ) -> Result<Vec<T>> {
        self.batch(
            || async move {
                join_all(operations)
                    .await
                    .into_iter()
                    .collect::<Result<Vec<T>>>()
            },
            true,
        )
        .await
    }

    async fn batch<T, F, Fut>(&self, body: F, settle: bool) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.is_auto_disabled() {
            return body().await;
        }
        trace!(settle, "stabilization batch started");
        self.set_status(true, settle).await?;
        let result = body().await;
        let restored = self.set_status(false, settle).await;
        trace!(settle, ok = result.is_ok(), "stabilization batch finished");
        let value = result?;
        restored?;
        Ok(value)
    }

    async fn set_status(&self, disabled: bool, settle_now: bool) -> Result<()> {
        let handler = {
            let mut state = self.state.borrow_mut();
            state.disabled = disabled;
            state.handler.clone()
        };
        match handler {
            Some(handler) => handler.status_changed(disabled, settle_now).await,
            None => Ok(()),
        }
    }
}

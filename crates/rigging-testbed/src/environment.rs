#![forbid(unsafe_code)]

//! Harness environment for testbed fixtures.
//!
//! # Design
//!
//! [`TestbedHarnessEnvironment`] is the [`EnvironmentBackend`] for one
//! fixture, rooted at one node. Element-scoped sub-environments share the
//! fixture, the options and the task-state stream; only the root differs.
//!
//! Every query and every element operation goes through
//! [`force_stabilize`](EnvironmentBackend::force_stabilize), which:
//!
//! 1. does nothing while a batch has suspended auto-stabilization,
//! 2. fails with [`HarnessError::FixtureDestroyed`] once the fixture is gone,
//! 3. otherwise runs change detection, flushes virtual timers when the
//!    event loop is on fake time, and waits for the application zone.
//!
//! Fake time is checked on every call, not cached.

use std::fmt;
use std::rc::Rc;

use async_trait::async_trait;
use futures::FutureExt;
use rigging_core::{Document, NodeId};
use rigging_harness::{
    ComponentHarness, EnvironmentBackend, HarnessEnvironment, HarnessError, HarnessLoader, Result,
    ScopedElement, TestElementRef,
};
use tracing::{debug, trace};

use crate::fixture::{Component, ComponentFixture, FixtureCore};
use crate::task_state::{TaskStateInterceptor, TaskStateStream};
use crate::unit_test_element::{StabilizeFn, UnitTestElement};

/// Selector query used to find candidate elements under a root.
pub type QueryFn = Rc<dyn Fn(&str, &Document, NodeId) -> rigging_core::Result<Vec<NodeId>>>;

/// Options shared by an environment and its sub-environments.
#[derive(Clone)]
pub struct EnvironmentOptions {
    /// Selector query. Defaults to [`Document::query_selector_all`] on the
    /// root.
    pub query_fn: QueryFn,
}

impl Default for EnvironmentOptions {
    fn default() -> Self {
        Self {
            query_fn: Rc::new(|selector, document, root| {
                document.query_selector_all(root, selector)
            }),
        }
    }
}

impl fmt::Debug for EnvironmentOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentOptions").finish_non_exhaustive()
    }
}

impl EnvironmentOptions {
    /// Options with a custom selector query.
    #[must_use]
    pub fn with_query_fn(
        query_fn: impl Fn(&str, &Document, NodeId) -> rigging_core::Result<Vec<NodeId>> + 'static,
    ) -> Self {
        Self {
            query_fn: Rc::new(query_fn),
        }
    }
}

const ENVIRONMENT_NAME: &str = "TestbedHarnessEnvironment";

/// Environment backend bound to one fixture.
#[derive(Clone)]
pub struct TestbedHarnessEnvironment {
    fixture: Rc<FixtureCore>,
    root: NodeId,
    options: EnvironmentOptions,
    task_state: TaskStateStream,
}

impl fmt::Debug for TestbedHarnessEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestbedHarnessEnvironment")
            .field("fixture", &self.fixture)
            .field("root", &self.root)
            .finish()
    }
}

impl TestbedHarnessEnvironment {
    fn create<C: Component>(
        fixture: &ComponentFixture<C>,
        root: NodeId,
        options: Option<EnvironmentOptions>,
    ) -> Result<Self> {
        let task_state = TaskStateInterceptor::setup(Some(fixture.proxy_zone()))?;
        Ok(Self {
            fixture: Rc::clone(fixture.core()),
            root,
            options: options.unwrap_or_default(),
            task_state,
        })
    }

    /// Loader rooted at the fixture's host element.
    ///
    /// # Errors
    ///
    /// Fails when the fixture's zone chain cannot be intercepted.
    pub fn loader<C: Component>(
        fixture: &ComponentFixture<C>,
        options: Option<EnvironmentOptions>,
    ) -> Result<HarnessLoader> {
        let environment = Self::create(fixture, fixture.host(), options)?;
        Ok(HarnessEnvironment::new(Rc::new(environment)))
    }

    /// Loader rooted at the document body, for content rendered outside
    /// the fixture (overlays, popovers).
    pub fn document_root_loader<C: Component>(
        fixture: &ComponentFixture<C>,
        options: Option<EnvironmentOptions>,
    ) -> Result<HarnessLoader> {
        let body = fixture.document().body();
        let environment = Self::create(fixture, body, options)?;
        Ok(HarnessEnvironment::new(Rc::new(environment)))
    }

    /// Harness of type `H` rooted at the fixture's host element, after one
    /// stabilization.
    pub async fn harness_for_fixture<C: Component, H: ComponentHarness>(
        fixture: &ComponentFixture<C>,
        options: Option<EnvironmentOptions>,
    ) -> Result<H> {
        let environment = Self::create(fixture, fixture.host(), options)?;
        environment.force_stabilize().await?;
        Ok(HarnessEnvironment::new(Rc::new(environment)).harness::<H>())
    }

    /// Node behind a test element created by this environment.
    ///
    /// # Errors
    ///
    /// [`HarnessError::ForeignElement`] for elements from any other
    /// environment.
    pub fn get_native_element(element: &TestElementRef) -> Result<NodeId> {
        element
            .as_any()
            .downcast_ref::<UnitTestElement>()
            .map(UnitTestElement::node)
            .ok_or(HarnessError::ForeignElement {
                environment: ENVIRONMENT_NAME,
            })
    }

    fn scoped(&self, root: NodeId) -> Self {
        Self {
            root,
            ..self.clone()
        }
    }

    fn create_test_element(&self, node: NodeId) -> TestElementRef {
        let environment = self.clone();
        let stabilize: StabilizeFn = Rc::new(move || {
            let environment = environment.clone();
            async move { environment.force_stabilize().await }.boxed_local()
        });
        Rc::new(UnitTestElement::new(
            self.fixture.document().clone(),
            node,
            stabilize,
        ))
    }
}

#[async_trait(?Send)]
impl EnvironmentBackend for TestbedHarnessEnvironment {
    fn root_element(&self) -> TestElementRef {
        self.create_test_element(self.root)
    }

    fn document_root(&self) -> Rc<dyn EnvironmentBackend> {
        Rc::new(self.scoped(self.fixture.document().body()))
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<ScopedElement>> {
        self.force_stabilize().await?;
        let nodes = (self.options.query_fn)(selector, self.fixture.document(), self.root)?;
        trace!(%selector, matches = nodes.len(), "query_all");
        Ok(nodes
            .into_iter()
            .map(|node| ScopedElement {
                key: node.index() as u64,
                element: self.create_test_element(node),
                environment: Rc::new(self.scoped(node)) as Rc<dyn EnvironmentBackend>,
            })
            .collect())
    }

    async fn force_stabilize(&self) -> Result<()> {
        if self.fixture.registry().context().is_auto_disabled() {
            return Ok(());
        }
        if self.fixture.is_destroyed() {
            return Err(HarnessError::FixtureDestroyed);
        }
        self.fixture.settle().await
    }

    async fn wait_for_tasks_outside(&self) -> Result<()> {
        let event_loop = self.fixture.event_loop();
        if event_loop.is_fake_time() {
            event_loop.flush()?;
        }
        debug!("waiting for tasks outside the application zone");
        TaskStateInterceptor::when_stable(self.fixture.proxy_zone(), &self.task_state).await;
        Ok(())
    }
}

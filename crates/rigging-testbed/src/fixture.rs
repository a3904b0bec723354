#![forbid(unsafe_code)]

//! Test bed, component fixtures, and the component contract.
//!
//! # Design
//!
//! A [`TestBed`] owns one [`Document`], one [`EventLoop`] and a zone chain
//! `root → ProxyZone`. Each fixture created from it forks its own
//! application zone from the proxy zone and renders its component under a
//! fresh `<div id="rootN">` in the body.
//!
//! Fixtures are registered with a [`FixtureRegistry`] while alive so that
//! batched stabilization can settle all of them at once. Dropping the test
//! bed destroys every fixture it created.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};

use rigging_core::{Document, NodeId};
use rigging_harness::{HarnessError, Result};
use rigging_runtime::{
    EventLoop, EventLoopConfig, EventStream, WaitUntil, Zone, ZoneSpec,
};
use tracing::{debug, trace};

use crate::registry::FixtureRegistry;

/// What a component sees while it initializes and renders.
#[derive(Debug)]
pub struct ComponentContext<'a> {
    /// Document the component renders into.
    pub document: &'a Document,
    /// The component's host element.
    pub host: NodeId,
    /// Application zone of the fixture.
    pub zone: &'a Zone,
}

/// A renderable unit under test.
pub trait Component: 'static {
    /// Tag of the host element created for the component.
    const HOST_TAG: &'static str;

    /// Build the initial DOM under the host and wire listeners. Runs once,
    /// inside the application zone.
    fn init(&mut self, cx: &ComponentContext<'_>) -> rigging_core::Result<()>;

    /// Bring the DOM up to date with component state. Runs on every change
    /// detection pass.
    fn render(&mut self, cx: &ComponentContext<'_>) -> rigging_core::Result<()> {
        let _ = cx;
        Ok(())
    }
}

type RenderFn = Box<dyn FnMut(&ComponentContext<'_>) -> rigging_core::Result<()>>;

/// Type-erased fixture state shared with environments and the registry.
pub(crate) struct FixtureCore {
    id: u64,
    document: Document,
    root: NodeId,
    host: NodeId,
    app_zone: Zone,
    proxy_zone: Zone,
    registry: FixtureRegistry,
    destroyed: Cell<bool>,
    on_destroy: EventStream<()>,
    render: RefCell<RenderFn>,
}

impl fmt::Debug for FixtureCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixtureCore")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("destroyed", &self.destroyed.get())
            .finish()
    }
}

impl FixtureCore {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn document(&self) -> &Document {
        &self.document
    }

    pub(crate) fn proxy_zone(&self) -> &Zone {
        &self.proxy_zone
    }

    pub(crate) fn registry(&self) -> &FixtureRegistry {
        &self.registry
    }

    pub(crate) fn event_loop(&self) -> &EventLoop {
        self.app_zone.event_loop()
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    /// Run one change detection pass inside the application zone. A pass
    /// requested while one is rendering is skipped.
    pub(crate) fn detect_changes(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(HarnessError::FixtureDestroyed);
        }
        let Ok(mut render) = self.render.try_borrow_mut() else {
            trace!(fixture = self.id, "nested change detection skipped");
            return Ok(());
        };
        let cx = ComponentContext {
            document: &self.document,
            host: self.host,
            zone: &self.app_zone,
        };
        self.app_zone.run(|| (*render)(&cx))?;
        Ok(())
    }

    /// Detect changes, then wait until the application zone is stable.
    /// Virtual timers are flushed synchronously first.
    pub(crate) async fn settle(&self) -> Result<()> {
        self.detect_changes()?;
        if self.event_loop().is_fake_time() {
            self.event_loop().flush()?;
        }
        self.app_zone.when_stable().await;
        Ok(())
    }

    pub(crate) fn destroy(&self) {
        if self.destroyed.replace(true) {
            return;
        }
        if let Err(err) = self.document.remove(self.root) {
            debug!(fixture = self.id, %err, "fixture root already detached");
        }
        self.registry.unregister(self.id);
        debug!(fixture = self.id, "fixture destroyed");
        self.on_destroy.emit(());
    }
}

/// Handle to a component rendered by a [`TestBed`].
pub struct ComponentFixture<C> {
    core: Rc<FixtureCore>,
    component: Rc<RefCell<C>>,
}

impl<C> Clone for ComponentFixture<C> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
            component: Rc::clone(&self.component),
        }
    }
}

impl<C> fmt::Debug for ComponentFixture<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentFixture")
            .field("core", &self.core)
            .finish()
    }
}

impl<C: Component> ComponentFixture<C> {
    /// The component instance.
    #[must_use]
    pub fn component(&self) -> Ref<'_, C> {
        self.component.borrow()
    }

    /// Mutable access to the component instance.
    #[must_use]
    pub fn component_mut(&self) -> RefMut<'_, C> {
        self.component.borrow_mut()
    }

    /// Document the fixture renders into.
    #[must_use]
    pub fn document(&self) -> &Document {
        &self.core.document
    }

    /// Host element of the component.
    #[must_use]
    pub fn host(&self) -> NodeId {
        self.core.host
    }

    /// Application zone.
    #[must_use]
    pub fn zone(&self) -> &Zone {
        &self.core.app_zone
    }

    /// Proxy zone the application zone was forked from.
    #[must_use]
    pub fn proxy_zone(&self) -> &Zone {
        &self.core.proxy_zone
    }

    /// Event loop shared by the test bed.
    #[must_use]
    pub fn event_loop(&self) -> &EventLoop {
        self.core.event_loop()
    }

    /// Run change detection.
    pub fn detect_changes(&self) -> Result<()> {
        self.core.detect_changes()
    }

    /// Whether the application zone has nothing pending.
    #[must_use]
    pub fn is_stable(&self) -> bool {
        self.core.app_zone.is_stable()
    }

    /// Future resolving once the application zone is stable.
    pub fn when_stable(&self) -> WaitUntil<impl FnMut() -> bool + Unpin + use<C>> {
        self.core.app_zone.when_stable()
    }

    /// Destroy the component and detach its DOM. Idempotent.
    pub fn destroy(&self) {
        self.core.destroy();
    }

    /// Whether [`destroy`](Self::destroy) has run.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.core.is_destroyed()
    }

    /// Stream notified once when the fixture is destroyed.
    #[must_use]
    pub fn on_destroy(&self) -> EventStream<()> {
        self.core.on_destroy.clone()
    }

    pub(crate) fn core(&self) -> &Rc<FixtureCore> {
        &self.core
    }
}

/// Owner of the document, event loop and zones fixtures run in.
pub struct TestBed {
    document: Document,
    event_loop: EventLoop,
    proxy_zone: Zone,
    registry: FixtureRegistry,
    fixtures: RefCell<Vec<Weak<FixtureCore>>>,
}

impl fmt::Debug for TestBed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestBed")
            .field("event_loop", &self.event_loop)
            .field("fixtures", &self.fixtures.borrow().len())
            .finish()
    }
}

impl Default for TestBed {
    fn default() -> Self {
        Self::new()
    }
}

impl TestBed {
    /// Test bed on the real clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EventLoopConfig::real().with_env_overrides())
    }

    /// Test bed on a virtual clock; stabilization flushes timers
    /// synchronously.
    #[must_use]
    pub fn fake_async() -> Self {
        Self::with_config(EventLoopConfig::virtual_time().with_env_overrides())
    }

    /// Test bed with an explicit event loop configuration, registered with
    /// the thread's shared fixture registry.
    #[must_use]
    pub fn with_config(config: EventLoopConfig) -> Self {
        let event_loop = EventLoop::new(config);
        let proxy_zone = Zone::root(&event_loop).fork(ZoneSpec::new("ProxyZone").proxy());
        Self {
            document: Document::new(),
            event_loop,
            proxy_zone,
            registry: FixtureRegistry::shared(),
            fixtures: RefCell::new(Vec::new()),
        }
    }

    /// Use `registry` instead of the shared one for fixtures created from
    /// now on.
    #[must_use]
    pub fn with_registry(mut self, registry: FixtureRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// The document.
    #[must_use]
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// The event loop.
    #[must_use]
    pub fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }

    /// The proxy zone every application zone is forked from.
    #[must_use]
    pub fn proxy_zone(&self) -> &Zone {
        &self.proxy_zone
    }

    /// Registry fixtures are registered with.
    #[must_use]
    pub fn registry(&self) -> &FixtureRegistry {
        &self.registry
    }

    /// Render `component` into a new fixture.
    pub fn create_component<C: Component>(&self, component: C) -> Result<ComponentFixture<C>> {
        let id = self.registry.next_fixture_id();
        let body = self.document.body();
        let root = self
            .document
            .append_element(body, "div", &[("id", &format!("root{id}"))])?;
        let host = self.document.append_element(root, C::HOST_TAG, &[])?;
        let app_zone = self.proxy_zone.fork(ZoneSpec::new(format!("app{id}")));

        let component = Rc::new(RefCell::new(component));
        {
            let cx = ComponentContext {
                document: &self.document,
                host,
                zone: &app_zone,
            };
            app_zone.run(|| component.borrow_mut().init(&cx))?;
        }

        let render_target = Rc::clone(&component);
        let render: RenderFn = Box::new(move |cx| render_target.borrow_mut().render(cx));
        let core = Rc::new(FixtureCore {
            id,
            document: self.document.clone(),
            root,
            host,
            app_zone,
            proxy_zone: self.proxy_zone.clone(),
            registry: self.registry.clone(),
            destroyed: Cell::new(false),
            on_destroy: EventStream::new(),
            render: RefCell::new(render),
        });
        self.registry.register(Rc::clone(&core));
        self.fixtures.borrow_mut().push(Rc::downgrade(&core));
        debug!(fixture = id, tag = C::HOST_TAG, "component created");
        Ok(ComponentFixture { core, component })
    }

    /// Destroy every fixture created by this test bed.
    pub fn reset(&self) {
        let fixtures = std::mem::take(&mut *self.fixtures.borrow_mut());
        for fixture in fixtures.iter().filter_map(Weak::upgrade) {
            fixture.destroy();
        }
    }
}

impl Drop for TestBed {
    fn drop(&mut self) {
        self.reset();
    }
}

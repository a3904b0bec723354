//! Fixture stabilization through the harness environment.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::executor::block_on;
use pretty_assertions::assert_eq;
use rigging_core::Modifiers;
use rigging_harness::{
    ClickPosition, ComponentHarness, HarnessError, HarnessLoader, LocatorFactory, Result,
    TestElement, TextOptions,
};
use rigging_testbed::{
    Component, ComponentContext, ComponentFixture, FixtureRegistry, TestBed,
    TestbedHarnessEnvironment,
};
use tracing::span::{Attributes, Id};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use web_time::Instant;

/// Clicking `#load` fills `.status` after `delay`; clicking `#fetch` holds
/// pending work for `delay`. `.count` is rendered from the click counter.
struct LoaderComponent {
    delay: Duration,
    clicks: Rc<Cell<u32>>,
}

impl LoaderComponent {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            clicks: Rc::default(),
        }
    }
}

impl Component for LoaderComponent {
    const HOST_TAG: &'static str = "loader-cmp";

    fn init(&mut self, cx: &ComponentContext<'_>) -> rigging_core::Result<()> {
        let doc = cx.document;
        let load = doc.append_element(cx.host, "button", &[("id", "load")])?;
        let fetch = doc.append_element(cx.host, "button", &[("id", "fetch")])?;
        let status = doc.append_element(cx.host, "span", &[("class", "status")])?;
        doc.append_element(cx.host, "span", &[("class", "count")])?;

        let zone = cx.zone.clone();
        let delay = self.delay;
        let clicks = Rc::clone(&self.clicks);
        doc.add_event_listener(load, "click", move |doc, _| {
            clicks.set(clicks.get() + 1);
            let doc = doc.clone();
            zone.set_timeout(delay, move || {
                let _ = doc.set_text_content(status, "loaded");
            });
        })?;

        let zone = cx.zone.clone();
        let delay = self.delay;
        doc.add_event_listener(fetch, "click", move |doc, _| {
            let work = zone.begin_pending_work("fetch");
            let doc = doc.clone();
            zone.set_timeout(delay, move || {
                let _ = doc.set_text_content(status, "fetched");
                work.complete();
            });
        })?;
        Ok(())
    }

    fn render(&mut self, cx: &ComponentContext<'_>) -> rigging_core::Result<()> {
        for count in cx.document.query_selector_all(cx.host, ".count")? {
            cx.document
                .set_text_content(count, &self.clicks.get().to_string())?;
        }
        Ok(())
    }
}

#[derive(Clone)]
struct LoaderHarness {
    locator: LocatorFactory,
}

impl ComponentHarness for LoaderHarness {
    const HOST_SELECTOR: &'static str = "loader-cmp";

    fn new(locator_factory: LocatorFactory) -> Self {
        Self {
            locator: locator_factory,
        }
    }

    fn locator_factory(&self) -> &LocatorFactory {
        &self.locator
    }
}

impl LoaderHarness {
    async fn load(&self) -> Result<()> {
        let button = self.locator.element_for("#load").await?;
        button.click(ClickPosition::Default, Modifiers::NONE).await
    }

    async fn fetch(&self) -> Result<()> {
        let button = self.locator.element_for("#fetch").await?;
        button.click(ClickPosition::Default, Modifiers::NONE).await
    }

    async fn status(&self) -> Result<String> {
        let status = self.locator.element_for(".status").await?;
        status.text(TextOptions::default()).await
    }

    async fn count(&self) -> Result<String> {
        let count = self.locator.element_for(".count").await?;
        count.text(TextOptions::default()).await
    }
}

fn create(bed: &TestBed, delay: Duration) -> (ComponentFixture<LoaderComponent>, HarnessLoader) {
    let fixture = bed.create_component(LoaderComponent::new(delay)).unwrap();
    let loader = TestbedHarnessEnvironment::loader(&fixture, None).unwrap();
    (fixture, loader)
}

fn harness_for(fixture: &ComponentFixture<LoaderComponent>) -> LoaderHarness {
    block_on(TestbedHarnessEnvironment::harness_for_fixture(fixture, None)).unwrap()
}

fn fake_bed() -> TestBed {
    TestBed::fake_async().with_registry(FixtureRegistry::default())
}

#[test]
fn fake_time_flushes_timers_after_actions() {
    let bed = fake_bed();
    let (fixture, _) = create(&bed, Duration::from_secs(5));
    let harness = harness_for(&fixture);

    block_on(harness.load()).unwrap();
    assert!(fixture.is_stable());
    assert_eq!(block_on(harness.status()).unwrap(), "loaded");
    assert_eq!(block_on(harness.count()).unwrap(), "1");
    assert_eq!(fixture.event_loop().now(), Duration::from_secs(5));
}

#[test]
fn fake_time_waits_for_pending_work() {
    let bed = fake_bed();
    let (fixture, _) = create(&bed, Duration::from_millis(250));
    let harness = harness_for(&fixture);

    block_on(harness.fetch()).unwrap();
    assert!(fixture.is_stable());
    assert_eq!(block_on(harness.status()).unwrap(), "fetched");
}

#[test]
fn real_clock_waits_for_timers() {
    let bed = TestBed::new().with_registry(FixtureRegistry::default());
    let (fixture, _) = create(&bed, Duration::from_millis(30));
    let harness = harness_for(&fixture);

    let start = Instant::now();
    block_on(harness.fetch()).unwrap();
    assert!(start.elapsed() >= Duration::from_millis(25));
    assert_eq!(block_on(harness.status()).unwrap(), "fetched");
}

#[test]
fn harness_for_fixture_is_rooted_at_host() {
    let bed = fake_bed();
    let (fixture, _) = create(&bed, Duration::ZERO);
    let harness: LoaderHarness =
        block_on(TestbedHarnessEnvironment::harness_for_fixture(&fixture, None)).unwrap();
    assert!(block_on(harness.host().matches_selector("loader-cmp")).unwrap());
    block_on(harness.load()).unwrap();
    assert_eq!(block_on(harness.count()).unwrap(), "1");
}

#[test]
fn document_root_loader_sees_content_outside_the_fixture() {
    let bed = fake_bed();
    let (fixture, loader) = create(&bed, Duration::ZERO);
    let doc = fixture.document();
    doc.append_element(doc.body(), "div", &[("class", "overlay")])
        .unwrap();

    assert!(
        block_on(loader.element_for_optional(".overlay"))
            .unwrap()
            .is_none()
    );
    let root_loader = TestbedHarnessEnvironment::document_root_loader(&fixture, None).unwrap();
    assert!(
        block_on(root_loader.element_for_optional(".overlay"))
            .unwrap()
            .is_some()
    );
    let factory = loader.document_root_locator_factory();
    assert_eq!(block_on(factory.element_for_all(".overlay")).unwrap().len(), 1);
}

#[test]
fn destroyed_fixture_rejects_operations() {
    let bed = fake_bed();
    let (fixture, loader) = create(&bed, Duration::ZERO);
    let status = block_on(loader.element_for(".status")).unwrap();

    let destroyed = Rc::new(Cell::new(false));
    let flag = Rc::clone(&destroyed);
    let _sub = fixture.on_destroy().subscribe(move |_| flag.set(true));

    fixture.destroy();
    assert!(destroyed.get());
    assert_eq!(
        block_on(loader.element_for(".status")).unwrap_err(),
        HarnessError::FixtureDestroyed
    );
    assert_eq!(
        block_on(status.text(TextOptions::default())).unwrap_err(),
        HarnessError::FixtureDestroyed
    );
    assert!(bed.registry().is_empty());
}

#[test]
fn manual_stabilization_defers_settling() {
    let bed = fake_bed();
    let (fixture, loader) = create(&bed, Duration::from_secs(1));
    let load = block_on(loader.element_for("#load")).unwrap();

    block_on(bed.registry().context().manual_stabilization(|| async {
        load.click(ClickPosition::Default, Modifiers::NONE).await?;
        assert!(!fixture.is_stable(), "timer still pending inside the batch");
        Ok(())
    }))
    .unwrap();
    assert!(!fixture.is_stable(), "manual batches do not settle on exit");

    block_on(loader.force_stabilize()).unwrap();
    assert!(fixture.is_stable());
    let status = block_on(loader.element_for(".status")).unwrap();
    assert_eq!(block_on(status.text(TextOptions::default())).unwrap(), "loaded");
}

#[test]
fn parallel_batch_settles_every_fixture() {
    let registry = FixtureRegistry::default();
    let bed_a = TestBed::fake_async().with_registry(registry.clone());
    let bed_b = TestBed::fake_async().with_registry(registry.clone());
    let (fixture_a, _) = create(&bed_a, Duration::ZERO);
    let (fixture_b, _) = create(&bed_b, Duration::ZERO);

    let fired = Rc::new(RefCell::new(Vec::new()));
    for (name, fixture) in [("a", &fixture_a), ("b", &fixture_b)] {
        let fired = Rc::clone(&fired);
        fixture
            .zone()
            .set_timeout(Duration::from_millis(100), move || fired.borrow_mut().push(name));
    }

    let empty: Vec<futures::future::LocalBoxFuture<'_, Result<()>>> = Vec::new();
    block_on(registry.context().parallel(empty)).unwrap();
    fired.borrow_mut().sort_unstable();
    assert_eq!(*fired.borrow(), vec!["a", "b"]);
    assert!(fixture_a.is_stable() && fixture_b.is_stable());
}

#[test]
fn parallel_operations_run_without_auto_stabilization() {
    let bed = fake_bed();
    let (fixture, loader) = create(&bed, Duration::from_secs(2));
    let load = block_on(loader.element_for("#load")).unwrap();
    let fetch = block_on(loader.element_for("#fetch")).unwrap();

    let results = block_on(bed.registry().context().parallel(vec![
        async { load.click(ClickPosition::Default, Modifiers::NONE).await }.boxed_local(),
        async { fetch.click(ClickPosition::Default, Modifiers::NONE).await }.boxed_local(),
    ]))
    .unwrap();
    assert_eq!(results.len(), 2);
    assert!(fixture.is_stable(), "the closing settle flushed both timers");
}

#[test]
fn batch_handler_follows_fixture_count() {
    let bed = fake_bed();
    let context = bed.registry().context();
    assert!(!context.has_handler());

    let (first, _) = create(&bed, Duration::ZERO);
    let (second, _) = create(&bed, Duration::ZERO);
    assert!(context.has_handler());
    assert_eq!(bed.registry().len(), 2);

    first.destroy();
    assert!(context.has_handler());
    second.destroy();
    assert!(!context.has_handler());

    let (_third, _) = create(&bed, Duration::ZERO);
    assert!(context.has_handler());
    bed.reset();
    assert!(!context.has_handler());
}

#[test]
fn wait_for_tasks_outside_flushes_proxy_timers() {
    let bed = fake_bed();
    let (_fixture, loader) = create(&bed, Duration::ZERO);
    let ran = Rc::new(Cell::new(false));
    let flag = Rc::clone(&ran);
    bed.proxy_zone()
        .set_timeout(Duration::from_millis(500), move || flag.set(true));

    block_on(loader.wait_for_tasks_outside()).unwrap();
    assert!(ran.get());
}

#[test]
fn wait_for_tasks_outside_on_real_clock() {
    let bed = TestBed::new().with_registry(FixtureRegistry::default());
    let (fixture, loader) = create(&bed, Duration::ZERO);

    // Application-zone work does not count as outside work.
    let inside = fixture.zone().set_timeout(Duration::from_secs(60), || {});
    let ran = Rc::new(Cell::new(false));
    let flag = Rc::clone(&ran);
    bed.proxy_zone()
        .set_timeout(Duration::from_millis(20), move || flag.set(true));

    block_on(loader.wait_for_tasks_outside()).unwrap();
    assert!(ran.get());
    assert!(!fixture.is_stable());
    assert!(fixture.zone().clear_timeout(inside));
}

#[derive(Clone, Default)]
struct SpanNames(Arc<Mutex<Vec<String>>>);

impl<S> Layer<S> for SpanNames
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
        self.0
            .lock()
            .expect("span name lock")
            .push(attrs.metadata().name().to_string());
    }
}

#[test]
fn settling_a_batch_is_traced() {
    let bed = fake_bed();
    let (_fixture, _) = create(&bed, Duration::ZERO);

    let names = SpanNames::default();
    let subscriber = tracing_subscriber::registry().with(names.clone());
    tracing::subscriber::with_default(subscriber, || {
        let empty: Vec<futures::future::LocalBoxFuture<'_, Result<()>>> = Vec::new();
        block_on(bed.registry().context().parallel(empty)).unwrap();
    });
    let captured = names.0.lock().expect("span name lock").clone();
    assert_eq!(
        captured
            .iter()
            .filter(|name| *name == "testbed.settle_all")
            .count(),
        2,
        "one settle on entry and one on exit"
    );
}

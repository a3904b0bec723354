//! Locator and loader behavior over a minimal document-backed environment.

use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

use async_trait::async_trait;
use futures::executor::block_on;
use pretty_assertions::assert_eq;
use rigging_core::{Document, DomEvent, ElementDimensions, Modifiers, NodeId};
use rigging_harness::{
    BaseHarnessFilters, ClickPosition, ComponentHarness, EnvironmentBackend, HarnessEnvironment,
    HarnessError, HarnessPredicate, KeyInput, Located, LocatorFactory, LocatorQuery, Result,
    ScopedElement, TestElement, TestElementRef, TextOptions, TextPattern,
};
use serde_json::{Map, Value};

#[derive(Debug)]
struct DocElement {
    doc: Document,
    node: NodeId,
}

#[async_trait(?Send)]
impl TestElement for DocElement {
    async fn blur(&self) -> Result<()> {
        Ok(self.doc.blur(self.node)?)
    }
    async fn clear(&self) -> Result<()> {
        Ok(self.doc.set_value(self.node, "")?)
    }
    async fn click(&self, _position: ClickPosition, _modifiers: Modifiers) -> Result<()> {
        self.doc.dispatch_event(self.node, &DomEvent::new("click"))?;
        Ok(())
    }
    async fn right_click(&self, _position: ClickPosition, _modifiers: Modifiers) -> Result<()> {
        self.doc
            .dispatch_event(self.node, &DomEvent::new("contextmenu"))?;
        Ok(())
    }
    async fn focus(&self) -> Result<()> {
        Ok(self.doc.focus(self.node)?)
    }
    async fn get_css_value(&self, property: &str) -> Result<String> {
        Ok(self.doc.style_value(self.node, property)?)
    }
    async fn hover(&self) -> Result<()> {
        Ok(())
    }
    async fn mouse_away(&self) -> Result<()> {
        Ok(())
    }
    async fn send_keys(&self, _modifiers: Modifiers, _keys: &[KeyInput]) -> Result<()> {
        Ok(())
    }
    async fn text(&self, options: TextOptions) -> Result<String> {
        Ok(match options.exclude {
            Some(exclude) => self.doc.text_content_excluding(self.node, &exclude)?,
            None => self.doc.text_content(self.node)?,
        })
    }
    async fn get_attribute(&self, name: &str) -> Result<Option<String>> {
        Ok(self.doc.attribute(self.node, name)?)
    }
    async fn has_class(&self, name: &str) -> Result<bool> {
        Ok(self.doc.has_class(self.node, name)?)
    }
    async fn get_dimensions(&self) -> Result<ElementDimensions> {
        Ok(self.doc.bounding_rect(self.node)?)
    }
    async fn get_property(&self, name: &str) -> Result<Value> {
        Ok(self.doc.property(self.node, name)?)
    }
    async fn set_input_value(&self, value: &str) -> Result<()> {
        Ok(self.doc.set_value(self.node, value)?)
    }
    async fn select_options(&self, _indexes: &[usize]) -> Result<()> {
        Ok(())
    }
    async fn matches_selector(&self, selector: &str) -> Result<bool> {
        Ok(self.doc.matches(self.node, selector)?)
    }
    async fn is_focused(&self) -> Result<bool> {
        Ok(self.doc.active_element() == Some(self.node))
    }
    async fn dispatch_event(&self, name: &str, data: Map<String, Value>) -> Result<()> {
        self.doc
            .dispatch_event(self.node, &DomEvent::with_data(name, data))?;
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Clone)]
struct DocBackend {
    doc: Document,
    root: NodeId,
    queries: Rc<Cell<usize>>,
}

#[async_trait(?Send)]
impl EnvironmentBackend for DocBackend {
    fn root_element(&self) -> TestElementRef {
        Rc::new(DocElement {
            doc: self.doc.clone(),
            node: self.root,
        })
    }

    fn document_root(&self) -> Rc<dyn EnvironmentBackend> {
        Rc::new(Self {
            root: self.doc.body(),
            ..self.clone()
        })
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<ScopedElement>> {
        self.queries.set(self.queries.get() + 1);
        let nodes = self.doc.query_selector_all(self.root, selector)?;
        Ok(nodes
            .into_iter()
            .map(|node| ScopedElement {
                key: node.index() as u64,
                element: Rc::new(DocElement {
                    doc: self.doc.clone(),
                    node,
                }) as TestElementRef,
                environment: Rc::new(Self {
                    root: node,
                    ..self.clone()
                }) as Rc<dyn EnvironmentBackend>,
            })
            .collect())
    }

    async fn force_stabilize(&self) -> Result<()> {
        Ok(())
    }

    async fn wait_for_tasks_outside(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct ChipHarness {
    locator: LocatorFactory,
}

impl ComponentHarness for ChipHarness {
    const HOST_SELECTOR: &'static str = ".chip";

    fn new(locator_factory: LocatorFactory) -> Self {
        Self {
            locator: locator_factory,
        }
    }

    fn locator_factory(&self) -> &LocatorFactory {
        &self.locator
    }
}

impl ChipHarness {
    async fn text(&self) -> Result<String> {
        self.host().text(TextOptions::default()).await
    }

    fn with_text(text: impl Into<TextPattern>) -> HarnessPredicate<Self> {
        let pattern: TextPattern = text.into();
        Self::predicate().add_option("text", Some(pattern), |chip: Self, pattern: TextPattern| {
            async move {
                let text = chip.text().await?;
                Ok(HarnessPredicate::<Self>::string_matches(
                    Some(&text),
                    Some(&pattern),
                ))
            }
        })
    }
}

#[derive(Clone, Debug)]
struct ChipListHarness {
    locator: LocatorFactory,
}

impl ComponentHarness for ChipListHarness {
    const HOST_SELECTOR: &'static str = ".chip-list";

    fn new(locator_factory: LocatorFactory) -> Self {
        Self {
            locator: locator_factory,
        }
    }

    fn locator_factory(&self) -> &LocatorFactory {
        &self.locator
    }
}

impl ChipListHarness {
    async fn chips(&self) -> Result<Vec<ChipHarness>> {
        self.locator_factory()
            .locator_for_all(ChipHarness::predicate())
            .await
    }
}

struct Fixture {
    loader: HarnessEnvironment,
    queries: Rc<Cell<usize>>,
}

/// ```text
/// body
/// ├── div.chip-list#plain
/// │   ├── span.chip "alpha"
/// │   └── span.chip "beta"
/// ├── div.featured
/// │   └── div.chip-list#featured
/// │       └── span.chip "gamma"
/// └── button "go"
/// ```
fn fixture() -> Fixture {
    let doc = Document::new();
    let body = doc.body();
    let plain = doc
        .append_element(body, "div", &[("class", "chip-list"), ("id", "plain")])
        .unwrap();
    for label in ["alpha", "beta"] {
        let chip = doc.append_element(plain, "span", &[("class", "chip")]).unwrap();
        doc.append_text(chip, label).unwrap();
    }
    let featured = doc
        .append_element(body, "div", &[("class", "featured")])
        .unwrap();
    let list = doc
        .append_element(featured, "div", &[("class", "chip-list"), ("id", "featured")])
        .unwrap();
    let gamma = doc.append_element(list, "span", &[("class", "chip")]).unwrap();
    doc.append_text(gamma, "gamma").unwrap();
    let button = doc.append_element(body, "button", &[]).unwrap();
    doc.append_text(button, "go").unwrap();

    let queries = Rc::new(Cell::new(0));
    let backend = DocBackend {
        doc,
        root: body,
        queries: Rc::clone(&queries),
    };
    Fixture {
        loader: HarnessEnvironment::new(Rc::new(backend)),
        queries,
    }
}

async fn texts(chips: &[ChipHarness]) -> Vec<String> {
    let mut out = Vec::new();
    for chip in chips {
        out.push(chip.text().await.unwrap());
    }
    out
}

#[test]
fn all_harnesses_in_document_order() {
    let fx = fixture();
    block_on(async {
        let chips = fx
            .loader
            .get_all_harnesses(ChipHarness::predicate())
            .await
            .unwrap();
        assert_eq!(texts(&chips).await, vec!["alpha", "beta", "gamma"]);
    });
}

#[test]
fn get_harness_returns_first_match() {
    let fx = fixture();
    block_on(async {
        let chip = fx.loader.get_harness(ChipHarness::predicate()).await.unwrap();
        assert_eq!(chip.text().await.unwrap(), "alpha");
    });
}

#[test]
fn nested_harness_queries_are_scoped_to_host() {
    let fx = fixture();
    block_on(async {
        let lists = fx
            .loader
            .get_all_harnesses(ChipListHarness::predicate())
            .await
            .unwrap();
        assert_eq!(lists.len(), 2);
        assert_eq!(texts(&lists[0].chips().await.unwrap()).await, vec!["alpha", "beta"]);
        assert_eq!(texts(&lists[1].chips().await.unwrap()).await, vec!["gamma"]);
    });
}

#[test]
fn text_option_filters_candidates() {
    let fx = fixture();
    block_on(async {
        let chip = fx
            .loader
            .get_harness(ChipHarness::with_text("beta"))
            .await
            .unwrap();
        assert_eq!(chip.text().await.unwrap(), "beta");

        let pattern = regex::Regex::new("^(alpha|gamma)$").unwrap();
        let chips = fx
            .loader
            .get_all_harnesses(ChipHarness::with_text(pattern))
            .await
            .unwrap();
        assert_eq!(texts(&chips).await, vec!["alpha", "gamma"]);
    });
}

#[test]
fn ancestor_filter_restricts_hosts() {
    let fx = fixture();
    block_on(async {
        let chips = fx
            .loader
            .get_all_harnesses(ChipHarness::with(BaseHarnessFilters::ancestor(
                ".featured, #plain",
            )))
            .await
            .unwrap();
        assert_eq!(texts(&chips).await, vec!["alpha", "beta", "gamma"]);

        let featured = fx
            .loader
            .get_all_harnesses(ChipHarness::with(BaseHarnessFilters::ancestor(".featured")))
            .await
            .unwrap();
        assert_eq!(texts(&featured).await, vec!["gamma"]);
    });
}

#[test]
fn ancestor_selector_crosses_alternatives() {
    let predicate = ChipHarness::with(BaseHarnessFilters::ancestor(".a, .b"));
    assert_eq!(predicate.selector().unwrap(), ".a .chip, .b .chip");
    assert_eq!(ChipHarness::predicate().selector().unwrap(), ".chip");
}

#[test]
fn selector_filter_is_described() {
    let predicate = ChipHarness::with(BaseHarnessFilters::selector(":first-child"));
    assert_eq!(
        predicate.query_description(),
        "ChipHarness with host element matching selector: \".chip\" \
         satisfying the constraints: host matches selector \":first-child\""
    );
    assert_eq!(
        ChipHarness::with_text("x").description(),
        "text = \"x\""
    );
}

#[test]
fn selector_filter_is_applied() {
    let fx = fixture();
    block_on(async {
        let chips = fx
            .loader
            .get_all_harnesses(ChipHarness::with(BaseHarnessFilters::selector(
                ":first-child",
            )))
            .await
            .unwrap();
        assert_eq!(texts(&chips).await, vec!["alpha", "gamma"]);
    });
}

#[test]
fn missing_harness_reports_query() {
    let fx = fixture();
    let err = block_on(fx.loader.get_harness(ChipHarness::with_text("delta"))).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Failed to find element matching one of the following queries:\n\
         (ChipHarness with host element matching selector: \".chip\" \
         satisfying the constraints: text = \"delta\")"
    );
    assert!(!block_on(fx.loader.has_harness(ChipHarness::with_text("delta"))).unwrap());
    assert!(block_on(fx.loader.get_harness_or_none(ChipHarness::with_text("delta")))
        .unwrap()
        .is_none());
}

#[test]
fn mixed_queries_dedupe_per_element() {
    let fx = fixture();
    block_on(async {
        let found = fx
            .loader
            .locate_all(vec![
                LocatorQuery::from("button"),
                LocatorQuery::from(".chip"),
                LocatorQuery::Harness(ChipHarness::predicate()),
            ])
            .await
            .unwrap();
        let kinds: Vec<&str> = found
            .iter()
            .map(|located| match located {
                Located::Element(_) => "element",
                Located::Harness(_) => "harness",
            })
            .collect();
        // Three chips contribute one element and one harness each; the
        // button contributes one element.
        assert_eq!(
            kinds,
            vec![
                "element", "harness", "element", "harness", "element", "harness", "element",
            ]
        );
    });
    assert_eq!(fx.queries.get(), 1, "one raw query per locate_all");
}

#[test]
fn harness_query_first_puts_harness_first() {
    let fx = fixture();
    block_on(async {
        let found = fx
            .loader
            .locate_all(vec![
                LocatorQuery::Harness(ChipHarness::with_text("alpha")),
                LocatorQuery::from(".chip"),
            ])
            .await
            .unwrap();
        assert!(matches!(found[0], Located::Harness(_)));
        assert!(matches!(found[1], Located::Element(_)));
        // beta and gamma fail the harness predicate but still match the
        // element query.
        assert_eq!(found.len(), 4);
    });
}

#[test]
fn locate_lists_every_query_when_nothing_matches() {
    let fx = fixture();
    let err = block_on(fx.loader.locate(vec![
        LocatorQuery::from("table"),
        LocatorQuery::Harness(ChipHarness::with_text("zeta")),
    ]))
    .unwrap_err();
    let HarnessError::NotFound { queries } = err else {
        panic!("expected NotFound");
    };
    assert_eq!(
        queries,
        vec![
            "TestElement for element matching selector: \"table\"".to_string(),
            "ChipHarness with host element matching selector: \".chip\" \
             satisfying the constraints: text = \"zeta\""
                .to_string(),
        ]
    );
}

#[test]
fn child_loaders_scope_queries() {
    let fx = fixture();
    block_on(async {
        let featured = fx.loader.get_child_loader(".featured").await.unwrap();
        let chips = featured
            .get_all_harnesses(ChipHarness::predicate())
            .await
            .unwrap();
        assert_eq!(texts(&chips).await, vec!["gamma"]);

        let loaders = fx.loader.get_all_child_loaders(".chip-list").await.unwrap();
        assert_eq!(loaders.len(), 2);

        let err = fx.loader.get_child_loader(".missing").await.unwrap_err();
        assert_eq!(
            err,
            HarnessError::NotFound {
                queries: vec![
                    "HarnessLoader for element matching selector: \".missing\"".to_string()
                ],
            }
        );
    });
}

#[test]
fn element_locators() {
    let fx = fixture();
    block_on(async {
        let button = fx.loader.element_for("button").await.unwrap();
        assert_eq!(button.text(TextOptions::default()).await.unwrap(), "go");
        assert!(fx.loader.element_for_optional("table").await.unwrap().is_none());
        assert_eq!(fx.loader.element_for_all(".chip").await.unwrap().len(), 3);
    });
}

#[test]
fn document_root_factory_escapes_scope() {
    let fx = fixture();
    block_on(async {
        let list = fx
            .loader
            .get_harness(ChipListHarness::with(BaseHarnessFilters::selector("#featured")))
            .await
            .unwrap();
        let root = list.locator_factory().document_root_locator_factory();
        let everything = root
            .get_all_harnesses(ChipHarness::predicate())
            .await
            .unwrap();
        assert_eq!(everything.len(), 3);
    });
}

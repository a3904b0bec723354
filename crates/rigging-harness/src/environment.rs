#![forbid(unsafe_code)]

//! Locator factories and harness loaders over a pluggable backend.
//!
//! # Design
//!
//! [`HarnessEnvironment`] is the rendering-independent half of an
//! environment: it turns locator queries into one combined selector, asks
//! the backend for candidates, evaluates each candidate against every query
//! and keeps at most one element result and one harness result per
//! candidate. The rendering-specific half ([`EnvironmentBackend`]) only has
//! to answer raw selector queries, wrap nodes as [`TestElement`]s and settle
//! its fixture.
//!
//! The same value serves as [`LocatorFactory`] (used from inside harnesses)
//! and [`HarnessLoader`] (used from tests).
//!
//! [`TestElement`]: crate::test_element::TestElement

use std::fmt;
use std::rc::Rc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, trace};

use crate::error::{HarnessError, Result};
use crate::harness::{ComponentHarness, HarnessPredicate};
use crate::test_element::TestElementRef;

/// Rendering-specific operations an environment needs.
#[async_trait(?Send)]
pub trait EnvironmentBackend {
    /// Element this environment is rooted at.
    fn root_element(&self) -> TestElementRef;

    /// Environment rooted at the document root.
    fn document_root(&self) -> Rc<dyn EnvironmentBackend>;

    /// Stabilize, then return every descendant of the root matching
    /// `selector`, in document order.
    async fn query_all(&self, selector: &str) -> Result<Vec<ScopedElement>>;

    /// Settle the fixture this environment belongs to.
    async fn force_stabilize(&self) -> Result<()>;

    /// Wait for work scheduled outside the application zone.
    async fn wait_for_tasks_outside(&self) -> Result<()>;
}

/// A raw query result: the element and the environment rooted at it.
#[derive(Clone)]
pub struct ScopedElement {
    /// Stable identity of the underlying node.
    pub key: u64,
    /// The element itself.
    pub element: TestElementRef,
    /// Environment rooted at the element.
    pub environment: Rc<dyn EnvironmentBackend>,
}

impl fmt::Debug for ScopedElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedElement")
            .field("key", &self.key)
            .field("element", &self.element)
            .finish()
    }
}

/// One query passed to [`HarnessEnvironment::locate_all`].
pub enum LocatorQuery<H> {
    /// Plain selector; matches yield test elements.
    Selector(String),
    /// Harness predicate; matches yield harness instances.
    Harness(HarnessPredicate<H>),
}

impl<H> From<&str> for LocatorQuery<H> {
    fn from(selector: &str) -> Self {
        Self::Selector(selector.to_string())
    }
}

impl<H> From<String> for LocatorQuery<H> {
    fn from(selector: String) -> Self {
        Self::Selector(selector)
    }
}

impl<H> From<HarnessPredicate<H>> for LocatorQuery<H> {
    fn from(predicate: HarnessPredicate<H>) -> Self {
        Self::Harness(predicate)
    }
}

impl<H: ComponentHarness> LocatorQuery<H> {
    fn description(&self) -> String {
        match self {
            Self::Selector(selector) => element_query_description(selector),
            Self::Harness(predicate) => predicate.query_description(),
        }
    }
}

/// Result of a mixed query.
pub enum Located<H> {
    /// Matched a selector query.
    Element(TestElementRef),
    /// Matched a harness query.
    Harness(H),
}

impl<H> Located<H> {
    /// The harness, if this result is one.
    pub fn into_harness(self) -> Option<H> {
        match self {
            Self::Harness(harness) => Some(harness),
            Self::Element(_) => None,
        }
    }

    /// The element, if this result is one.
    pub fn into_element(self) -> Option<TestElementRef> {
        match self {
            Self::Element(element) => Some(element),
            Self::Harness(_) => None,
        }
    }
}

impl<H: fmt::Debug> fmt::Debug for Located<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Element(element) => f.debug_tuple("Element").field(element).finish(),
            Self::Harness(harness) => f.debug_tuple("Harness").field(harness).finish(),
        }
    }
}

fn element_query_description(selector: &str) -> String {
    format!("TestElement for element matching selector: \"{selector}\"")
}

fn loader_query_description(selector: &str) -> String {
    format!("HarnessLoader for element matching selector: \"{selector}\"")
}

/// Environment rooted at one element.
#[derive(Clone)]
pub struct HarnessEnvironment {
    backend: Rc<dyn EnvironmentBackend>,
}

/// Environment as seen from inside a harness.
pub type LocatorFactory = HarnessEnvironment;

/// Environment as seen from a test.
pub type HarnessLoader = HarnessEnvironment;

impl fmt::Debug for HarnessEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarnessEnvironment")
            .field("root", &self.backend.root_element())
            .finish()
    }
}

impl HarnessEnvironment {
    /// Wrap a backend.
    #[must_use]
    pub fn new(backend: Rc<dyn EnvironmentBackend>) -> Self {
        Self { backend }
    }

    /// The backend this environment delegates to.
    #[must_use]
    pub fn backend(&self) -> &Rc<dyn EnvironmentBackend> {
        &self.backend
    }

    /// Build a harness of type `H` rooted at this environment's root.
    #[must_use]
    pub fn harness<H: ComponentHarness>(&self) -> H {
        H::new(self.clone())
    }

    /// Root element.
    #[must_use]
    pub fn root_element(&self) -> TestElementRef {
        self.backend.root_element()
    }

    /// Locator factory rooted at the document root.
    #[must_use]
    pub fn document_root_locator_factory(&self) -> LocatorFactory {
        Self::new(self.backend.document_root())
    }

    /// Settle the fixture.
    pub async fn force_stabilize(&self) -> Result<()> {
        self.backend.force_stabilize().await
    }

    /// Wait for work scheduled outside the application zone.
    pub async fn wait_for_tasks_outside(&self) -> Result<()> {
        self.backend.wait_for_tasks_outside().await
    }

    // ---- Locators --------------------------------------------------------

    /// First harness matching `predicate`, or `NotFound`.
    pub async fn locator_for<H: ComponentHarness>(
        &self,
        predicate: HarnessPredicate<H>,
    ) -> Result<H> {
        let description = predicate.query_description();
        self.locator_for_optional(predicate)
            .await?
            .ok_or_else(|| HarnessError::NotFound {
                queries: vec![description],
            })
    }

    /// First harness matching `predicate`, if any.
    pub async fn locator_for_optional<H: ComponentHarness>(
        &self,
        predicate: HarnessPredicate<H>,
    ) -> Result<Option<H>> {
        Ok(self.locator_for_all(predicate).await?.into_iter().next())
    }

    /// Every harness matching `predicate`, in document order.
    pub async fn locator_for_all<H: ComponentHarness>(
        &self,
        predicate: HarnessPredicate<H>,
    ) -> Result<Vec<H>> {
        let found = self
            .locate_all(vec![LocatorQuery::Harness(predicate)])
            .await?;
        Ok(found.into_iter().filter_map(Located::into_harness).collect())
    }

    /// First element matching `selector`, or `NotFound`.
    pub async fn element_for(&self, selector: &str) -> Result<TestElementRef> {
        self.element_for_optional(selector)
            .await?
            .ok_or_else(|| HarnessError::NotFound {
                queries: vec![element_query_description(selector)],
            })
    }

    /// First element matching `selector`, if any.
    pub async fn element_for_optional(&self, selector: &str) -> Result<Option<TestElementRef>> {
        Ok(self.element_for_all(selector).await?.into_iter().next())
    }

    /// Every element matching `selector`, in document order.
    pub async fn element_for_all(&self, selector: &str) -> Result<Vec<TestElementRef>> {
        let found = self.backend.query_all(selector).await?;
        Ok(found.into_iter().map(|scoped| scoped.element).collect())
    }

    /// First result of a mixed query, or `NotFound` listing every query.
    pub async fn locate<H: ComponentHarness>(
        &self,
        queries: Vec<LocatorQuery<H>>,
    ) -> Result<Located<H>> {
        let descriptions: Vec<String> = queries.iter().map(LocatorQuery::description).collect();
        self.locate_all(queries)
            .await?
            .into_iter()
            .next()
            .ok_or(HarnessError::NotFound {
                queries: descriptions,
            })
    }

    /// Every result of a mixed query.
    ///
    /// Results follow document order. A candidate matching several queries
    /// contributes at most one element (the first selector query it
    /// matches) and at most one harness (the first harness query it
    /// satisfies), in query order.
    pub async fn locate_all<H: ComponentHarness>(
        &self,
        queries: Vec<LocatorQuery<H>>,
    ) -> Result<Vec<Located<H>>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        let mut element_selectors = Vec::new();
        let mut harness_selectors = Vec::new();
        let mut resolved = Vec::with_capacity(queries.len());
        for query in queries {
            match query {
                LocatorQuery::Selector(selector) => {
                    element_selectors.push(selector.clone());
                    resolved.push(ResolvedQuery::Element(selector));
                }
                LocatorQuery::Harness(predicate) => {
                    let selector = predicate.selector()?;
                    harness_selectors.push(selector.clone());
                    resolved.push(ResolvedQuery::Harness {
                        selector,
                        predicate,
                    });
                }
            }
        }

        // With a single query every candidate came from its selector.
        let skip_selector_check = resolved.len() == 1;
        let combined = element_selectors
            .iter()
            .chain(harness_selectors.iter())
            .cloned()
            .collect::<Vec<_>>()
            .join(",");
        trace!(selector = %combined, "locate_all");

        let candidates = self.backend.query_all(&combined).await?;
        let resolved = &resolved;
        let per_candidate = join_all(candidates.into_iter().map(|candidate| async move {
            evaluate_candidate(candidate, resolved, skip_selector_check).await
        }))
        .await;

        let mut located = Vec::new();
        for results in per_candidate {
            located.extend(results?);
        }
        debug!(count = located.len(), "locate_all resolved");
        Ok(located)
    }

    // ---- Child loaders ---------------------------------------------------

    /// Loader rooted at the first element matching `selector`.
    pub async fn harness_loader_for(&self, selector: &str) -> Result<HarnessLoader> {
        self.harness_loader_for_optional(selector)
            .await?
            .ok_or_else(|| HarnessError::NotFound {
                queries: vec![loader_query_description(selector)],
            })
    }

    /// Loader rooted at the first element matching `selector`, if any.
    pub async fn harness_loader_for_optional(
        &self,
        selector: &str,
    ) -> Result<Option<HarnessLoader>> {
        Ok(self
            .harness_loader_for_all(selector)
            .await?
            .into_iter()
            .next())
    }

    /// Loaders rooted at every element matching `selector`.
    pub async fn harness_loader_for_all(&self, selector: &str) -> Result<Vec<HarnessLoader>> {
        let found = self.backend.query_all(selector).await?;
        Ok(found
            .into_iter()
            .map(|scoped| Self::new(scoped.environment))
            .collect())
    }

    // ---- Loader surface --------------------------------------------------

    /// Loader rooted at the first element matching `selector`.
    pub async fn get_child_loader(&self, selector: &str) -> Result<HarnessLoader> {
        self.harness_loader_for(selector).await
    }

    /// Loaders rooted at every element matching `selector`.
    pub async fn get_all_child_loaders(&self, selector: &str) -> Result<Vec<HarnessLoader>> {
        self.harness_loader_for_all(selector).await
    }

    /// First matching harness in document order.
    pub async fn get_harness<H: ComponentHarness>(
        &self,
        query: HarnessPredicate<H>,
    ) -> Result<H> {
        self.locator_for(query).await
    }

    /// First matching harness, if any.
    pub async fn get_harness_or_none<H: ComponentHarness>(
        &self,
        query: HarnessPredicate<H>,
    ) -> Result<Option<H>> {
        self.locator_for_optional(query).await
    }

    /// Every matching harness.
    pub async fn get_all_harnesses<H: ComponentHarness>(
        &self,
        query: HarnessPredicate<H>,
    ) -> Result<Vec<H>> {
        self.locator_for_all(query).await
    }

    /// Whether at least one harness matches.
    pub async fn has_harness<H: ComponentHarness>(
        &self,
        query: HarnessPredicate<H>,
    ) -> Result<bool> {
        Ok(self.locator_for_optional(query).await?.is_some())
    }
}

enum ResolvedQuery<H> {
    Element(String),
    Harness {
        selector: String,
        predicate: HarnessPredicate<H>,
    },
}

async fn evaluate_candidate<H: ComponentHarness>(
    candidate: ScopedElement,
    queries: &[ResolvedQuery<H>],
    skip_selector_check: bool,
) -> Result<Vec<Located<H>>> {
    let mut element: Option<(usize, TestElementRef)> = None;
    let mut harness: Option<(usize, H)> = None;
    for (index, query) in queries.iter().enumerate() {
        match query {
            ResolvedQuery::Element(selector) => {
                if element.is_some() {
                    continue;
                }
                if skip_selector_check || candidate.element.matches_selector(selector).await? {
                    element = Some((index, candidate.element.clone()));
                }
            }
            ResolvedQuery::Harness {
                selector,
                predicate,
            } => {
                if harness.is_some() {
                    continue;
                }
                if !skip_selector_check && !candidate.element.matches_selector(selector).await? {
                    continue;
                }
                let instance = H::new(HarnessEnvironment::new(candidate.environment.clone()));
                if predicate.evaluate(instance.clone()).await? {
                    harness = Some((index, instance));
                }
            }
        }
    }
    let mut results: Vec<(usize, Located<H>)> = Vec::with_capacity(2);
    results.extend(element.map(|(i, e)| (i, Located::Element(e))));
    results.extend(harness.map(|(i, h)| (i, Located::Harness(h))));
    results.sort_by_key(|(index, _)| *index);
    Ok(results.into_iter().map(|(_, located)| located).collect())
}

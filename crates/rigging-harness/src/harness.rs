#![forbid(unsafe_code)]

//! Component harnesses and the predicates that select them.

use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::future::{LocalBoxFuture, join_all};
use regex::Regex;
use rigging_core::split_selector_list;

use crate::environment::LocatorFactory;
use crate::error::Result;
use crate::test_element::TestElementRef;

/// Typed façade over the element matched by [`HOST_SELECTOR`].
///
/// Harnesses are cheap handles (they hold a [`LocatorFactory`]), so they are
/// `Clone` and can be moved into predicate futures.
///
/// [`HOST_SELECTOR`]: ComponentHarness::HOST_SELECTOR
pub trait ComponentHarness: Clone + 'static {
    /// Selector identifying the host element of the component.
    const HOST_SELECTOR: &'static str;

    /// Build a harness rooted at the located host element.
    fn new(locator_factory: LocatorFactory) -> Self;

    /// Locator factory rooted at the host element.
    fn locator_factory(&self) -> &LocatorFactory;

    /// Name used in lookup error messages.
    fn harness_name() -> &'static str {
        let full = std::any::type_name::<Self>();
        let without_generics = full.split('<').next().unwrap_or(full);
        without_generics
            .rsplit("::")
            .next()
            .unwrap_or(without_generics)
    }

    /// Predicate matching every instance of this harness.
    #[must_use]
    fn predicate() -> HarnessPredicate<Self> {
        HarnessPredicate::new(BaseHarnessFilters::default())
    }

    /// Predicate constrained by the base filters.
    #[must_use]
    fn with(filters: BaseHarnessFilters) -> HarnessPredicate<Self> {
        HarnessPredicate::new(filters)
    }

    /// Host element.
    fn host(&self) -> TestElementRef {
        self.locator_factory().root_element()
    }
}

/// Filters every harness predicate accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaseHarnessFilters {
    /// Only hosts that also match this selector.
    pub selector: Option<String>,
    /// Only hosts that are descendants of an element matching this selector.
    pub ancestor: Option<String>,
}

impl BaseHarnessFilters {
    /// Filter on an extra host selector.
    #[must_use]
    pub fn selector(selector: impl Into<String>) -> Self {
        Self {
            selector: Some(selector.into()),
            ancestor: None,
        }
    }

    /// Filter on an ancestor selector.
    #[must_use]
    pub fn ancestor(ancestor: impl Into<String>) -> Self {
        Self {
            selector: None,
            ancestor: Some(ancestor.into()),
        }
    }
}

/// Expected text: an exact string or a regular expression.
#[derive(Debug, Clone)]
pub enum TextPattern {
    /// Whole-string equality.
    Exact(String),
    /// Regular expression search.
    Regex(Regex),
}

impl TextPattern {
    /// Whether `value` satisfies the pattern.
    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Exact(expected) => value == expected,
            Self::Regex(regex) => regex.is_match(value),
        }
    }
}

impl fmt::Display for TextPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(text) => write!(f, "{text:?}"),
            Self::Regex(regex) => write!(f, "/{}/", regex.as_str()),
        }
    }
}

impl From<&str> for TextPattern {
    fn from(text: &str) -> Self {
        Self::Exact(text.to_string())
    }
}

impl From<String> for TextPattern {
    fn from(text: String) -> Self {
        Self::Exact(text)
    }
}

impl From<Regex> for TextPattern {
    fn from(regex: Regex) -> Self {
        Self::Regex(regex)
    }
}

type AsyncPredicate<H> = Rc<dyn Fn(H) -> LocalBoxFuture<'static, Result<bool>>>;

/// Constraints a harness instance must satisfy to be returned by a query.
pub struct HarnessPredicate<H> {
    predicates: Vec<AsyncPredicate<H>>,
    descriptions: Vec<String>,
    ancestor: Option<String>,
}

impl<H> Clone for HarnessPredicate<H> {
    fn clone(&self) -> Self {
        Self {
            predicates: self.predicates.clone(),
            descriptions: self.descriptions.clone(),
            ancestor: self.ancestor.clone(),
        }
    }
}

impl<H: ComponentHarness> fmt::Debug for HarnessPredicate<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarnessPredicate")
            .field("harness", &H::harness_name())
            .field("descriptions", &self.descriptions)
            .field("ancestor", &self.ancestor)
            .finish()
    }
}

impl<H: ComponentHarness> Default for HarnessPredicate<H> {
    fn default() -> Self {
        Self::new(BaseHarnessFilters::default())
    }
}

impl<H: ComponentHarness> HarnessPredicate<H> {
    /// Predicate with the base filters applied.
    #[must_use]
    pub fn new(filters: BaseHarnessFilters) -> Self {
        let mut predicate = Self {
            predicates: Vec::new(),
            descriptions: Vec::new(),
            ancestor: filters.ancestor,
        };
        if let Some(selector) = filters.selector {
            let description = format!("host matches selector \"{selector}\"");
            predicate = predicate.add(description, move |harness: H| {
                let selector = selector.clone();
                async move { harness.host().matches_selector(&selector).await }
            });
        }
        predicate
    }

    /// Whether `value` matches `pattern`. A missing value only matches when
    /// there is no pattern.
    #[must_use]
    pub fn string_matches(value: Option<&str>, pattern: Option<&TextPattern>) -> bool {
        match (value, pattern) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(value), Some(pattern)) => pattern.matches(value),
        }
    }

    /// Add an asynchronous predicate.
    #[must_use]
    pub fn add<F, Fut>(mut self, description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(H) -> Fut + 'static,
        Fut: Future<Output = Result<bool>> + 'static,
    {
        self.descriptions.push(description.into());
        self.predicates.push(Rc::new(
            move |harness: H| -> LocalBoxFuture<'static, Result<bool>> {
                Box::pin(predicate(harness))
            },
        ));
        self
    }

    /// Add a predicate parameterized by an option value. Nothing is added
    /// when the option is `None`.
    #[must_use]
    pub fn add_option<V, F, Fut>(self, name: &str, option: Option<V>, predicate: F) -> Self
    where
        V: Clone + fmt::Display + 'static,
        F: Fn(H, V) -> Fut + 'static,
        Fut: Future<Output = Result<bool>> + 'static,
    {
        match option {
            Some(value) => {
                let description = format!("{name} = {value}");
                self.add(description, move |harness| predicate(harness, value.clone()))
            }
            None => self,
        }
    }

    /// Keep the harnesses that satisfy every predicate, in order.
    pub async fn filter(&self, harnesses: Vec<H>) -> Result<Vec<H>> {
        if harnesses.is_empty() {
            return Ok(harnesses);
        }
        let verdicts = join_all(harnesses.iter().cloned().map(|h| self.evaluate(h))).await;
        let mut kept = Vec::with_capacity(harnesses.len());
        for (harness, verdict) in harnesses.into_iter().zip(verdicts) {
            if verdict? {
                kept.push(harness);
            }
        }
        Ok(kept)
    }

    /// Whether `harness` satisfies every predicate.
    pub async fn evaluate(&self, harness: H) -> Result<bool> {
        let results = join_all(self.predicates.iter().map(|p| p(harness.clone()))).await;
        let mut all = true;
        for result in results {
            all &= result?;
        }
        Ok(all)
    }

    /// Human-readable constraint list.
    #[must_use]
    pub fn description(&self) -> String {
        self.descriptions.join(", ")
    }

    /// Selector locating candidate hosts: the host selector, nested under
    /// each ancestor alternative when an ancestor filter is set.
    pub fn selector(&self) -> Result<String> {
        let host = H::HOST_SELECTOR.trim();
        let Some(ancestor) = &self.ancestor else {
            return Ok(host.to_string());
        };
        let ancestors = split_selector_list(ancestor)?;
        let hosts = split_selector_list(host)?;
        let combined: Vec<String> = ancestors
            .iter()
            .flat_map(|a| hosts.iter().map(move |h| format!("{a} {h}")))
            .collect();
        Ok(combined.join(", "))
    }

    /// Query description used in not-found errors.
    #[must_use]
    pub fn query_description(&self) -> String {
        let base = format!(
            "{} with host element matching selector: \"{}\"",
            H::harness_name(),
            H::HOST_SELECTOR
        );
        let constraints = self.description();
        if constraints.is_empty() {
            base
        } else {
            format!("{base} satisfying the constraints: {constraints}")
        }
    }
}

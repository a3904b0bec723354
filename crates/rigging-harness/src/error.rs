#![forbid(unsafe_code)]

//! Harness error type.

use rigging_core::DomError;
use rigging_runtime::RuntimeError;
use thiserror::Error;

/// Failures surfaced by harness, loader, and test element operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HarnessError {
    /// No element matched any of the queries. Each entry describes one
    /// query.
    #[error("Failed to find element matching one of the following queries:\n{}", format_queries(.queries))]
    NotFound { queries: Vec<String> },

    /// Stabilization was requested after the fixture was destroyed.
    #[error("Harness is attempting to use a fixture that has already been destroyed.")]
    FixtureDestroyed,

    /// A test element was handed to an environment that did not create it.
    #[error("This TestElement was not created by the {environment}")]
    ForeignElement { environment: &'static str },

    /// The operation does not apply to the element, or the document
    /// rejected it.
    #[error(transparent)]
    Dom(#[from] DomError),

    /// Scheduler setup or flushing failed.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// A harness predicate could not be evaluated.
    #[error("predicate failed: {0}")]
    Predicate(String),
}

fn format_queries(queries: &[String]) -> String {
    queries
        .iter()
        .map(|q| format!("({q})"))
        .collect::<Vec<_>>()
        .join(",\n")
}

pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_lists_each_query() {
        let err = HarnessError::NotFound {
            queries: vec![
                "TestElement for element matching selector: \"button\"".into(),
                "ChipHarness with host element matching selector: \".chip\"".into(),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Failed to find element matching one of the following queries:\n\
             (TestElement for element matching selector: \"button\"),\n\
             (ChipHarness with host element matching selector: \".chip\")"
        );
    }

    #[test]
    fn dom_errors_pass_through() {
        let err: HarnessError = DomError::Hierarchy("cycle".into()).into();
        assert_eq!(err.to_string(), "hierarchy request error: cycle");
    }
}

#![forbid(unsafe_code)]

//! Per-row hover content visibility.

use std::collections::BTreeMap;

use rigging_core::{Document, NodeId};

/// Visibility of a row's hover content (edit affordances, action buttons).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HoverContentState {
    /// Not rendered.
    #[default]
    Off,
    /// Rendered but visually hidden, reachable by keyboard.
    Focusable,
    /// Rendered and visible.
    On,
}

/// State of every row that is not [`HoverContentState::Off`], keyed by row.
///
/// Ordered so equal maps compare equal regardless of insertion order.
pub type HoverContentMap = BTreeMap<NodeId, HoverContentState>;

/// The rows the hover map is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HoverInputs {
    /// First row that registered hover content.
    pub first: Option<NodeId>,
    /// Last row that registered hover content.
    pub last: Option<NodeId>,
    /// Row being edited or holding focus.
    pub active: Option<NodeId>,
    /// Row under the pointer, after debouncing.
    pub hovered: Option<NodeId>,
}

impl HoverInputs {
    /// Whether every input is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Compute the hover map.
///
/// The first and last rows with hover content and the siblings of the
/// active row are `Focusable`. The active and hovered rows are `On`, which
/// overrides `Focusable`.
#[must_use]
pub fn compute_hover_content_state(document: &Document, inputs: HoverInputs) -> HoverContentMap {
    let mut state = HoverContentMap::new();

    let previous = inputs
        .active
        .and_then(|row| document.previous_element_sibling(row));
    let next = inputs
        .active
        .and_then(|row| document.next_element_sibling(row));
    for row in [inputs.first, inputs.last, previous, next]
        .into_iter()
        .flatten()
    {
        state.insert(row, HoverContentState::Focusable);
    }

    for row in [inputs.active, inputs.hovered].into_iter().flatten() {
        state.insert(row, HoverContentState::On);
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: usize) -> (Document, Vec<NodeId>) {
        let doc = Document::new();
        let table = doc.append_element(doc.body(), "table", &[]).unwrap();
        let rows = (0..rows)
            .map(|_| doc.append_element(table, "tr", &[]).unwrap())
            .collect();
        (doc, rows)
    }

    #[test]
    fn empty_inputs_give_empty_map() {
        let (doc, _) = table(3);
        assert!(HoverInputs::default().is_empty());
        assert!(compute_hover_content_state(&doc, HoverInputs::default()).is_empty());
    }

    #[test]
    fn first_and_last_are_focusable() {
        let (doc, rows) = table(4);
        let state = compute_hover_content_state(
            &doc,
            HoverInputs {
                first: Some(rows[0]),
                last: Some(rows[3]),
                ..HoverInputs::default()
            },
        );
        assert_eq!(state.len(), 2);
        assert_eq!(state[&rows[0]], HoverContentState::Focusable);
        assert_eq!(state[&rows[3]], HoverContentState::Focusable);
    }

    #[test]
    fn active_row_siblings_are_focusable() {
        let (doc, rows) = table(5);
        let state = compute_hover_content_state(
            &doc,
            HoverInputs {
                active: Some(rows[2]),
                ..HoverInputs::default()
            },
        );
        assert_eq!(state[&rows[1]], HoverContentState::Focusable);
        assert_eq!(state[&rows[2]], HoverContentState::On);
        assert_eq!(state[&rows[3]], HoverContentState::Focusable);
        assert!(!state.contains_key(&rows[0]));
    }

    #[test]
    fn on_overrides_focusable() {
        let (doc, rows) = table(3);
        let state = compute_hover_content_state(
            &doc,
            HoverInputs {
                first: Some(rows[0]),
                last: Some(rows[2]),
                active: Some(rows[1]),
                hovered: Some(rows[0]),
            },
        );
        assert_eq!(state[&rows[0]], HoverContentState::On);
        assert_eq!(state[&rows[1]], HoverContentState::On);
        assert_eq!(state[&rows[2]], HoverContentState::Focusable);
    }
}

//! Property tests for hover content reference counting.

use std::collections::HashMap;

use proptest::prelude::*;
use rigging_core::{Document, NodeId};
use rigging_popover_edit::{EditEventDispatcher, HoverContentState};
use rigging_runtime::{EventLoop, Zone, ZoneSpec};

const ROWS: usize = 6;

#[derive(Debug, Clone, Copy)]
enum Op {
    Register(usize),
    Deregister(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..ROWS).prop_map(Op::Register),
        (0..ROWS).prop_map(Op::Deregister),
    ]
}

fn table() -> (EventLoop, EditEventDispatcher, Vec<NodeId>) {
    let event_loop = EventLoop::virtual_time();
    let zone = Zone::root(&event_loop).fork(ZoneSpec::new("table"));
    let doc = Document::new();
    let table = doc.append_element(doc.body(), "table", &[]).unwrap();
    let rows = (0..ROWS)
        .map(|_| doc.append_element(table, "tr", &[]).unwrap())
        .collect();
    let dispatcher = EditEventDispatcher::with_defaults(doc, zone).unwrap();
    (event_loop, dispatcher, rows)
}

proptest! {
    #[test]
    fn counts_match_a_model(ops in prop::collection::vec(op(), 0..64)) {
        let (_event_loop, d, rows) = table();
        let mut model: HashMap<usize, usize> = HashMap::new();

        for op in ops {
            match op {
                Op::Register(i) => {
                    d.register_row_with_hover_content(rows[i]);
                    *model.entry(i).or_insert(0) += 1;
                }
                Op::Deregister(i) => {
                    d.deregister_row_with_hover_content(rows[i]);
                    if let Some(count) = model.get_mut(&i) {
                        *count -= 1;
                        if *count == 0 {
                            model.remove(&i);
                        }
                    }
                }
            }
        }

        for (i, row) in rows.iter().enumerate() {
            let expected = model.get(&i).copied().unwrap_or(0);
            prop_assert_eq!(d.hover_content_count(*row), expected);
            prop_assert_eq!(d.has_hover_content(*row), expected > 0);
        }

        d.all_rows().emit(rows.clone());
        let map = d.hover_content().get();
        let first = (0..ROWS).find(|i| model.contains_key(i));
        let last = (0..ROWS).rev().find(|i| model.contains_key(i));
        match (first, last) {
            (Some(first), Some(last)) => {
                prop_assert_eq!(map.get(&rows[first]), Some(&HoverContentState::Focusable));
                prop_assert_eq!(map.get(&rows[last]), Some(&HoverContentState::Focusable));
                prop_assert_eq!(map.len(), if first == last { 1 } else { 2 });
            }
            _ => prop_assert!(map.is_empty()),
        }
    }
}

#![forbid(unsafe_code)]

//! DOM listeners that feed a dispatcher from one table element.
//!
//! | Event on the table | Sink |
//! |--------------------|------|
//! | `mouseover`        | `hovering` ← row of the target |
//! | `mouseleave`       | `hovering` ← `None` |
//! | `mousemove`        | `mouse_move` ← row of the target |
//! | `focusin`          | `focused` ← row of the target |
//! | `focusout`         | `focused` ← `None` |
//!
//! Listeners capture the sinks only and never keep the dispatcher alive.

use rigging_core::{Document, DomEvent, ListenerId, NodeId, SelectorList};
use tracing::{debug, trace};

use crate::dispatcher::EditEventDispatcher;

/// Listeners attached to a table. Dropping detaches them.
#[derive(Debug)]
pub struct TableEvents {
    document: Document,
    table: NodeId,
    dispatcher: EditEventDispatcher,
    rows: SelectorList,
    listeners: Vec<ListenerId>,
}

fn row_of(document: &Document, rows: &SelectorList, event: &DomEvent) -> Option<NodeId> {
    event
        .target()
        .and_then(|target| document.closest_with(target, rows))
}

impl TableEvents {
    /// Attach listeners to `table` and publish its current rows.
    ///
    /// # Errors
    ///
    /// Fails when `table` is not an element of the dispatcher's document.
    pub fn attach(dispatcher: &EditEventDispatcher, table: NodeId) -> rigging_core::Result<Self> {
        let document = dispatcher.document().clone();
        let rows = SelectorList::parse(&dispatcher.config().row_selector)?;
        let mut listeners = Vec::with_capacity(5);

        let (hovering, sink_rows) = (dispatcher.hovering().clone(), rows.clone());
        listeners.push(
            document.add_event_listener(table, "mouseover", move |doc, event| {
                hovering.set(row_of(doc, &sink_rows, event));
            })?,
        );

        let hovering = dispatcher.hovering().clone();
        listeners.push(
            document.add_event_listener(table, "mouseleave", move |_, _| hovering.set(None))?,
        );

        let (mouse_move, sink_rows) = (dispatcher.mouse_move().clone(), rows.clone());
        listeners.push(
            document.add_event_listener(table, "mousemove", move |doc, event| {
                mouse_move.emit(row_of(doc, &sink_rows, event));
            })?,
        );

        let (focused, sink_rows) = (dispatcher.focused().clone(), rows.clone());
        listeners.push(
            document.add_event_listener(table, "focusin", move |doc, event| {
                let row = row_of(doc, &sink_rows, event);
                trace!(row = ?row, "focus entered table");
                focused.set(row);
            })?,
        );

        let focused = dispatcher.focused().clone();
        listeners.push(
            document.add_event_listener(table, "focusout", move |_, _| focused.set(None))?,
        );

        let events = Self {
            document,
            table,
            dispatcher: dispatcher.clone(),
            rows,
            listeners,
        };
        events.refresh_rows();
        debug!(%table, "table events attached");
        Ok(events)
    }

    /// The table element.
    #[must_use]
    pub fn table(&self) -> NodeId {
        self.table
    }

    /// Emit the table's rows on `all_rows`. Call after rows are added,
    /// removed or reordered.
    pub fn refresh_rows(&self) {
        let rows = self.document.query_with(self.table, &self.rows);
        trace!(rows = rows.len(), "rows refreshed");
        self.dispatcher.all_rows().emit(rows);
    }
}

impl Drop for TableEvents {
    fn drop(&mut self) {
        for listener in self.listeners.drain(..) {
            if let Err(err) = self.document.remove_event_listener(self.table, listener) {
                debug!(%err, "table listener already gone");
            }
        }
    }
}

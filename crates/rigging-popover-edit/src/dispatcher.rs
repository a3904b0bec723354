#![forbid(unsafe_code)]

//! Per-table edit-event dispatcher.
//!
//! # Design
//!
//! [`EditEventDispatcher`] turns raw table events into per-row hover content
//! state. Raw input arrives through five sinks; everything else is derived:
//!
//! ```text
//! editing ──filter(disabled)──▶ editing_and_enabled ─┐
//! focused ───────────────────────────────────────────┴▶ focused ∥ row(editing)
//!                                                       └─audit(focus_delay)─▶ editing_or_focused ─┐
//! hovering ──audit(debounce of mouse_move on the row, hover_delay)─▶ hovered ───────────────────────┤
//! all_rows ──scan(rows with hover content)─▶ first_row, last_row ───────────────────────────────────┴▶ hover_content
//! ```
//!
//! Every derived value lives in an [`Observable`], so each stage is
//! deduplicated by equality. The raw `editing` sink is a [`LatestStream`]
//! instead: editing the same cell again re-runs the disabled-cell filter.
//! The hover map is recomputed whenever one of its four inputs changes and
//! is published inside the UI zone under a [`BatchScope`]: subscribers see
//! one notification per real change.
//!
//! Audit windows are timers in the timer zone, which defaults to the UI
//! zone's parent. A pending window never holds the UI zone unstable; only
//! the publish enters it. While a window is open, newer values replace the
//! pending one; when the timer fires the latest value is published. A focus
//! change followed by a refocus within the window therefore never exposes
//! the intermediate `None`.
//!
//! # Identity
//!
//! Rows and cells are [`NodeId`]s. Arena ids are never reused, so the
//! disabled-cell set and the hover content reference counts never keep a
//! node alive and never alias a newer node.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use ahash::{AHashMap, AHashSet};
use rigging_core::{Document, NodeId, SelectorList};
use rigging_runtime::{
    BatchScope, Computed, EventStream, LatestStream, Observable, Subscription, TimerId, Zone,
};
use tracing::{debug, info_span, trace};
use web_time::Instant;

use crate::hover_state::{
    HoverContentMap, HoverContentState, HoverInputs, compute_hover_content_state,
};

/// Default quiescence window before a hovered row shows its content.
pub const DEFAULT_HOVER_DELAY: Duration = Duration::from_millis(40);

/// Default audit window for focus changes.
pub const DEFAULT_FOCUS_DELAY: Duration = Duration::ZERO;

/// Default selector identifying table rows.
pub const DEFAULT_ROW_SELECTOR: &str = ".table-row, tr";

/// Default selector identifying table cells.
pub const DEFAULT_CELL_SELECTOR: &str = ".table-cell, td";

/// Dispatcher timing and table structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// How long the pointer must rest on a row before it counts as hovered.
    pub hover_delay: Duration,
    /// Audit window for the focused-or-editing row.
    pub focus_delay: Duration,
    /// Selector for rows.
    pub row_selector: String,
    /// Selector for cells.
    pub cell_selector: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            hover_delay: DEFAULT_HOVER_DELAY,
            focus_delay: DEFAULT_FOCUS_DELAY,
            row_selector: DEFAULT_ROW_SELECTOR.to_string(),
            cell_selector: DEFAULT_CELL_SELECTOR.to_string(),
        }
    }
}

impl DispatcherConfig {
    /// Set the hover quiescence window.
    #[must_use]
    pub fn with_hover_delay(mut self, delay: Duration) -> Self {
        self.hover_delay = delay;
        self
    }

    /// Set the focus audit window.
    #[must_use]
    pub fn with_focus_delay(mut self, delay: Duration) -> Self {
        self.focus_delay = delay;
        self
    }

    /// Set the row selector.
    #[must_use]
    pub fn with_row_selector(mut self, selector: impl Into<String>) -> Self {
        self.row_selector = selector.into();
        self
    }

    /// Set the cell selector.
    #[must_use]
    pub fn with_cell_selector(mut self, selector: impl Into<String>) -> Self {
        self.cell_selector = selector.into();
        self
    }
}

/// An edit session the dispatcher can reach while it is active.
pub trait ActiveEdit {
    /// Tell the session focus has left it.
    fn blur(&self);

    /// Whether the session's form currently validates.
    fn is_valid(&self) -> bool;
}

/// Shared handle to an active edit session.
pub type ActiveEditRef = Rc<dyn ActiveEdit>;

type Row = Option<NodeId>;

struct HoverAudit {
    row: Option<NodeId>,
    timer: TimerId,
}

struct DispatcherInner {
    config: DispatcherConfig,
    document: Document,
    zone: Zone,
    timer_zone: Zone,
    rows: SelectorList,
    cells: SelectorList,

    editing: LatestStream<Option<NodeId>>,
    hovering: Observable<Option<NodeId>>,
    focused: Observable<Option<NodeId>>,
    all_rows: EventStream<Vec<NodeId>>,
    mouse_move: EventStream<Option<NodeId>>,

    editing_and_enabled: Observable<Option<NodeId>>,
    focus_candidate: Observable<Option<NodeId>>,
    editing_or_focused: Observable<Option<NodeId>>,
    hovered: Observable<Option<NodeId>>,
    first_row: Observable<Option<NodeId>>,
    last_row: Observable<Option<NodeId>>,
    hover_content: Observable<HoverContentMap>,

    disabled_cells: RefCell<AHashSet<NodeId>>,
    rows_with_hover_content: RefCell<AHashMap<NodeId, usize>>,
    active_edit: RefCell<Option<ActiveEditRef>>,
    last_seen_row: RefCell<Option<(NodeId, Computed<HoverContentState>)>>,
    focus_audit: RefCell<Option<TimerId>>,
    hover_audit: RefCell<Option<HoverAudit>>,
    subscriptions: RefCell<Vec<Subscription>>,
}

/// Delegated event dispatcher for one editable table.
///
/// Cloning creates another handle to the **same** dispatcher.
#[derive(Clone)]
pub struct EditEventDispatcher {
    inner: Rc<DispatcherInner>,
}

impl fmt::Debug for EditEventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditEventDispatcher")
            .field("config", &self.inner.config)
            .field("editing", &self.inner.editing.get())
            .field("hover_content", &self.inner.hover_content.get())
            .finish_non_exhaustive()
    }
}

impl EditEventDispatcher {
    /// Dispatcher for a table in `document`, publishing in `zone` and
    /// scheduling its timers in the parent of `zone`. A root zone schedules
    /// its own timers.
    ///
    /// # Errors
    ///
    /// Fails when the row or cell selector does not parse.
    pub fn new(
        document: Document,
        zone: Zone,
        config: DispatcherConfig,
    ) -> rigging_core::Result<Self> {
        let timer_zone = zone.parent().cloned().unwrap_or_else(|| zone.clone());
        Self::with_zones(document, zone, timer_zone, config)
    }

    /// Dispatcher publishing in `ui_zone` and scheduling its audit timers in
    /// `timer_zone`.
    ///
    /// # Errors
    ///
    /// Fails when the row or cell selector does not parse.
    pub fn with_zones(
        document: Document,
        ui_zone: Zone,
        timer_zone: Zone,
        config: DispatcherConfig,
    ) -> rigging_core::Result<Self> {
        let rows = SelectorList::parse(&config.row_selector)?;
        let cells = SelectorList::parse(&config.cell_selector)?;
        let inner = Rc::new(DispatcherInner {
            config,
            document,
            zone: ui_zone,
            timer_zone,
            rows,
            cells,
            editing: LatestStream::new(None),
            hovering: Observable::new(None),
            focused: Observable::new(None),
            all_rows: EventStream::new(),
            mouse_move: EventStream::new(),
            editing_and_enabled: Observable::new(None),
            focus_candidate: Observable::new(None),
            editing_or_focused: Observable::new(None),
            hovered: Observable::new(None),
            first_row: Observable::new(None),
            last_row: Observable::new(None),
            hover_content: Observable::new(HoverContentMap::new()),
            disabled_cells: RefCell::new(AHashSet::new()),
            rows_with_hover_content: RefCell::new(AHashMap::new()),
            active_edit: RefCell::new(None),
            last_seen_row: RefCell::new(None),
            focus_audit: RefCell::new(None),
            hover_audit: RefCell::new(None),
            subscriptions: RefCell::new(Vec::new()),
        });
        inner.wire();
        debug!(
            zone = inner.zone.name(),
            timer_zone = inner.timer_zone.name(),
            hover_delay_ms = inner.config.hover_delay.as_millis() as u64,
            focus_delay_ms = inner.config.focus_delay.as_millis() as u64,
            "edit event dispatcher created"
        );
        Ok(Self { inner })
    }

    /// Dispatcher with [`DispatcherConfig::default`].
    pub fn with_defaults(document: Document, zone: Zone) -> rigging_core::Result<Self> {
        Self::new(document, zone, DispatcherConfig::default())
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    /// Document the table lives in.
    #[must_use]
    pub fn document(&self) -> &Document {
        &self.inner.document
    }

    /// Zone hover content is published in.
    #[must_use]
    pub fn zone(&self) -> &Zone {
        &self.inner.zone
    }

    /// Zone the focus and hover audit timers run in.
    #[must_use]
    pub fn timer_zone(&self) -> &Zone {
        &self.inner.timer_zone
    }

    // ── Sinks ────────────────────────────────────────────────────────────

    /// Cell being edited, or `None`. Every set is delivered, repeats
    /// included.
    #[must_use]
    pub fn editing(&self) -> &LatestStream<Option<NodeId>> {
        &self.inner.editing
    }

    /// Row under the pointer, or `None`.
    #[must_use]
    pub fn hovering(&self) -> &Observable<Option<NodeId>> {
        &self.inner.hovering
    }

    /// Row containing focus, or `None`.
    #[must_use]
    pub fn focused(&self) -> &Observable<Option<NodeId>> {
        &self.inner.focused
    }

    /// Every row of the table, emitted whenever the rows are re-rendered.
    #[must_use]
    pub fn all_rows(&self) -> &EventStream<Vec<NodeId>> {
        &self.inner.all_rows
    }

    /// Row the pointer moved within. Repeated values are meaningful.
    #[must_use]
    pub fn mouse_move(&self) -> &EventStream<Option<NodeId>> {
        &self.inner.mouse_move
    }

    // ── Sources ──────────────────────────────────────────────────────────

    /// Editing cell, ignoring cells marked disabled.
    #[must_use]
    pub fn editing_and_enabled(&self) -> &Observable<Option<NodeId>> {
        &self.inner.editing_and_enabled
    }

    /// Focused row, else the row of the editing cell, after the focus audit.
    #[must_use]
    pub fn editing_or_focused(&self) -> &Observable<Option<NodeId>> {
        &self.inner.editing_or_focused
    }

    /// Hovered row after the pointer has rested on it.
    #[must_use]
    pub fn hovered(&self) -> &Observable<Option<NodeId>> {
        &self.inner.hovered
    }

    /// Hover content state of every non-`Off` row.
    #[must_use]
    pub fn hover_content(&self) -> &Observable<HoverContentMap> {
        &self.inner.hover_content
    }

    /// Hover content state of one row.
    ///
    /// The projection for the most recently requested row is cached;
    /// asking for the same row again returns the same handle.
    pub fn hover_or_focus_on_row(&self, row: NodeId) -> Computed<HoverContentState> {
        let mut memo = self.inner.last_seen_row.borrow_mut();
        match memo.as_ref() {
            Some((seen, projection)) if *seen == row => projection.clone(),
            _ => {
                let projection = self
                    .inner
                    .hover_content
                    .map(move |state| state.get(&row).copied().unwrap_or_default());
                *memo = Some((row, projection.clone()));
                projection
            }
        }
    }

    // ── Hover content registration ──────────────────────────────────────

    /// Count one more piece of hover content on `row`.
    pub fn register_row_with_hover_content(&self, row: NodeId) {
        let mut counts = self.inner.rows_with_hover_content.borrow_mut();
        let count = counts.entry(row).or_insert(0);
        *count += 1;
        trace!(%row, count = *count, "hover content registered");
    }

    /// Release one piece of hover content on `row`. Unknown rows are
    /// ignored.
    pub fn deregister_row_with_hover_content(&self, row: NodeId) {
        let mut counts = self.inner.rows_with_hover_content.borrow_mut();
        let Some(count) = counts.get_mut(&row) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            counts.remove(&row);
        }
        trace!(%row, "hover content deregistered");
    }

    /// Whether `row` has registered hover content.
    #[must_use]
    pub fn has_hover_content(&self, row: NodeId) -> bool {
        self.inner.rows_with_hover_content.borrow().contains_key(&row)
    }

    /// Registrations outstanding for `row`.
    #[must_use]
    pub fn hover_content_count(&self, row: NodeId) -> usize {
        self.inner
            .rows_with_hover_content
            .borrow()
            .get(&row)
            .copied()
            .unwrap_or(0)
    }

    // ── Disabled cells ──────────────────────────────────────────────────

    /// Mark `cell` as disabled or enabled for editing.
    pub fn set_cell_disabled(&self, cell: NodeId, disabled: bool) {
        let mut cells = self.inner.disabled_cells.borrow_mut();
        if disabled {
            cells.insert(cell);
        } else {
            cells.remove(&cell);
        }
    }

    /// Whether `cell` is disabled.
    #[must_use]
    pub fn is_cell_disabled(&self, cell: NodeId) -> bool {
        self.inner.disabled_cells.borrow().contains(&cell)
    }

    // ── Active edit ─────────────────────────────────────────────────────

    /// Make `edit` the active session, replacing any other.
    pub fn set_active_edit_ref(&self, edit: ActiveEditRef) {
        *self.inner.active_edit.borrow_mut() = Some(edit);
    }

    /// Clear the active session if it is `edit`; otherwise do nothing.
    pub fn unset_active_edit_ref(&self, edit: &ActiveEditRef) {
        let mut active = self.inner.active_edit.borrow_mut();
        if active.as_ref().is_some_and(|current| same_edit(current, edit)) {
            *active = None;
        }
    }

    /// The active session.
    #[must_use]
    pub fn active_edit_ref(&self) -> Option<ActiveEditRef> {
        self.inner.active_edit.borrow().clone()
    }

    // ── Cells ───────────────────────────────────────────────────────────

    /// Row containing `node`, inclusive.
    #[must_use]
    pub fn row_of(&self, node: NodeId) -> Option<NodeId> {
        self.inner.row_of(node)
    }

    /// Cell containing `node`, inclusive.
    #[must_use]
    pub fn cell_of(&self, node: NodeId) -> Option<NodeId> {
        self.inner.document.closest_with(node, &self.inner.cells)
    }

    /// Whether the cell containing `element` is being edited.
    ///
    /// The cell is resolved once, here. Elements outside any cell are never
    /// editing.
    pub fn editing_cell(&self, element: NodeId) -> Computed<bool> {
        let cell = self.cell_of(element);
        self.inner
            .editing_and_enabled
            .map(move |editing| cell.is_some() && *editing == cell)
    }

    /// Stop editing if the cell containing `element` is the editing cell.
    pub fn done_editing_cell(&self, element: NodeId) {
        let cell = self.cell_of(element);
        if cell.is_some() && self.inner.editing_and_enabled.get() == cell {
            debug!(cell = ?cell, "done editing");
            self.inner.editing.set(None);
        }
    }

    /// Whether both handles refer to the same dispatcher.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakDispatcher {
        WeakDispatcher {
            inner: Rc::downgrade(&self.inner),
        }
    }
}

/// Non-owning dispatcher handle held by edit sessions.
#[derive(Clone)]
pub(crate) struct WeakDispatcher {
    inner: Weak<DispatcherInner>,
}

impl WeakDispatcher {
    pub(crate) fn upgrade(&self) -> Option<EditEventDispatcher> {
        self.inner.upgrade().map(|inner| EditEventDispatcher { inner })
    }
}

fn same_edit(a: &ActiveEditRef, b: &ActiveEditRef) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

impl DispatcherInner {
    fn wire(self: &Rc<Self>) {
        let subscriptions = vec![
            self.editing
                .subscribe(self.listen(|this, cell: &Row| this.filter_editing(*cell))),
            self.editing_and_enabled
                .subscribe(self.listen(|this, _: &Row| this.update_focus_candidate())),
            self.focused
                .subscribe(self.listen(|this, _: &Row| this.update_focus_candidate())),
            self.focus_candidate
                .subscribe(self.listen(|this, _: &Row| this.open_focus_audit())),
            self.hovering
                .subscribe(self.listen(|this, row: &Row| this.open_hover_audit(*row))),
            self.mouse_move
                .subscribe(self.listen(|this, row: &Row| this.extend_hover_audit(*row))),
            self.all_rows
                .subscribe(self.listen(|this, rows: &Vec<NodeId>| this.scan_rows(rows))),
            self.first_row
                .subscribe(self.listen(|this, _: &Row| this.publish_hover_content())),
            self.last_row
                .subscribe(self.listen(|this, _: &Row| this.publish_hover_content())),
            self.editing_or_focused
                .subscribe(self.listen(|this, _: &Row| this.publish_hover_content())),
            self.hovered
                .subscribe(self.listen(|this, _: &Row| this.publish_hover_content())),
        ];
        *self.subscriptions.borrow_mut() = subscriptions;
    }

    fn listen<T: 'static>(
        self: &Rc<Self>,
        f: impl Fn(&Rc<Self>, &T) + 'static,
    ) -> impl Fn(&T) + 'static {
        let weak = Rc::downgrade(self);
        move |value| {
            if let Some(this) = weak.upgrade() {
                f(&this, value);
            }
        }
    }

    fn weak(self: &Rc<Self>) -> Weak<Self> {
        Rc::downgrade(self)
    }

    fn row_of(&self, node: NodeId) -> Option<NodeId> {
        self.document.closest_with(node, &self.rows)
    }

    fn filter_editing(&self, cell: Option<NodeId>) {
        let enabled = cell.is_none_or(|cell| !self.disabled_cells.borrow().contains(&cell));
        if enabled {
            self.editing_and_enabled.set(cell);
        } else {
            trace!(cell = ?cell, "editing a disabled cell ignored");
        }
    }

    fn update_focus_candidate(&self) {
        let editing_row = self
            .editing_and_enabled
            .get()
            .and_then(|cell| self.row_of(cell));
        self.focus_candidate.set(self.focused.get().or(editing_row));
    }

    fn open_focus_audit(self: &Rc<Self>) {
        if self.focus_audit.borrow().is_some() {
            return;
        }
        let weak = self.weak();
        let timer = self.timer_zone.set_timeout(self.config.focus_delay, move || {
            if let Some(this) = weak.upgrade() {
                this.focus_audit.borrow_mut().take();
                let row = this.focus_candidate.get();
                trace!(row = ?row, "focus audit elapsed");
                this.editing_or_focused.set(row);
            }
        });
        *self.focus_audit.borrow_mut() = Some(timer);
    }

    fn schedule_hover_flush(self: &Rc<Self>) -> TimerId {
        let weak = self.weak();
        self.timer_zone.set_timeout(self.config.hover_delay, move || {
            if let Some(this) = weak.upgrade() {
                this.hover_audit.borrow_mut().take();
                let row = this.hovering.get();
                trace!(row = ?row, "hover settled");
                this.hovered.set(row);
            }
        })
    }

    fn open_hover_audit(self: &Rc<Self>, row: Option<NodeId>) {
        if self.hover_audit.borrow().is_some() {
            return;
        }
        let timer = self.schedule_hover_flush();
        *self.hover_audit.borrow_mut() = Some(HoverAudit { row, timer });
    }

    /// Movement on the row that opened the audit window restarts its timer.
    fn extend_hover_audit(self: &Rc<Self>, row: Option<NodeId>) {
        let previous = self
            .hover_audit
            .borrow()
            .as_ref()
            .filter(|audit| audit.row == row)
            .map(|audit| audit.timer);
        let Some(previous) = previous else {
            return;
        };
        // Schedule before cancelling so the zone never looks idle in between.
        let timer = self.schedule_hover_flush();
        self.timer_zone.clear_timeout(previous);
        if let Some(audit) = self.hover_audit.borrow_mut().as_mut() {
            audit.timer = timer;
        }
    }

    fn scan_rows(&self, rows: &[NodeId]) {
        let (first, last) = {
            let counts = self.rows_with_hover_content.borrow();
            (
                rows.iter().copied().find(|row| counts.contains_key(row)),
                rows.iter().rev().copied().find(|row| counts.contains_key(row)),
            )
        };
        let _batch = BatchScope::new();
        self.first_row.set(first);
        self.last_row.set(last);
    }

    fn publish_hover_content(&self) {
        let inputs = HoverInputs {
            first: self.first_row.get(),
            last: self.last_row.get(),
            active: self.editing_or_focused.get(),
            hovered: self.hovered.get(),
        };
        let start = Instant::now();
        let state = compute_hover_content_state(&self.document, inputs);
        if self.hover_content.with(|current| *current == state) {
            return;
        }
        let span = info_span!("popover_edit.hover_content", rows = state.len());
        let _entered = span.enter();
        self.zone.run(|| {
            let _batch = BatchScope::new();
            self.hover_content.set(state);
        });
        debug!(
            elapsed_us = start.elapsed().as_micros() as u64,
            version = self.hover_content.version(),
            "hover content recomputed"
        );
    }
}

impl Drop for DispatcherInner {
    fn drop(&mut self) {
        self.subscriptions.get_mut().clear();
        if let Some(timer) = self.focus_audit.get_mut().take() {
            self.timer_zone.clear_timeout(timer);
        }
        if let Some(audit) = self.hover_audit.get_mut().take() {
            self.timer_zone.clear_timeout(audit.timer);
        }
    }
}

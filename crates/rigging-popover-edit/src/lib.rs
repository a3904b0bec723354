#![forbid(unsafe_code)]

//! Popover edit: per-table event coordination for inline cell editing.
//!
//! # Role in rigging
//! `rigging-popover-edit` decides which rows of an editable table show
//! their hover content and which cell is being edited. It is a consumer of
//! the runtime: debounce windows are timers in a zone outside the table's,
//! and row state is published through observables inside the table's zone.
//!
//! # Key Components
//!
//! - [`EditEventDispatcher`] - sinks for raw table events, derived per-row
//!   [`HoverContentState`], hover content registration and the active edit
//! - [`EditRef`] - one edit session over an [`EditForm`]
//! - [`TableEvents`] - DOM listeners feeding a dispatcher from a table

pub mod delegation;
pub mod dispatcher;
pub mod edit_ref;
pub mod hover_state;

pub use delegation::TableEvents;
pub use dispatcher::{
    ActiveEdit, ActiveEditRef, DEFAULT_CELL_SELECTOR, DEFAULT_FOCUS_DELAY, DEFAULT_HOVER_DELAY,
    DEFAULT_ROW_SELECTOR, DispatcherConfig, EditEventDispatcher,
};
pub use edit_ref::{EditForm, EditRef, FormModel};
pub use hover_state::{HoverContentMap, HoverContentState, HoverInputs, compute_hover_content_state};

#![forbid(unsafe_code)]

//! Core: arena DOM, selector matching, and synthetic events.
//!
//! # Role in rigging
//! `rigging-core` is the node layer. It owns the [`Document`] arena that test
//! fixtures render into, the CSS selector engine used by every locator, and
//! the synthetic [`DomEvent`] values that test elements dispatch.
//!
//! # Primary responsibilities
//! - **Document**: single-threaded node arena with stable, never-reused
//!   [`NodeId`]s, attributes, form state, focus, and event listeners.
//! - **Selectors**: parsing and matching of the selector subset used by
//!   harness queries (`tag`, `#id`, `.class`, attribute operators,
//!   structural pseudo-classes, and the four combinators).
//! - **Events**: mouse, pointer, keyboard, and data-carrying events with
//!   bubbling and propagation control.
//!
//! # How it fits in the system
//! The runtime (`rigging-runtime`) schedules work against a document; the
//! testbed (`rigging-testbed`) drives it through unit test elements; the
//! popover-edit dispatcher resolves rows and cells with [`Document::closest`].

pub mod dom;
pub mod error;
pub mod event;
pub mod geometry;
pub mod key;
pub mod selector;

pub use dom::{Document, ListenerId, NodeId};
pub use error::{DomError, Result};
pub use event::{DomEvent, EventDetail, KeyboardEventInit, Modifiers, MouseEventInit};
pub use geometry::ElementDimensions;
pub use key::TestKey;
pub use selector::{SelectorList, split_selector_list};

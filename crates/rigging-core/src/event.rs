#![forbid(unsafe_code)]

//! Synthetic DOM events.
//!
//! Events are constructed by test elements and dispatched through
//! [`Document::dispatch_event`](crate::Document::dispatch_event). Target,
//! current target, and propagation flags use interior mutability so a single
//! `&DomEvent` can be handed to every listener on the propagation path.
//!
//! # Design Notes
//!
//! - Bubbling defaults follow the platform: `focus`, `blur`, `mouseenter`,
//!   `mouseleave`, `pointerenter`, and `pointerleave` do not bubble.
//! - Client coordinates are integers; fractional coordinates are rounded by
//!   the caller before an event is built.

use std::cell::Cell;

use bitflags::bitflags;
use serde_json::{Map, Value};

use crate::dom::NodeId;

bitflags! {
    /// Modifier keys held while an event is dispatched.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Modifiers: u8 {
        /// No modifiers.
        const NONE    = 0b0000;
        /// Shift key.
        const SHIFT   = 0b0001;
        /// Alt/Option key.
        const ALT     = 0b0010;
        /// Control key.
        const CONTROL = 0b0100;
        /// Meta/Command key.
        const META    = 0b1000;
    }
}

impl Default for Modifiers {
    fn default() -> Self {
        Self::NONE
    }
}

/// Initialization data for mouse and pointer events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MouseEventInit {
    /// Client X coordinate, when the event is positioned.
    pub client_x: Option<i32>,
    /// Client Y coordinate, when the event is positioned.
    pub client_y: Option<i32>,
    /// Button index (0 = primary, 2 = secondary).
    pub button: i16,
    /// Held modifier keys.
    pub modifiers: Modifiers,
}

impl MouseEventInit {
    /// Positioned event at the given client coordinates.
    #[must_use]
    pub const fn at(x: i32, y: i32) -> Self {
        Self {
            client_x: Some(x),
            client_y: Some(y),
            button: 0,
            modifiers: Modifiers::NONE,
        }
    }

    /// Set the button index.
    #[must_use]
    pub const fn with_button(mut self, button: i16) -> Self {
        self.button = button;
        self
    }

    /// Set the held modifiers.
    #[must_use]
    pub const fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }
}

/// Initialization data for keyboard events.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyboardEventInit {
    /// Logical key value (`"a"`, `"Enter"`).
    pub key: String,
    /// Physical key code (`"KeyA"`, `"Enter"`).
    pub code: String,
    /// Legacy numeric key code.
    pub key_code: u32,
    /// Held modifier keys.
    pub modifiers: Modifiers,
}

/// Event payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum EventDetail {
    /// Plain event without extra fields.
    #[default]
    None,
    /// Mouse event.
    Mouse(MouseEventInit),
    /// Pointer event (mouse-compatible fields).
    Pointer(MouseEventInit),
    /// Keyboard event.
    Keyboard(KeyboardEventInit),
    /// Arbitrary data fields merged into a generic event.
    Data(Map<String, Value>),
}

/// A synthetic event travelling through the document.
#[derive(Debug)]
pub struct DomEvent {
    event_type: String,
    bubbles: bool,
    detail: EventDetail,
    target: Cell<Option<NodeId>>,
    current_target: Cell<Option<NodeId>>,
    propagation_stopped: Cell<bool>,
    default_prevented: Cell<bool>,
}

impl DomEvent {
    /// Plain event with the platform bubbling default for its type.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        let event_type = event_type.into();
        let bubbles = bubbles_by_default(&event_type);
        Self {
            event_type,
            bubbles,
            detail: EventDetail::None,
            target: Cell::new(None),
            current_target: Cell::new(None),
            propagation_stopped: Cell::new(false),
            default_prevented: Cell::new(false),
        }
    }

    /// Mouse event.
    #[must_use]
    pub fn mouse(event_type: impl Into<String>, init: MouseEventInit) -> Self {
        Self::new(event_type).with_detail(EventDetail::Mouse(init))
    }

    /// Pointer event.
    #[must_use]
    pub fn pointer(event_type: impl Into<String>, init: MouseEventInit) -> Self {
        Self::new(event_type).with_detail(EventDetail::Pointer(init))
    }

    /// Keyboard event.
    #[must_use]
    pub fn keyboard(event_type: impl Into<String>, init: KeyboardEventInit) -> Self {
        Self::new(event_type).with_detail(EventDetail::Keyboard(init))
    }

    /// Generic event carrying arbitrary data fields.
    #[must_use]
    pub fn with_data(event_type: impl Into<String>, data: Map<String, Value>) -> Self {
        Self::new(event_type).with_detail(EventDetail::Data(data))
    }

    /// Replace the payload.
    #[must_use]
    pub fn with_detail(mut self, detail: EventDetail) -> Self {
        self.detail = detail;
        self
    }

    /// Override the bubbling default.
    #[must_use]
    pub fn with_bubbles(mut self, bubbles: bool) -> Self {
        self.bubbles = bubbles;
        self
    }

    /// Event type name.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Whether the event propagates to ancestors.
    #[must_use]
    pub fn bubbles(&self) -> bool {
        self.bubbles
    }

    /// Event payload.
    #[must_use]
    pub fn detail(&self) -> &EventDetail {
        &self.detail
    }

    /// Mouse or pointer fields, if any.
    #[must_use]
    pub fn mouse_init(&self) -> Option<&MouseEventInit> {
        match &self.detail {
            EventDetail::Mouse(init) | EventDetail::Pointer(init) => Some(init),
            _ => None,
        }
    }

    /// Keyboard fields, if any.
    #[must_use]
    pub fn keyboard_init(&self) -> Option<&KeyboardEventInit> {
        match &self.detail {
            EventDetail::Keyboard(init) => Some(init),
            _ => None,
        }
    }

    /// Look up a data field on a generic event.
    #[must_use]
    pub fn data(&self, key: &str) -> Option<&Value> {
        match &self.detail {
            EventDetail::Data(map) => map.get(key),
            _ => None,
        }
    }

    /// Node the event was dispatched on.
    #[must_use]
    pub fn target(&self) -> Option<NodeId> {
        self.target.get()
    }

    /// Node whose listeners are currently running.
    #[must_use]
    pub fn current_target(&self) -> Option<NodeId> {
        self.current_target.get()
    }

    /// Stop propagation to further ancestors.
    pub fn stop_propagation(&self) {
        self.propagation_stopped.set(true);
    }

    /// Whether propagation was stopped.
    #[must_use]
    pub fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped.get()
    }

    /// Mark the default action as cancelled.
    pub fn prevent_default(&self) {
        self.default_prevented.set(true);
    }

    /// Whether a listener cancelled the default action.
    #[must_use]
    pub fn default_prevented(&self) -> bool {
        self.default_prevented.get()
    }

    pub(crate) fn set_target(&self, target: NodeId) {
        self.target.set(Some(target));
    }

    pub(crate) fn set_current_target(&self, node: Option<NodeId>) {
        self.current_target.set(node);
    }
}

/// Platform bubbling default for an event type.
#[must_use]
pub fn bubbles_by_default(event_type: &str) -> bool {
    !matches!(
        event_type,
        "focus" | "blur" | "mouseenter" | "mouseleave" | "pointerenter" | "pointerleave"
    )
}

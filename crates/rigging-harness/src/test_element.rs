#![forbid(unsafe_code)]

//! The element capability surface harnesses are written against.
//!
//! A [`TestElement`] wraps exactly one live node. Every operation is
//! asynchronous: implementations wait for the UI to settle before reading
//! and after mutating, so harness code never observes half-applied work.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use async_trait::async_trait;
use rigging_core::{ElementDimensions, Modifiers, TestKey};
use serde_json::{Map, Value};

use crate::error::Result;

/// Shared handle to a test element.
pub type TestElementRef = Rc<dyn TestElement>;

/// Where a click lands.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ClickPosition {
    /// No coordinates; the event carries no client position.
    #[default]
    Default,
    /// Center of the element's bounding box, rounded to whole pixels.
    Center,
    /// Offset from the element's top-left corner.
    At(f64, f64),
}

/// Options for [`TestElement::text`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextOptions {
    /// Descendants matching this selector are left out of the text.
    pub exclude: Option<String>,
}

impl TextOptions {
    /// Exclude descendants matching `selector`.
    #[must_use]
    pub fn excluding(selector: impl Into<String>) -> Self {
        Self {
            exclude: Some(selector.into()),
        }
    }
}

/// One unit of keyboard input for [`TestElement::send_keys`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyInput {
    /// Printable characters, typed one at a time.
    Text(String),
    /// A special key.
    Key(TestKey),
}

impl From<&str> for KeyInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for KeyInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<TestKey> for KeyInput {
    fn from(key: TestKey) -> Self {
        Self::Key(key)
    }
}

impl From<char> for KeyInput {
    fn from(ch: char) -> Self {
        Self::Text(ch.to_string())
    }
}

/// Capability interface for one node, independent of how it is rendered.
#[async_trait(?Send)]
pub trait TestElement: fmt::Debug {
    /// Blur the element.
    async fn blur(&self) -> Result<()>;

    /// Clear a text input or textarea.
    async fn clear(&self) -> Result<()>;

    /// Click the element.
    async fn click(&self, position: ClickPosition, modifiers: Modifiers) -> Result<()>;

    /// Secondary-button click.
    async fn right_click(&self, position: ClickPosition, modifiers: Modifiers) -> Result<()>;

    /// Focus the element.
    async fn focus(&self) -> Result<()>;

    /// Computed value of a style property.
    async fn get_css_value(&self, property: &str) -> Result<String>;

    /// Move the pointer over the element.
    async fn hover(&self) -> Result<()>;

    /// Move the pointer off the element.
    async fn mouse_away(&self) -> Result<()>;

    /// Type keys into the element, focusing it first.
    async fn send_keys(&self, modifiers: Modifiers, keys: &[KeyInput]) -> Result<()>;

    /// Text content, optionally excluding some descendants.
    async fn text(&self, options: TextOptions) -> Result<String>;

    /// Attribute value.
    async fn get_attribute(&self, name: &str) -> Result<Option<String>>;

    /// Whether the element has a class.
    async fn has_class(&self, name: &str) -> Result<bool>;

    /// Bounding box.
    async fn get_dimensions(&self) -> Result<ElementDimensions>;

    /// Property value.
    async fn get_property(&self, name: &str) -> Result<Value>;

    /// Set the value property without simulating typing.
    async fn set_input_value(&self, value: &str) -> Result<()>;

    /// Select the options at the given indexes of a `<select>`.
    async fn select_options(&self, indexes: &[usize]) -> Result<()>;

    /// Whether the element matches a selector.
    async fn matches_selector(&self, selector: &str) -> Result<bool>;

    /// Whether the element has focus.
    async fn is_focused(&self) -> Result<bool>;

    /// Dispatch a generic event carrying `data` fields.
    async fn dispatch_event(&self, name: &str, data: Map<String, Value>) -> Result<()>;

    /// Downcast hook used to recover the concrete element type.
    fn as_any(&self) -> &dyn Any;
}

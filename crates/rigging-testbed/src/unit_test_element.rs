#![forbid(unsafe_code)]

//! [`TestElement`] over a node of the testbed document.
//!
//! Reads stabilize before touching the node; mutations dispatch their
//! synthetic events and stabilize afterwards. Stabilization is delegated to
//! the environment that created the element.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use async_trait::async_trait;
use futures::future::LocalBoxFuture;
use rigging_core::{Document, ElementDimensions, Modifiers, MouseEventInit, NodeId};
use rigging_harness::{ClickPosition, KeyInput, Result, TestElement, TextOptions};
use serde_json::{Map, Value};
use tracing::trace;

use crate::fake_events::{
    clear_element, dispatch_fake_event, dispatch_mouse_event, dispatch_pointer_event_if_supported,
    trigger_blur, trigger_focus, type_in_element,
};

/// Callback that settles the fixture an element belongs to.
pub type StabilizeFn = Rc<dyn Fn() -> LocalBoxFuture<'static, Result<()>>>;

const PRIMARY_BUTTON: i16 = 0;
const SECONDARY_BUTTON: i16 = 2;

/// Test element backed by a live document node.
#[derive(Clone)]
pub struct UnitTestElement {
    document: Document,
    node: NodeId,
    stabilize: StabilizeFn,
}

impl fmt::Debug for UnitTestElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitTestElement")
            .field("node", &self.node)
            .finish()
    }
}

impl UnitTestElement {
    /// Wrap `node`, settling through `stabilize`.
    #[must_use]
    pub fn new(document: Document, node: NodeId, stabilize: StabilizeFn) -> Self {
        Self {
            document,
            node,
            stabilize,
        }
    }

    /// The wrapped node.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The document the node lives in.
    #[must_use]
    pub fn document(&self) -> &Document {
        &self.document
    }

    async fn stabilize(&self) -> Result<()> {
        (self.stabilize)().await
    }

    async fn resolve_position(&self, position: ClickPosition) -> Result<(Option<i32>, Option<i32>)> {
        let (x, y) = match position {
            ClickPosition::Default => return Ok((None, None)),
            ClickPosition::Center => self.get_dimensions().await?.center(),
            ClickPosition::At(x, y) => self.get_dimensions().await?.client_point(x, y),
        };
        Ok((Some(x), Some(y)))
    }

    async fn dispatch_mouse_sequence(
        &self,
        terminal: Option<&str>,
        position: ClickPosition,
        button: i16,
        modifiers: Modifiers,
    ) -> Result<()> {
        let (client_x, client_y) = self.resolve_position(position).await?;
        let pointer = MouseEventInit {
            client_x,
            client_y,
            button,
            modifiers: Modifiers::NONE,
        };
        let mouse = pointer.with_modifiers(modifiers);
        trace!(node = %self.node, ?terminal, button, "mouse sequence");
        let doc = &self.document;
        dispatch_pointer_event_if_supported(doc, self.node, "pointerdown", pointer)?;
        dispatch_mouse_event(doc, self.node, "mousedown", mouse)?;
        dispatch_pointer_event_if_supported(doc, self.node, "pointerup", pointer)?;
        dispatch_mouse_event(doc, self.node, "mouseup", mouse)?;
        if let Some(name) = terminal {
            dispatch_mouse_event(doc, self.node, name, mouse)?;
        }
        self.stabilize().await
    }
}

#[async_trait(?Send)]
impl TestElement for UnitTestElement {
    async fn blur(&self) -> Result<()> {
        trigger_blur(&self.document, self.node)?;
        self.stabilize().await
    }

    async fn clear(&self) -> Result<()> {
        clear_element(&self.document, self.node)?;
        self.stabilize().await
    }

    async fn click(&self, position: ClickPosition, modifiers: Modifiers) -> Result<()> {
        let disabled = self.document.is_disabled(self.node)?;
        let terminal = (!disabled).then_some("click");
        self.dispatch_mouse_sequence(terminal, position, PRIMARY_BUTTON, modifiers)
            .await
    }

    async fn right_click(&self, position: ClickPosition, modifiers: Modifiers) -> Result<()> {
        self.dispatch_mouse_sequence(Some("contextmenu"), position, SECONDARY_BUTTON, modifiers)
            .await
    }

    async fn focus(&self) -> Result<()> {
        trigger_focus(&self.document, self.node)?;
        self.stabilize().await
    }

    async fn get_css_value(&self, property: &str) -> Result<String> {
        self.stabilize().await?;
        Ok(self.document.style_value(self.node, property)?)
    }

    async fn hover(&self) -> Result<()> {
        let init = MouseEventInit::default();
        dispatch_pointer_event_if_supported(&self.document, self.node, "pointerenter", init)?;
        dispatch_mouse_event(&self.document, self.node, "mouseover", init)?;
        dispatch_mouse_event(&self.document, self.node, "mouseenter", init)?;
        self.stabilize().await
    }

    async fn mouse_away(&self) -> Result<()> {
        let init = MouseEventInit::default();
        dispatch_pointer_event_if_supported(&self.document, self.node, "pointerleave", init)?;
        dispatch_mouse_event(&self.document, self.node, "mouseout", init)?;
        dispatch_mouse_event(&self.document, self.node, "mouseleave", init)?;
        self.stabilize().await
    }

    async fn send_keys(&self, modifiers: Modifiers, keys: &[KeyInput]) -> Result<()> {
        type_in_element(&self.document, self.node, modifiers, keys)?;
        self.stabilize().await
    }

    async fn text(&self, options: TextOptions) -> Result<String> {
        self.stabilize().await?;
        let text = match options.exclude {
            Some(exclude) => self.document.text_content_excluding(self.node, &exclude)?,
            None => self.document.text_content(self.node)?,
        };
        Ok(text.trim().to_string())
    }

    async fn get_attribute(&self, name: &str) -> Result<Option<String>> {
        self.stabilize().await?;
        Ok(self.document.attribute(self.node, name)?)
    }

    async fn has_class(&self, name: &str) -> Result<bool> {
        self.stabilize().await?;
        Ok(self.document.has_class(self.node, name)?)
    }

    async fn get_dimensions(&self) -> Result<ElementDimensions> {
        self.stabilize().await?;
        Ok(self.document.bounding_rect(self.node)?)
    }

    async fn get_property(&self, name: &str) -> Result<Value> {
        self.stabilize().await?;
        Ok(self.document.property(self.node, name)?)
    }

    async fn set_input_value(&self, value: &str) -> Result<()> {
        self.document.set_value(self.node, value)?;
        self.stabilize().await
    }

    async fn select_options(&self, indexes: &[usize]) -> Result<()> {
        let doc = &self.document;
        let options = doc.options(self.node)?;
        let multiple = doc.attribute(self.node, "multiple")?.is_some();
        let before = options
            .iter()
            .map(|option| doc.selected(*option))
            .collect::<rigging_core::Result<Vec<bool>>>()?;

        // A single select keeps the last requested index.
        let wanted = |index: usize| {
            if multiple {
                indexes.contains(&index)
            } else {
                indexes.last() == Some(&index)
            }
        };
        for (index, option) in options.iter().enumerate() {
            if !wanted(index) {
                doc.set_selected(*option, false)?;
            }
        }
        for (index, option) in options.iter().enumerate() {
            if wanted(index) {
                doc.set_selected(*option, true)?;
            }
        }

        let mut changed = false;
        for (option, was_selected) in options.iter().zip(before) {
            changed |= doc.selected(*option)? != was_selected;
        }
        if changed {
            dispatch_fake_event(doc, self.node, "change")?;
        }
        self.stabilize().await
    }

    async fn matches_selector(&self, selector: &str) -> Result<bool> {
        self.stabilize().await?;
        Ok(self.document.matches(self.node, selector)?)
    }

    async fn is_focused(&self) -> Result<bool> {
        self.stabilize().await?;
        Ok(self.document.active_element() == Some(self.node))
    }

    async fn dispatch_event(&self, name: &str, data: Map<String, Value>) -> Result<()> {
        let event = rigging_core::DomEvent::with_data(name, data);
        self.document.dispatch_event(self.node, &event)?;
        self.stabilize().await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

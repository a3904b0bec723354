#![forbid(unsafe_code)]

//! Arena document.
//!
//! # Design
//!
//! [`Document`] is a cheap, cloneable handle to a single-threaded node arena
//! (`Rc<RefCell<..>>`). Nodes are addressed by [`NodeId`]s that are never
//! reused: removing a node detaches it but keeps its slot, so side tables
//! keyed by `NodeId` can never alias a different node and never keep a node
//! alive.
//!
//! # Failure Modes
//!
//! - **Listener re-entrancy**: listeners receive `&Document` and may mutate
//!   the tree or dispatch further events. The arena borrow is released before
//!   each listener runs, so this is supported.
//! - **Unknown ids**: ids minted by another document return
//!   [`DomError::UnknownNode`].

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use serde_json::Value;
use tracing::trace;

use crate::error::{DomError, Result};
use crate::event::DomEvent;
use crate::geometry::ElementDimensions;
use crate::selector::SelectorList;

/// Stable identity of a node within one [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    /// Arena slot index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Handle returned by [`Document::add_event_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Event listener callback.
pub type ListenerFn = Rc<dyn Fn(&Document, &DomEvent)>;

struct Listener {
    id: ListenerId,
    event_type: String,
    callback: ListenerFn,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ElementData {
    pub(crate) tag: String,
    pub(crate) attributes: Vec<(String, String)>,
    pub(crate) value: String,
    pub(crate) value_dirty: bool,
    pub(crate) checked: bool,
    pub(crate) selected: bool,
    pub(crate) properties: AHashMap<String, Value>,
    pub(crate) style: Vec<(String, String)>,
    pub(crate) rect: ElementDimensions,
}

impl ElementData {
    pub(crate) fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub(crate) fn has_class(&self, class: &str) -> bool {
        self.attribute("class")
            .is_some_and(|classes| classes.split_ascii_whitespace().any(|c| c == class))
    }

    pub(crate) fn is_disabled(&self) -> bool {
        matches!(
            self.tag.as_str(),
            "button" | "input" | "select" | "textarea" | "option" | "optgroup" | "fieldset"
        ) && self.attribute("disabled").is_some()
    }

    fn is_form_control(&self) -> bool {
        matches!(self.tag.as_str(), "input" | "textarea" | "select" | "button")
    }
}

pub(crate) enum NodeKind {
    Document,
    Element(Box<ElementData>),
    Text(String),
}

pub(crate) struct NodeData {
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) kind: NodeKind,
    listeners: Vec<Listener>,
}

pub(crate) struct DomInner {
    nodes: Vec<NodeData>,
    body: NodeId,
    active_element: Option<NodeId>,
    pointer_events_supported: bool,
    next_listener: u64,
}

impl DomInner {
    pub(crate) fn node(&self, id: NodeId) -> Result<&NodeData> {
        self.nodes.get(id.index()).ok_or(DomError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeData> {
        self.nodes
            .get_mut(id.index())
            .ok_or(DomError::UnknownNode(id))
    }

    pub(crate) fn element(&self, id: NodeId) -> Option<&ElementData> {
        match &self.nodes.get(id.index())?.kind {
            NodeKind::Element(data) => Some(data),
            _ => None,
        }
    }

    fn require_element(&self, id: NodeId) -> Result<&ElementData> {
        self.node(id)?;
        self.element(id).ok_or(DomError::NotAnElement(id))
    }

    fn require_element_mut(&mut self, id: NodeId) -> Result<&mut ElementData> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Element(data) => Ok(data),
            _ => Err(DomError::NotAnElement(id)),
        }
    }

    pub(crate) fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.index())?.parent
    }

    pub(crate) fn parent_element(&self, id: NodeId) -> Option<NodeId> {
        self.parent(id).filter(|p| self.element(*p).is_some())
    }

    pub(crate) fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes.get(id.index()).map_or_else(Vec::new, |node| {
            node.children
                .iter()
                .copied()
                .filter(|child| self.element(*child).is_some())
                .collect()
        })
    }

    pub(crate) fn previous_element_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.element_children(parent);
        let pos = siblings.iter().position(|s| *s == id)?;
        pos.checked_sub(1).map(|p| siblings[p])
    }

    pub(crate) fn next_element_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.element_children(parent);
        let pos = siblings.iter().position(|s| *s == id)?;
        siblings.get(pos + 1).copied()
    }

    pub(crate) fn active_element(&self) -> Option<NodeId> {
        self.active_element
    }

    pub(crate) fn has_children(&self, id: NodeId) -> bool {
        self.nodes
            .get(id.index())
            .is_some_and(|node| !node.children.is_empty())
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = match self.nodes.get(root.index()) {
            Some(node) => node.children.iter().rev().copied().collect(),
            None => return out,
        };
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(node) = self.nodes.get(id.index()) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    fn text_content(&self, id: NodeId, exclude: Option<&SelectorList>) -> String {
        let mut out = String::new();
        self.collect_text(id, exclude, true, &mut out);
        out
    }

    fn collect_text(
        &self,
        id: NodeId,
        exclude: Option<&SelectorList>,
        is_root: bool,
        out: &mut String,
    ) {
        let Some(node) = self.nodes.get(id.index()) else {
            return;
        };
        match &node.kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Element(_) | NodeKind::Document => {
                if !is_root
                    && let Some(list) = exclude
                    && list.matches(self, id)
                {
                    return;
                }
                for child in &node.children {
                    self.collect_text(*child, exclude, false, out);
                }
            }
        }
    }

    fn option_value(&self, option: NodeId) -> String {
        match self.element(option).and_then(|e| e.attribute("value")) {
            Some(value) => value.to_string(),
            None => self.text_content(option, None).trim().to_string(),
        }
    }

    fn options_of(&self, select: NodeId) -> Vec<NodeId> {
        self.descendants(select)
            .into_iter()
            .filter(|id| self.element(*id).is_some_and(|e| e.tag == "option"))
            .collect()
    }

    fn is_focusable(&self, id: NodeId) -> bool {
        let Some(element) = self.element(id) else {
            return false;
        };
        if element.is_disabled() || !self.is_inclusive_ancestor(NodeId(0), id) {
            return false;
        }
        element.is_form_control()
            || (element.tag == "a" && element.attribute("href").is_some())
            || element.attribute("tabindex").is_some()
            || element
                .attribute("contenteditable")
                .is_some_and(|v| v != "false")
    }
}

/// Shared handle to a node arena.
///
/// Cloning a `Document` creates another handle to the **same** tree.
#[derive(Clone)]
pub struct Document {
    inner: Rc<RefCell<DomInner>>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Document")
            .field("nodes", &inner.nodes.len())
            .field("active_element", &inner.active_element)
            .finish()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create a document containing `<html><body></body></html>`.
    #[must_use]
    pub fn new() -> Self {
        let root = NodeData {
            parent: None,
            children: vec![NodeId(1)],
            kind: NodeKind::Document,
            listeners: Vec::new(),
        };
        let html = NodeData {
            parent: Some(NodeId(0)),
            children: vec![NodeId(2)],
            kind: NodeKind::Element(Box::new(ElementData {
                tag: "html".into(),
                ..ElementData::default()
            })),
            listeners: Vec::new(),
        };
        let body = NodeData {
            parent: Some(NodeId(1)),
            children: Vec::new(),
            kind: NodeKind::Element(Box::new(ElementData {
                tag: "body".into(),
                ..ElementData::default()
            })),
            listeners: Vec::new(),
        };
        Self {
            inner: Rc::new(RefCell::new(DomInner {
                nodes: vec![root, html, body],
                body: NodeId(2),
                active_element: None,
                pointer_events_supported: true,
                next_listener: 1,
            })),
        }
    }

    /// Whether both handles refer to the same arena.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The document node.
    #[must_use]
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// The `<body>` element.
    #[must_use]
    pub fn body(&self) -> NodeId {
        self.inner.borrow().body
    }

    /// Whether `PointerEvent` construction is available.
    #[must_use]
    pub fn pointer_events_supported(&self) -> bool {
        self.inner.borrow().pointer_events_supported
    }

    /// Toggle pointer event support (feature detection in test elements).
    pub fn set_pointer_events_supported(&self, supported: bool) {
        self.inner.borrow_mut().pointer_events_supported = supported;
    }

    // ── Tree construction ────────────────────────────────────────────────

    /// Create a detached element.
    pub fn create_element(&self, tag: &str) -> NodeId {
        self.push_node(NodeKind::Element(Box::new(ElementData {
            tag: tag.to_ascii_lowercase(),
            ..ElementData::default()
        })))
    }

    /// Create a detached text node.
    pub fn create_text(&self, text: &str) -> NodeId {
        self.push_node(NodeKind::Text(text.to_string()))
    }

    fn push_node(&self, kind: NodeKind) -> NodeId {
        let mut inner = self.inner.borrow_mut();
        let id = NodeId(inner.nodes.len() as u32);
        inner.nodes.push(NodeData {
            parent: None,
            children: Vec::new(),
            kind,
            listeners: Vec::new(),
        });
        id
    }

    /// Append `child` as the last child of `parent`, detaching it first.
    pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if matches!(inner.node(parent)?.kind, NodeKind::Text(_)) {
            return Err(DomError::Hierarchy(format!("{parent} cannot have children")));
        }
        if matches!(inner.node(child)?.kind, NodeKind::Document) {
            return Err(DomError::Hierarchy("the document node cannot be moved".into()));
        }
        if inner.is_inclusive_ancestor(child, parent) {
            return Err(DomError::Hierarchy(format!(
                "{child} is an ancestor of {parent}"
            )));
        }
        if let Some(old_parent) = inner.parent(child) {
            inner.node_mut(old_parent)?.children.retain(|c| *c != child);
        }
        inner.node_mut(child)?.parent = Some(parent);
        inner.node_mut(parent)?.children.push(child);
        Ok(())
    }

    /// Create an element with attributes and append it to `parent`.
    pub fn append_element(
        &self,
        parent: NodeId,
        tag: &str,
        attributes: &[(&str, &str)],
    ) -> Result<NodeId> {
        let id = self.create_element(tag);
        for (name, value) in attributes {
            self.set_attribute(id, name, value)?;
        }
        self.append_child(parent, id)?;
        Ok(id)
    }

    /// Create a text node and append it to `parent`.
    pub fn append_text(&self, parent: NodeId, text: &str) -> Result<NodeId> {
        let id = self.create_text(text);
        self.append_child(parent, id)?;
        Ok(id)
    }

    /// Detach a node from its parent. Detached nodes keep their id.
    pub fn remove(&self, node: NodeId) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.node(node)?;
        if let Some(parent) = inner.parent(node) {
            inner.node_mut(parent)?.children.retain(|c| *c != node);
        }
        inner.node_mut(node)?.parent = None;
        if let Some(active) = inner.active_element
            && inner.is_inclusive_ancestor(node, active)
        {
            inner.active_element = None;
        }
        Ok(())
    }

    /// Replace all children of `node` with a single text node.
    pub fn set_text_content(&self, node: NodeId, text: &str) -> Result<()> {
        let children = self.children(node)?;
        for child in children {
            self.remove(child)?;
        }
        if !text.is_empty() {
            self.append_text(node, text)?;
        }
        Ok(())
    }

    // ── Navigation ───────────────────────────────────────────────────────

    /// Parent node, if attached.
    #[must_use]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.inner.borrow().parent(node)
    }

    /// All child nodes in order.
    pub fn children(&self, node: NodeId) -> Result<Vec<NodeId>> {
        Ok(self.inner.borrow().node(node)?.children.clone())
    }

    /// Element children in order.
    #[must_use]
    pub fn element_children(&self, node: NodeId) -> Vec<NodeId> {
        self.inner.borrow().element_children(node)
    }

    /// Previous element sibling.
    #[must_use]
    pub fn previous_element_sibling(&self, node: NodeId) -> Option<NodeId> {
        self.inner.borrow().previous_element_sibling(node)
    }

    /// Next element sibling.
    #[must_use]
    pub fn next_element_sibling(&self, node: NodeId) -> Option<NodeId> {
        self.inner.borrow().next_element_sibling(node)
    }

    /// Whether `node` is `ancestor` or lies beneath it.
    #[must_use]
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.inner.borrow().is_inclusive_ancestor(ancestor, node)
    }

    /// Whether the node is attached to the document.
    #[must_use]
    pub fn is_connected(&self, node: NodeId) -> bool {
        self.contains(self.root(), node)
    }

    /// Whether the node is an element.
    #[must_use]
    pub fn is_element(&self, node: NodeId) -> bool {
        self.inner.borrow().element(node).is_some()
    }

    // ── Attributes and classes ───────────────────────────────────────────

    /// Lowercase tag name.
    pub fn tag_name(&self, node: NodeId) -> Result<String> {
        Ok(self.inner.borrow().require_element(node)?.tag.clone())
    }

    /// Attribute value, if present.
    pub fn attribute(&self, node: NodeId, name: &str) -> Result<Option<String>> {
        Ok(self
            .inner
            .borrow()
            .require_element(node)?
            .attribute(name)
            .map(str::to_string))
    }

    /// Set an attribute, keeping reflected state in sync.
    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let element = inner.require_element_mut(node)?;
        match element.attributes.iter_mut().find(|(key, _)| key == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => element
                .attributes
                .push((name.to_string(), value.to_string())),
        }
        match name {
            "value" if !element.value_dirty => element.value = value.to_string(),
            "checked" => element.checked = true,
            "selected" => element.selected = true,
            "style" => element.style = parse_style(value),
            _ => {}
        }
        Ok(())
    }

    /// Remove an attribute.
    pub fn remove_attribute(&self, node: NodeId, name: &str) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let element = inner.require_element_mut(node)?;
        element.attributes.retain(|(key, _)| key != name);
        if name == "style" {
            element.style.clear();
        }
        Ok(())
    }

    /// Whether the class list contains `class`.
    pub fn has_class(&self, node: NodeId, class: &str) -> Result<bool> {
        Ok(self.inner.borrow().require_element(node)?.has_class(class))
    }

    /// Add or remove a class.
    pub fn toggle_class(&self, node: NodeId, class: &str, on: bool) -> Result<()> {
        let current = self.attribute(node, "class")?.unwrap_or_default();
        let mut classes: Vec<&str> = current
            .split_ascii_whitespace()
            .filter(|c| *c != class)
            .collect();
        if on {
            classes.push(class);
        }
        self.set_attribute(node, "class", &classes.join(" "))
    }

    /// Whether the element carries the native disabled state.
    pub fn is_disabled(&self, node: NodeId) -> Result<bool> {
        Ok(self.inner.borrow().require_element(node)?.is_disabled())
    }

    // ── Content ──────────────────────────────────────────────────────────

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self, node: NodeId) -> Result<String> {
        let inner = self.inner.borrow();
        inner.node(node)?;
        Ok(inner.text_content(node, None))
    }

    /// Text content skipping descendant subtrees that match `exclude`.
    pub fn text_content_excluding(&self, node: NodeId, exclude: &str) -> Result<String> {
        let list = SelectorList::parse(exclude)?;
        let inner = self.inner.borrow();
        inner.node(node)?;
        Ok(inner.text_content(node, Some(&list)))
    }

    // ── Form state ───────────────────────────────────────────────────────

    /// Whether the element accepts typed text.
    pub fn is_text_input(&self, node: NodeId) -> Result<bool> {
        let inner = self.inner.borrow();
        let element = inner.require_element(node)?;
        Ok(match element.tag.as_str() {
            "textarea" => true,
            "input" => !matches!(
                element.attribute("type").unwrap_or("text"),
                "checkbox" | "radio" | "button" | "submit" | "reset" | "file" | "image"
            ),
            _ => false,
        })
    }

    /// Current `value` of an input, textarea, select, or option.
    pub fn value(&self, node: NodeId) -> Result<String> {
        let inner = self.inner.borrow();
        let element = inner.require_element(node)?;
        match element.tag.as_str() {
            "input" | "textarea" => Ok(element.value.clone()),
            "option" => Ok(inner.option_value(node)),
            "select" => Ok(inner
                .options_of(node)
                .into_iter()
                .find(|o| inner.element(*o).is_some_and(|e| e.selected))
                .map(|o| inner.option_value(o))
                .unwrap_or_default()),
            other => Err(DomError::WrongElementKind {
                operation: "read value",
                expected: "a form control",
                found: other.to_string(),
            }),
        }
    }

    /// Set the `value` property without dispatching events.
    pub fn set_value(&self, node: NodeId, value: &str) -> Result<()> {
        let tag = self.tag_name(node)?;
        match tag.as_str() {
            "input" | "textarea" => {
                let mut inner = self.inner.borrow_mut();
                let element = inner.require_element_mut(node)?;
                element.value = value.to_string();
                element.value_dirty = true;
                Ok(())
            }
            "select" => {
                let target = {
                    let inner = self.inner.borrow();
                    inner
                        .options_of(node)
                        .into_iter()
                        .find(|o| inner.option_value(*o) == value)
                };
                match target {
                    Some(option) => self.set_selected(option, true),
                    None => {
                        for option in self.options(node)? {
                            self.set_selected(option, false)?;
                        }
                        Ok(())
                    }
                }
            }
            other => Err(DomError::WrongElementKind {
                operation: "set value",
                expected: "an input, textarea, or select",
                found: other.to_string(),
            }),
        }
    }

    /// Checked state of a checkbox or radio.
    pub fn checked(&self, node: NodeId) -> Result<bool> {
        Ok(self.inner.borrow().require_element(node)?.checked)
    }

    /// Set the checked state.
    pub fn set_checked(&self, node: NodeId, checked: bool) -> Result<()> {
        self.inner.borrow_mut().require_element_mut(node)?.checked = checked;
        Ok(())
    }

    /// `<option>` descendants of a select, in document order.
    pub fn options(&self, select: NodeId) -> Result<Vec<NodeId>> {
        let inner = self.inner.borrow();
        let element = inner.require_element(select)?;
        if element.tag != "select" {
            return Err(DomError::WrongElementKind {
                operation: "list options",
                expected: "a select",
                found: element.tag.clone(),
            });
        }
        Ok(inner.options_of(select))
    }

    /// Whether an option is selected.
    pub fn selected(&self, option: NodeId) -> Result<bool> {
        Ok(self.inner.borrow().require_element(option)?.selected)
    }

    /// Set an option's selected state. Selecting an option of a single
    /// select deselects its siblings.
    pub fn set_selected(&self, option: NodeId, selected: bool) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.require_element(option)?;
        let mut select = inner.parent_element(option);
        while let Some(candidate) = select {
            if inner.element(candidate).is_some_and(|e| e.tag == "select") {
                break;
            }
            select = inner.parent_element(candidate);
        }
        if selected
            && let Some(select) = select
            && inner
                .element(select)
                .is_some_and(|e| e.attribute("multiple").is_none())
        {
            for other in inner.options_of(select) {
                if let Ok(element) = inner.require_element_mut(other) {
                    element.selected = false;
                }
            }
        }
        inner.require_element_mut(option)?.selected = selected;
        Ok(())
    }

    // ── Properties and style ─────────────────────────────────────────────

    /// Read a JavaScript-style property as JSON.
    ///
    /// Reflected properties (`value`, `checked`, `disabled`, `id`,
    /// `className`, `tagName`, `textContent`, `selectedIndex`, `multiple`,
    /// `selected`, `type`) are computed; anything else is looked up in the
    /// element's custom property table and defaults to `null`.
    pub fn property(&self, node: NodeId, name: &str) -> Result<Value> {
        let tag = self.tag_name(node)?;
        let value = match name {
            "value" => match self.value(node) {
                Ok(value) => Value::from(value),
                Err(_) => Value::Null,
            },
            "checked" => Value::from(self.checked(node)?),
            "selected" => Value::from(self.selected(node)?),
            "disabled" => Value::from(self.is_disabled(node)?),
            "id" => Value::from(self.attribute(node, "id")?.unwrap_or_default()),
            "className" => Value::from(self.attribute(node, "class")?.unwrap_or_default()),
            "tagName" => Value::from(tag.to_ascii_uppercase()),
            "textContent" => Value::from(self.text_content(node)?),
            "multiple" => Value::from(self.attribute(node, "multiple")?.is_some()),
            "type" if tag == "input" => {
                Value::from(self.attribute(node, "type")?.unwrap_or_else(|| "text".into()))
            }
            "selectedIndex" if tag == "select" => {
                let options = self.options(node)?;
                let mut index = -1_i64;
                for (i, option) in options.into_iter().enumerate() {
                    if self.selected(option)? {
                        index = i as i64;
                        break;
                    }
                }
                Value::from(index)
            }
            _ => self
                .inner
                .borrow()
                .require_element(node)?
                .properties
                .get(name)
                .cloned()
                .unwrap_or(Value::Null),
        };
        Ok(value)
    }

    /// Write a property. `value` and `checked` route to form state.
    pub fn set_property(&self, node: NodeId, name: &str, value: Value) -> Result<()> {
        match (name, &value) {
            ("value", Value::String(text)) => self.set_value(node, text),
            ("checked", Value::Bool(flag)) => self.set_checked(node, *flag),
            ("selected", Value::Bool(flag)) => self.set_selected(node, *flag),
            _ => {
                self.inner
                    .borrow_mut()
                    .require_element_mut(node)?
                    .properties
                    .insert(name.to_string(), value);
                Ok(())
            }
        }
    }

    /// Inline style value, or an empty string.
    pub fn style_value(&self, node: NodeId, property: &str) -> Result<String> {
        Ok(self
            .inner
            .borrow()
            .require_element(node)?
            .style
            .iter()
            .find(|(key, _)| key == property)
            .map(|(_, value)| value.clone())
            .unwrap_or_default())
    }

    /// Set an inline style property.
    pub fn set_style(&self, node: NodeId, property: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let element = inner.require_element_mut(node)?;
        match element.style.iter_mut().find(|(key, _)| key == property) {
            Some(entry) => entry.1 = value.to_string(),
            None => element
                .style
                .push((property.to_string(), value.to_string())),
        }
        Ok(())
    }

    /// Layout box assigned to the element.
    pub fn bounding_rect(&self, node: NodeId) -> Result<ElementDimensions> {
        Ok(self.inner.borrow().require_element(node)?.rect)
    }

    /// Assign a layout box (layout is not computed by the document).
    pub fn set_bounding_rect(&self, node: NodeId, rect: ElementDimensions) -> Result<()> {
        self.inner.borrow_mut().require_element_mut(node)?.rect = rect;
        Ok(())
    }

    // ── Selectors ────────────────────────────────────────────────────────

    /// Descendants of `root` matching `selector`, in document order.
    pub fn query_selector_all(&self, root: NodeId, selector: &str) -> Result<Vec<NodeId>> {
        let list = SelectorList::parse(selector)?;
        Ok(self.query_with(root, &list))
    }

    /// Descendants of `root` matching a parsed selector list.
    #[must_use]
    pub fn query_with(&self, root: NodeId, list: &SelectorList) -> Vec<NodeId> {
        let inner = self.inner.borrow();
        inner
            .descendants(root)
            .into_iter()
            .filter(|id| list.matches(&inner, *id))
            .collect()
    }

    /// Whether the element matches `selector`.
    pub fn matches(&self, node: NodeId, selector: &str) -> Result<bool> {
        let list = SelectorList::parse(selector)?;
        let inner = self.inner.borrow();
        inner.require_element(node)?;
        Ok(list.matches(&inner, node))
    }

    /// Nearest inclusive ancestor element matching `selector`. Text nodes
    /// start the search at their parent element.
    pub fn closest(&self, node: NodeId, selector: &str) -> Result<Option<NodeId>> {
        let list = SelectorList::parse(selector)?;
        Ok(self.closest_with(node, &list))
    }

    /// [`closest`](Self::closest) with a pre-parsed selector.
    #[must_use]
    pub fn closest_with(&self, node: NodeId, list: &SelectorList) -> Option<NodeId> {
        let inner = self.inner.borrow();
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if inner.element(current).is_some() && list.matches(&inner, current) {
                return Some(current);
            }
            cursor = inner.parent(current);
        }
        None
    }

    // ── Focus ────────────────────────────────────────────────────────────

    /// Currently focused element.
    #[must_use]
    pub fn active_element(&self) -> Option<NodeId> {
        self.inner.borrow().active_element
    }

    /// Whether the element can receive focus.
    #[must_use]
    pub fn is_focusable(&self, node: NodeId) -> bool {
        self.inner.borrow().is_focusable(node)
    }

    /// Move focus to `node`, firing `blur`/`focusout` on the previous
    /// element and `focus`/`focusin` on the new one. Non-focusable elements
    /// are ignored, as on the platform.
    pub fn focus(&self, node: NodeId) -> Result<()> {
        self.inner.borrow().require_element(node)?;
        if !self.is_focusable(node) || self.active_element() == Some(node) {
            return Ok(());
        }
        if let Some(previous) = self.active_element() {
            self.inner.borrow_mut().active_element = None;
            self.dispatch_event(previous, &DomEvent::new("blur"))?;
            self.dispatch_event(previous, &DomEvent::new("focusout"))?;
        }
        self.inner.borrow_mut().active_element = Some(node);
        self.dispatch_event(node, &DomEvent::new("focus"))?;
        self.dispatch_event(node, &DomEvent::new("focusin"))?;
        Ok(())
    }

    /// Remove focus from `node` if it is focused.
    pub fn blur(&self, node: NodeId) -> Result<()> {
        if self.active_element() != Some(node) {
            return Ok(());
        }
        self.inner.borrow_mut().active_element = None;
        self.dispatch_event(node, &DomEvent::new("blur"))?;
        self.dispatch_event(node, &DomEvent::new("focusout"))?;
        Ok(())
    }

    // ── Events ───────────────────────────────────────────────────────────

    /// Register a listener for `event_type` on `node`.
    pub fn add_event_listener(
        &self,
        node: NodeId,
        event_type: &str,
        callback: impl Fn(&Document, &DomEvent) + 'static,
    ) -> Result<ListenerId> {
        let mut inner = self.inner.borrow_mut();
        let id = ListenerId(inner.next_listener);
        inner.next_listener += 1;
        inner.node_mut(node)?.listeners.push(Listener {
            id,
            event_type: event_type.to_string(),
            callback: Rc::new(callback),
        });
        Ok(id)
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn remove_event_listener(&self, node: NodeId, listener: ListenerId) -> Result<()> {
        self.inner
            .borrow_mut()
            .node_mut(node)?
            .listeners
            .retain(|l| l.id != listener);
        Ok(())
    }

    /// Dispatch `event` at `target`, bubbling through ancestors when the
    /// event bubbles. Returns `false` if a listener prevented the default.
    pub fn dispatch_event(&self, target: NodeId, event: &DomEvent) -> Result<bool> {
        let path: Vec<NodeId> = {
            let inner = self.inner.borrow();
            inner.node(target)?;
            let mut path = vec![target];
            if event.bubbles() {
                let mut cursor = inner.parent(target);
                while let Some(node) = cursor {
                    path.push(node);
                    cursor = inner.parent(node);
                }
            }
            path
        };
        trace!(event = event.event_type(), %target, "dispatch");
        event.set_target(target);
        for node in path {
            let callbacks: Vec<ListenerFn> = self
                .inner
                .borrow()
                .node(node)?
                .listeners
                .iter()
                .filter(|l| l.event_type == event.event_type())
                .map(|l| Rc::clone(&l.callback))
                .collect();
            event.set_current_target(Some(node));
            for callback in callbacks {
                callback(self, event);
            }
            if event.is_propagation_stopped() {
                break;
            }
        }
        event.set_current_target(None);
        Ok(!event.default_prevented())
    }
}

fn parse_style(source: &str) -> Vec<(String, String)> {
    source
        .split(';')
        .filter_map(|decl| {
            let (key, value) = decl.split_once(':')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    fn list_fixture() -> (Document, NodeId, Vec<NodeId>) {
        let doc = Document::new();
        let list = doc
            .append_element(doc.body(), "ul", &[("class", "list")])
            .unwrap();
        let items = (0..3)
            .map(|i| {
                let item = doc
                    .append_element(list, "li", &[("class", "item")])
                    .unwrap();
                doc.append_text(item, &format!("Item {i}")).unwrap();
                item
            })
            .collect();
        (doc, list, items)
    }

    #[test]
    fn ids_are_never_reused() {
        let doc = Document::new();
        let a = doc.create_element("div");
        doc.append_child(doc.body(), a).unwrap();
        doc.remove(a).unwrap();
        let b = doc.create_element("div");
        assert_ne!(a, b);
        assert!(!doc.is_connected(a));
        assert_eq!(doc.tag_name(a).unwrap(), "div");
    }

    #[test]
    fn append_rejects_cycles() {
        let doc = Document::new();
        let outer = doc.append_element(doc.body(), "div", &[]).unwrap();
        let inner = doc.append_element(outer, "div", &[]).unwrap();
        assert!(matches!(
            doc.append_child(inner, outer),
            Err(DomError::Hierarchy(_))
        ));
    }

    #[test]
    fn siblings_skip_text_nodes() {
        let (doc, list, items) = list_fixture();
        doc.append_text(list, "  ").unwrap();
        assert_eq!(doc.previous_element_sibling(items[1]), Some(items[0]));
        assert_eq!(doc.next_element_sibling(items[1]), Some(items[2]));
        assert_eq!(doc.next_element_sibling(items[2]), None);
        assert_eq!(doc.previous_element_sibling(items[0]), None);
    }

    #[test]
    fn text_content_with_exclusion() {
        let doc = Document::new();
        let host = doc.append_element(doc.body(), "div", &[]).unwrap();
        doc.append_text(host, "Hello ").unwrap();
        let hidden = doc
            .append_element(host, "span", &[("class", "hidden")])
            .unwrap();
        doc.append_text(hidden, "secret ").unwrap();
        doc.append_text(host, "world").unwrap();
        assert_eq!(doc.text_content(host).unwrap(), "Hello secret world");
        assert_eq!(
            doc.text_content_excluding(host, ".hidden").unwrap(),
            "Hello world"
        );
    }

    #[test]
    fn single_select_keeps_one_selection() {
        let doc = Document::new();
        let select = doc.append_element(doc.body(), "select", &[]).unwrap();
        let a = doc
            .append_element(select, "option", &[("value", "a")])
            .unwrap();
        let b = doc
            .append_element(select, "option", &[("value", "b")])
            .unwrap();
        doc.set_selected(a, true).unwrap();
        doc.set_selected(b, true).unwrap();
        assert!(!doc.selected(a).unwrap());
        assert_eq!(doc.value(select).unwrap(), "b");
        assert_eq!(doc.property(select, "selectedIndex").unwrap(), Value::from(1));
    }

    #[test]
    fn value_attribute_is_default_until_dirty() {
        let doc = Document::new();
        let input = doc
            .append_element(doc.body(), "input", &[("value", "x")])
            .unwrap();
        assert_eq!(doc.value(input).unwrap(), "x");
        doc.set_value(input, "typed").unwrap();
        doc.set_attribute(input, "value", "ignored").unwrap();
        assert_eq!(doc.value(input).unwrap(), "typed");
    }

    #[test]
    fn value_on_div_is_wrong_kind() {
        let doc = Document::new();
        let div = doc.append_element(doc.body(), "div", &[]).unwrap();
        assert!(matches!(
            doc.set_value(div, "x"),
            Err(DomError::WrongElementKind { .. })
        ));
    }

    #[test]
    fn events_bubble_until_stopped() {
        let (doc, list, items) = list_fixture();
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let l1 = Rc::clone(&log);
        doc.add_event_listener(items[0], "click", move |_, ev| {
            l1.borrow_mut().push(("item", ev.current_target()));
        })
        .unwrap();
        let l2 = Rc::clone(&log);
        doc.add_event_listener(list, "click", move |_, ev| {
            l2.borrow_mut().push(("list", ev.current_target()));
            ev.stop_propagation();
        })
        .unwrap();
        let l3 = Rc::clone(&log);
        doc.add_event_listener(doc.body(), "click", move |_, _| {
            l3.borrow_mut().push(("body", None));
        })
        .unwrap();

        doc.dispatch_event(items[0], &DomEvent::new("click")).unwrap();
        assert_eq!(
            *log.borrow(),
            vec![("item", Some(items[0])), ("list", Some(list))]
        );
    }

    #[test]
    fn focus_moves_between_focusable_elements() {
        let doc = Document::new();
        let a = doc.append_element(doc.body(), "input", &[]).unwrap();
        let b = doc.append_element(doc.body(), "button", &[]).unwrap();
        let plain = doc.append_element(doc.body(), "div", &[]).unwrap();
        let log = Rc::new(StdRefCell::new(Vec::new()));
        for (node, name) in [(a, "a"), (b, "b")] {
            for ty in ["focus", "blur"] {
                let log = Rc::clone(&log);
                doc.add_event_listener(node, ty, move |_, ev| {
                    log.borrow_mut().push(format!("{name}:{}", ev.event_type()));
                })
                .unwrap();
            }
        }
        doc.focus(a).unwrap();
        doc.focus(b).unwrap();
        doc.focus(plain).unwrap();
        assert_eq!(doc.active_element(), Some(b));
        assert_eq!(*log.borrow(), vec!["a:focus", "a:blur", "b:focus"]);
    }

    #[test]
    fn disabled_controls_are_not_focusable() {
        let doc = Document::new();
        let button = doc
            .append_element(doc.body(), "button", &[("disabled", "")])
            .unwrap();
        assert!(doc.is_disabled(button).unwrap());
        doc.focus(button).unwrap();
        assert_eq!(doc.active_element(), None);
    }

    #[test]
    fn style_attribute_is_parsed() {
        let doc = Document::new();
        let div = doc
            .append_element(doc.body(), "div", &[("style", "color: red; Width : 10px")])
            .unwrap();
        assert_eq!(doc.style_value(div, "color").unwrap(), "red");
        assert_eq!(doc.style_value(div, "width").unwrap(), "10px");
        assert_eq!(doc.style_value(div, "height").unwrap(), "");
    }

    #[test]
    fn custom_properties_default_to_null() {
        let doc = Document::new();
        let div = doc.append_element(doc.body(), "div", &[]).unwrap();
        assert_eq!(doc.property(div, "appState").unwrap(), Value::Null);
        doc.set_property(div, "appState", Value::from("ready"))
            .unwrap();
        assert_eq!(doc.property(div, "appState").unwrap(), Value::from("ready"));
    }

    #[test]
    fn toggle_class_round_trip() {
        let doc = Document::new();
        let div = doc
            .append_element(doc.body(), "div", &[("class", "a b")])
            .unwrap();
        doc.toggle_class(div, "c", true).unwrap();
        assert!(doc.has_class(div, "c").unwrap());
        doc.toggle_class(div, "a", false).unwrap();
        assert!(!doc.has_class(div, "a").unwrap());
        assert!(doc.has_class(div, "b").unwrap());
    }
}

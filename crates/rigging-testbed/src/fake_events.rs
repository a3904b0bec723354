#![forbid(unsafe_code)]

//! Synthetic input helpers used by [`UnitTestElement`].
//!
//! Each helper builds the event the platform would fire and dispatches it
//! at the target node. They do not stabilize; callers do.
//!
//! [`UnitTestElement`]: crate::UnitTestElement

use rigging_core::key::char_init;
use rigging_core::{
    Document, DomError, DomEvent, KeyboardEventInit, Modifiers, MouseEventInit, NodeId, Result,
};
use rigging_harness::KeyInput;
use tracing::trace;

/// Dispatch a plain event with the platform bubbling default.
pub fn dispatch_fake_event(document: &Document, node: NodeId, event_type: &str) -> Result<bool> {
    document.dispatch_event(node, &DomEvent::new(event_type))
}

/// Dispatch a mouse event.
pub fn dispatch_mouse_event(
    document: &Document,
    node: NodeId,
    event_type: &str,
    init: MouseEventInit,
) -> Result<bool> {
    document.dispatch_event(node, &DomEvent::mouse(event_type, init))
}

/// Dispatch a pointer event, or nothing when the document reports pointer
/// events as unsupported.
pub fn dispatch_pointer_event_if_supported(
    document: &Document,
    node: NodeId,
    event_type: &str,
    init: MouseEventInit,
) -> Result<()> {
    if document.pointer_events_supported() {
        document.dispatch_event(node, &DomEvent::pointer(event_type, init))?;
    }
    Ok(())
}

/// Dispatch a keyboard event.
pub fn dispatch_keyboard_event(
    document: &Document,
    node: NodeId,
    event_type: &str,
    init: KeyboardEventInit,
) -> Result<bool> {
    document.dispatch_event(node, &DomEvent::keyboard(event_type, init))
}

/// Focus `node`. Elements that cannot take focus still receive a `focus`
/// event so listeners run.
pub fn trigger_focus(document: &Document, node: NodeId) -> Result<()> {
    if document.is_focusable(node) {
        document.focus(node)
    } else {
        dispatch_fake_event(document, node, "focus").map(|_| ())
    }
}

/// Blur `node`. Unfocused elements still receive a `blur` event.
pub fn trigger_blur(document: &Document, node: NodeId) -> Result<()> {
    if document.active_element() == Some(node) {
        document.blur(node)
    } else {
        dispatch_fake_event(document, node, "blur").map(|_| ())
    }
}

/// Type `keys` into `node`: focus it, then for every key fire `keydown`
/// and `keypress`, append printable characters to text inputs followed by
/// an `input` event, and finish with `keyup`.
pub fn type_in_element(
    document: &Document,
    node: NodeId,
    modifiers: Modifiers,
    keys: &[KeyInput],
) -> Result<()> {
    let inits: Vec<KeyboardEventInit> = keys
        .iter()
        .flat_map(|input| match input {
            KeyInput::Text(text) => text.chars().map(|ch| char_init(ch, modifiers)).collect(),
            KeyInput::Key(key) => vec![key.init(modifiers)],
        })
        .collect();
    let is_input = document.is_text_input(node)?;
    trigger_focus(document, node)?;
    for init in inits {
        trace!(key = %init.key, %node, "type key");
        dispatch_keyboard_event(document, node, "keydown", init.clone())?;
        dispatch_keyboard_event(document, node, "keypress", init.clone())?;
        if is_input && init.key.chars().count() == 1 {
            let mut value = document.value(node)?;
            value.push_str(&init.key);
            document.set_value(node, &value)?;
            dispatch_fake_event(document, node, "input")?;
        }
        dispatch_keyboard_event(document, node, "keyup", init)?;
    }
    Ok(())
}

/// Empty a text input or textarea, firing `input`.
pub fn clear_element(document: &Document, node: NodeId) -> Result<()> {
    if !document.is_text_input(node)? {
        return Err(DomError::WrongElementKind {
            operation: "clear",
            expected: "a text input or textarea",
            found: document.tag_name(node)?,
        });
    }
    trigger_focus(document, node)?;
    document.set_value(node, "")?;
    dispatch_fake_event(document, node, "input")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use rigging_core::TestKey;

    use super::*;

    fn record(document: &Document, node: NodeId, types: &[&str]) -> Rc<RefCell<Vec<String>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        for event_type in types {
            let log = Rc::clone(&log);
            document
                .add_event_listener(node, event_type, move |_, event| {
                    log.borrow_mut().push(event.event_type().to_string());
                })
                .unwrap();
        }
        log
    }

    #[test]
    fn typing_appends_and_fires_per_key() {
        let document = Document::new();
        let input = document
            .append_element(document.body(), "input", &[])
            .unwrap();
        let log = record(&document, input, &["keydown", "keypress", "input", "keyup"]);

        type_in_element(&document, input, Modifiers::NONE, &["ab".into()]).unwrap();

        assert_eq!(document.value(input).unwrap(), "ab");
        assert_eq!(document.active_element(), Some(input));
        assert_eq!(
            *log.borrow(),
            vec![
                "keydown", "keypress", "input", "keyup", "keydown", "keypress", "input", "keyup"
            ]
        );
    }

    #[test]
    fn special_keys_do_not_edit_value() {
        let document = Document::new();
        let input = document
            .append_element(document.body(), "input", &[])
            .unwrap();
        let log = record(&document, input, &["input"]);
        type_in_element(&document, input, Modifiers::NONE, &[TestKey::Enter.into()]).unwrap();
        assert_eq!(document.value(input).unwrap(), "");
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn clear_rejects_non_inputs() {
        let document = Document::new();
        let div = document.append_element(document.body(), "div", &[]).unwrap();
        let err = clear_element(&document, div).unwrap_err();
        assert_eq!(
            err,
            DomError::WrongElementKind {
                operation: "clear",
                expected: "a text input or textarea",
                found: "div".into(),
            }
        );
    }

    #[test]
    fn pointer_events_respect_feature_flag() {
        let document = Document::new();
        let div = document.append_element(document.body(), "div", &[]).unwrap();
        let log = record(&document, div, &["pointerdown"]);
        document.set_pointer_events_supported(false);
        dispatch_pointer_event_if_supported(&document, div, "pointerdown", MouseEventInit::default())
            .unwrap();
        assert!(log.borrow().is_empty());
        document.set_pointer_events_supported(true);
        dispatch_pointer_event_if_supported(&document, div, "pointerdown", MouseEventInit::default())
            .unwrap();
        assert_eq!(log.borrow().len(), 1);
    }
}

#![forbid(unsafe_code)]

//! Special keys that test elements can type.

use crate::event::{KeyboardEventInit, Modifiers};

/// Non-printable keys accepted by `send_keys`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestKey {
    Backspace,
    Tab,
    Enter,
    Shift,
    Control,
    Alt,
    Escape,
    PageUp,
    PageDown,
    End,
    Home,
    LeftArrow,
    UpArrow,
    RightArrow,
    DownArrow,
    Insert,
    Delete,
    /// Function key `F1`..=`F12`.
    F(u8),
    Meta,
    Comma,
}

impl TestKey {
    /// `(key, code, key_code)` triple used to build keyboard events.
    #[must_use]
    pub fn descriptor(self) -> (String, String, u32) {
        let (key, code, key_code): (&str, &str, u32) = match self {
            Self::Backspace => ("Backspace", "Backspace", 8),
            Self::Tab => ("Tab", "Tab", 9),
            Self::Enter => ("Enter", "Enter", 13),
            Self::Shift => ("Shift", "ShiftLeft", 16),
            Self::Control => ("Control", "ControlLeft", 17),
            Self::Alt => ("Alt", "AltLeft", 18),
            Self::Escape => ("Escape", "Escape", 27),
            Self::PageUp => ("PageUp", "PageUp", 33),
            Self::PageDown => ("PageDown", "PageDown", 34),
            Self::End => ("End", "End", 35),
            Self::Home => ("Home", "Home", 36),
            Self::LeftArrow => ("ArrowLeft", "ArrowLeft", 37),
            Self::UpArrow => ("ArrowUp", "ArrowUp", 38),
            Self::RightArrow => ("ArrowRight", "ArrowRight", 39),
            Self::DownArrow => ("ArrowDown", "ArrowDown", 40),
            Self::Insert => ("Insert", "Insert", 45),
            Self::Delete => ("Delete", "Delete", 46),
            Self::Meta => ("Meta", "MetaLeft", 91),
            Self::Comma => (",", "Comma", 188),
            Self::F(n) => {
                let n = n.clamp(1, 12);
                let name = format!("F{n}");
                return (name.clone(), name, 111 + u32::from(n));
            }
        };
        (key.to_string(), code.to_string(), key_code)
    }

    /// Keyboard init for this key with the given modifiers.
    #[must_use]
    pub fn init(self, modifiers: Modifiers) -> KeyboardEventInit {
        let (key, code, key_code) = self.descriptor();
        KeyboardEventInit {
            key,
            code,
            key_code,
            modifiers,
        }
    }
}

/// Keyboard init for a printable character.
#[must_use]
pub fn char_init(ch: char, modifiers: Modifiers) -> KeyboardEventInit {
    let upper = ch.to_ascii_uppercase();
    let (code, key_code) = if ch.is_ascii_alphabetic() {
        (format!("Key{upper}"), u32::from(upper))
    } else if ch.is_ascii_digit() {
        (format!("Digit{ch}"), u32::from(ch))
    } else if ch == ' ' {
        ("Space".to_string(), 32)
    } else {
        (String::new(), u32::from(ch))
    };
    KeyboardEventInit {
        key: ch.to_string(),
        code,
        key_code,
        modifiers,
    }
}

//! Key and mouse definitions for `Input.dispatch*Event`.

use serde::{Deserialize, Serialize};

/// Modifier bit flags as understood by `Input.dispatchKeyEvent`.
pub mod modifiers {
    pub const ALT: u32 = 1;
    pub const CONTROL: u32 = 2;
    pub const META: u32 = 4;
    pub const SHIFT: u32 = 8;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
    /// Used for plain pointer moves.
    None,
}

impl MouseButton {
    pub fn as_cdp(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
            MouseButton::None => "none",
        }
    }

    /// Bitmask for the `buttons` field while this button is held.
    pub fn buttons_mask(&self) -> u32 {
        match self {
            MouseButton::Left => 1,
            MouseButton::Right => 2,
            MouseButton::Middle => 4,
            MouseButton::None => 0,
        }
    }
}

/// Protocol description of one physical key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyDefinition {
    pub key: String,
    pub code: String,
    pub key_code: u32,
    pub text: Option<String>,
}

impl KeyDefinition {
    fn named(key: &str, code: &str, key_code: u32, text: Option<&str>) -> Self {
        Self {
            key: key.to_string(),
            code: code.to_string(),
            key_code,
            text: text.map(str::to_string),
        }
    }
}

/// Resolves a DOM `key` value (`"Enter"`, `"ArrowUp"`, `"a"`) into its definition.
/// Unknown multi-character names pass through without a key code or text.
pub fn key_definition(key: &str) -> KeyDefinition {
    let named = match key {
        "Enter" => Some(KeyDefinition::named("Enter", "Enter", 13, Some("\r"))),
        "Tab" => Some(KeyDefinition::named("Tab", "Tab", 9, None)),
        "Backspace" => Some(KeyDefinition::named("Backspace", "Backspace", 8, None)),
        "Escape" => Some(KeyDefinition::named("Escape", "Escape", 27, None)),
        "Delete" => Some(KeyDefinition::named("Delete", "Delete", 46, None)),
        "Insert" => Some(KeyDefinition::named("Insert", "Insert", 45, None)),
        " " => Some(KeyDefinition::named(" ", "Space", 32, Some(" "))),
        "ArrowUp" => Some(KeyDefinition::named("ArrowUp", "ArrowUp", 38, None)),
        "ArrowDown" => Some(KeyDefinition::named("ArrowDown", "ArrowDown", 40, None)),
        "ArrowLeft" => Some(KeyDefinition::named("ArrowLeft", "ArrowLeft", 37, None)),
        "ArrowRight" => Some(KeyDefinition::named("ArrowRight", "ArrowRight", 39, None)),
        "Home" => Some(KeyDefinition::named("Home", "Home", 36, None)),
        "End" => Some(KeyDefinition::named("End", "End", 35, None)),
        "PageUp" => Some(KeyDefinition::named("PageUp", "PageUp", 33, None)),
        "PageDown" => Some(KeyDefinition::named("PageDown", "PageDown", 34, None)),
        "Shift" => Some(KeyDefinition::named("Shift", "ShiftLeft", 16, None)),
        "Control" => Some(KeyDefinition::named("Control", "ControlLeft", 17, None)),
        "Alt" => Some(KeyDefinition::named("Alt", "AltLeft", 18, None)),
        "Meta" => Some(KeyDefinition::named("Meta", "MetaLeft", 91, None)),
        _ => None,
    };
    if let Some(def) = named {
        return def;
    }

    if let Some(n) = key
        .strip_prefix('F')
        .and_then(|rest| rest.parse::<u32>().ok())
        .filter(|n| (1..=12).contains(n))
    {
        return KeyDefinition::named(key, key, 111 + n, None);
    }

    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => char_definition(c),
        _ => KeyDefinition::named(key, key, 0, None),
    }
}

fn char_definition(c: char) -> KeyDefinition {
    let text = Some(c.to_string());
    if c.is_ascii_alphabetic() {
        let upper = c.to_ascii_uppercase();
        KeyDefinition {
            key: c.to_string(),
            code: format!("Key{upper}"),
            key_code: upper as u32,
            text,
        }
    } else if c.is_ascii_digit() {
        KeyDefinition {
            key: c.to_string(),
            code: format!("Digit{c}"),
            key_code: c as u32,
            text,
        }
    } else {
        KeyDefinition {
            key: c.to_string(),
            code: String::new(),
            key_code: 0,
            text,
        }
    }
}

/// Modifier bit for a modifier key name, zero for ordinary keys.
pub fn modifier_bit(key: &str) -> u32 {
    match key {
        "Alt" => modifiers::ALT,
        "Control" => modifiers::CONTROL,
        "Meta" => modifiers::META,
        "Shift" => modifiers::SHIFT,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_keys() {
        let enter = key_definition("Enter");
        assert_eq!(enter.key_code, 13);
        assert_eq!(enter.text.as_deref(), Some("\r"));
        assert_eq!(key_definition("ArrowUp").code, "ArrowUp");
        assert_eq!(key_definition("F5").key_code, 116);
    }

    #[test]
    fn test_character_keys() {
        let a = key_definition("a");
        assert_eq!(a.code, "KeyA");
        assert_eq!(a.key_code, 65);
        assert_eq!(a.text.as_deref(), Some("a"));
        assert_eq!(key_definition("7").code, "Digit7");
        assert_eq!(key_definition("/").text.as_deref(), Some("/"));
    }

    #[test]
    fn test_modifier_bits() {
        assert_eq!(modifier_bit("Control") | modifier_bit("Shift"), 10);
        assert_eq!(modifier_bit("a"), 0);
    }
}

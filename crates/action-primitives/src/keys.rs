//! Logical key names to concrete DOM keys, chords and human-paced typing.

use std::ops::RangeInclusive;
use std::time::Duration;

use cdp_adapter::{modifier_bit, PageDriver};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::errors::ActionError;

/// Host platform, used to map `CMD` onto the right modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    MacOs,
    Other,
}

impl Platform {
    pub fn detect() -> Self {
        if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Other
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Platform::detect()
    }
}

/// Maps a logical key name (`ENTER`, `ARROW_UP`, `cmd`) to a DOM `key` value.
/// Single characters and unknown names pass through unchanged.
pub fn normalize_key(name: &str, platform: Platform) -> String {
    if name == " " {
        return name.to_string();
    }
    let trimmed = name.trim();
    if trimmed.chars().count() <= 1 {
        return trimmed.to_string();
    }

    let upper = trimmed.to_ascii_uppercase().replace(['-', ' '], "_");
    let key = match upper.as_str() {
        "ENTER" | "RETURN" => "Enter",
        "TAB" => "Tab",
        "SPACE" | "SPACEBAR" => " ",
        "BACKSPACE" => "Backspace",
        "DELETE" | "DEL" => "Delete",
        "INSERT" | "INS" => "Insert",
        "ESC" | "ESCAPE" => "Escape",
        "UP" | "ARROWUP" | "ARROW_UP" => "ArrowUp",
        "DOWN" | "ARROWDOWN" | "ARROW_DOWN" => "ArrowDown",
        "LEFT" | "ARROWLEFT" | "ARROW_LEFT" => "ArrowLeft",
        "RIGHT" | "ARROWRIGHT" | "ARROW_RIGHT" => "ArrowRight",
        "HOME" => "Home",
        "END" => "End",
        "PAGEUP" | "PAGE_UP" | "PGUP" => "PageUp",
        "PAGEDOWN" | "PAGE_DOWN" | "PGDN" => "PageDown",
        "SHIFT" => "Shift",
        "CTRL" | "CONTROL" => "Control",
        "ALT" | "OPTION" => "Alt",
        "META" | "SUPER" | "WIN" | "WINDOWS" => "Meta",
        "CMD" | "COMMAND" => match platform {
            Platform::MacOs => "Meta",
            Platform::Other => "Control",
        },
        fkey if is_function_key(fkey) => return fkey.to_string(),
        _ => return trimmed.to_string(),
    };
    key.to_string()
}

fn is_function_key(upper: &str) -> bool {
    upper
        .strip_prefix('F')
        .and_then(|rest| rest.parse::<u8>().ok())
        .is_some_and(|n| (1..=12).contains(&n))
}

/// Splits `"ctrl+shift+t"` into its keys; a trailing `++` means the plus key itself.
pub fn split_chord(text: &str) -> Vec<String> {
    let text = text.trim();
    if text == "+" {
        return vec!["+".to_string()];
    }
    let mut keys: Vec<String> = text
        .split('+')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect();
    if text.ends_with("++") {
        keys.push("+".to_string());
    }
    keys
}

/// Presses `keys` down in order and releases them in reverse, tracking modifier state.
pub async fn press_chord<D>(driver: &D, keys: &[String], platform: Platform) -> Result<(), ActionError>
where
    D: PageDriver + ?Sized,
{
    let keys: Vec<String> = keys.iter().map(|key| normalize_key(key, platform)).collect();
    if keys.is_empty() {
        return Err(ActionError::InvalidArgument("empty key chord".to_string()));
    }

    let mut active = 0;
    for key in &keys {
        active |= modifier_bit(key);
        driver.key_down(key, active).await?;
    }
    for key in keys.iter().rev() {
        active &= !modifier_bit(key);
        driver.key_up(key, active).await?;
    }
    Ok(())
}

/// Types `text` one key at a time with a random pause from `delay_ms` after each key.
pub async fn type_humanlike<D>(
    driver: &D,
    text: &str,
    delay_ms: RangeInclusive<u64>,
) -> Result<(), ActionError>
where
    D: PageDriver + ?Sized,
{
    for ch in text.chars() {
        let key = match ch {
            '\n' | '\r' => "Enter".to_string(),
            '\t' => "Tab".to_string(),
            other => other.to_string(),
        };
        driver.key_down(&key, 0).await?;
        driver.key_up(&key, 0).await?;
        let delay = rand::thread_rng().gen_range(delay_ms.clone());
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    Ok(())
}

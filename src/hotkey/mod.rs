//! Global hotkey detection
//!
//! On Linux, key events are read at the kernel level through evdev, which
//! works under every Wayland compositor and X11. The user must be in the
//! 'input' group. Other platforms use rdev's global event tap.
//!
//! Hotkeys are written as a single key (`menu`, `f12`, `pause`, `a`) or a
//! `+` combination whose last part is the key (`ctrl+alt+s`). Modifiers
//! match either the left or the right physical key.

#[cfg(target_os = "linux")]
pub mod evdev_listener;
#[cfg(not(target_os = "linux"))]
pub mod rdev_listener;

use crate::error::{ConfigError, HotkeyError};
use serde::Serialize;
use tokio::sync::mpsc;

/// Events emitted by the hotkey listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyEvent {
    /// The hotkey was pressed
    Pressed,
    /// The hotkey was released
    Released,
}

/// Modifier part of a combination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    Ctrl,
    Alt,
    Shift,
    Super,
}

impl Modifier {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "ctrl" | "control" | "lctrl" | "rctrl" => Some(Modifier::Ctrl),
            "alt" | "option" | "opt" | "lalt" | "ralt" | "altgr" => Some(Modifier::Alt),
            "shift" | "lshift" | "rshift" => Some(Modifier::Shift),
            "super" | "meta" | "cmd" | "command" | "win" | "windows" => Some(Modifier::Super),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Modifier::Ctrl => "ctrl",
            Modifier::Alt => "alt",
            Modifier::Shift => "shift",
            Modifier::Super => "super",
        }
    }
}

/// Named keys accepted besides letters, digits and f1-f24
const SPECIAL_KEYS: &[&str] = &[
    "menu", "pause", "scrolllock", "capslock", "numlock", "insert", "home", "end", "pageup",
    "pagedown", "delete", "space", "enter", "tab", "esc", "backspace", "grave", "mute",
    "volumedown", "volumeup", "playpause", "nextsong", "previoussong", "print",
];

fn canonical_key(token: &str) -> Option<String> {
    let alias = match token {
        "escape" => "esc",
        "return" => "enter",
        "del" => "delete",
        "ins" => "insert",
        "scroll_lock" | "scroll" => "scrolllock",
        "caps_lock" => "capslock",
        "page_up" | "pgup" => "pageup",
        "page_down" | "pgdn" => "pagedown",
        "backtick" => "grave",
        "application" | "apps" | "compose" => "menu",
        "printscreen" | "prtsc" => "print",
        other => other,
    };

    let is_function_key = alias
        .strip_prefix('f')
        .and_then(|n| n.parse::<u8>().ok())
        .is_some_and(|n| (1..=24).contains(&n));
    let is_single_char = alias.len() == 1 && alias.chars().all(|c| c.is_ascii_alphanumeric());

    if is_function_key || is_single_char || SPECIAL_KEYS.contains(&alias) {
        Some(alias.to_string())
    } else {
        None
    }
}

/// A parsed hotkey: one key plus the modifiers that must be held with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotkeySpec {
    raw: String,
    key: String,
    modifiers: Vec<Modifier>,
}

impl HotkeySpec {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        let normalized = name.trim().to_lowercase();
        let invalid = || ConfigError::InvalidHotkey(name.to_string());

        let parts: Vec<&str> = normalized.split('+').map(str::trim).collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid());
        }

        let (key_token, modifier_tokens) = parts.split_last().ok_or_else(invalid)?;
        let key = canonical_key(key_token).ok_or_else(invalid)?;

        let mut modifiers = Vec::new();
        for token in modifier_tokens {
            let modifier = Modifier::parse(token).ok_or_else(invalid)?;
            if !modifiers.contains(&modifier) {
                modifiers.push(modifier);
            }
        }

        Ok(Self {
            raw: normalized,
            key,
            modifiers,
        })
    }

    /// The hotkey as configured (lowercased)
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn modifiers(&self) -> &[Modifier] {
        &self.modifiers
    }

    pub fn is_combination(&self) -> bool {
        !self.modifiers.is_empty()
    }

    pub fn description(&self) -> String {
        if self.is_combination() {
            format!("Combination: {}", self.raw)
        } else {
            format!("Single key: {}", self.raw)
        }
    }
}

impl std::fmt::Display for HotkeySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Trait for hotkey detection implementations
#[async_trait::async_trait]
pub trait HotkeyListener: Send + Sync {
    /// Start listening for hotkey events
    /// Returns a channel receiver for events
    async fn start(&mut self) -> Result<mpsc::Receiver<HotkeyEvent>, HotkeyError>;

    /// Stop listening and clean up
    async fn stop(&mut self) -> Result<(), HotkeyError>;
}

/// The platform facility that turns a [`HotkeySpec`] into a listener
pub trait HotkeyHook: Send + Sync {
    fn install(&self, spec: &HotkeySpec) -> Result<Box<dyn HotkeyListener>, HotkeyError>;
}

/// Hook backed by the platform's global input facility
pub struct SystemHotkeyHook;

impl HotkeyHook for SystemHotkeyHook {
    fn install(&self, spec: &HotkeySpec) -> Result<Box<dyn HotkeyListener>, HotkeyError> {
        create_listener(spec)
    }
}

/// Factory function to create the appropriate hotkey listener
///
/// On Linux, uses evdev for kernel-level key event detection.
#[cfg(target_os = "linux")]
pub fn create_listener(spec: &HotkeySpec) -> Result<Box<dyn HotkeyListener>, HotkeyError> {
    Ok(Box::new(evdev_listener::EvdevListener::new(spec)?))
}

/// Factory function to create the appropriate hotkey listener
///
/// Elsewhere, uses rdev's global event tap (needs Accessibility permission on macOS).
#[cfg(not(target_os = "linux"))]
pub fn create_listener(spec: &HotkeySpec) -> Result<Box<dyn HotkeyListener>, HotkeyError> {
    Ok(Box::new(rdev_listener::RdevListener::new(spec)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_key() {
        let spec = HotkeySpec::parse("menu").unwrap();
        assert_eq!(spec.key(), "menu");
        assert!(!spec.is_combination());
        assert_eq!(spec.description(), "Single key: menu");

        assert_eq!(HotkeySpec::parse("F12").unwrap().key(), "f12");
        assert_eq!(HotkeySpec::parse("a").unwrap().key(), "a");
        assert_eq!(HotkeySpec::parse("Escape").unwrap().key(), "esc");
    }

    #[test]
    fn test_parse_combination() {
        let spec = HotkeySpec::parse("Ctrl+Alt+S").unwrap();
        assert_eq!(spec.key(), "s");
        assert_eq!(spec.modifiers(), &[Modifier::Ctrl, Modifier::Alt]);
        assert!(spec.is_combination());
        assert_eq!(spec.description(), "Combination: ctrl+alt+s");
        assert_eq!(spec.to_string(), "ctrl+alt+s");
    }

    #[test]
    fn test_parse_rejects_bad_specs() {
        for bad in ["", "ctrl+", "+s", "ctrl++s", "hyper+s", "f25", "notakey", "s+ctrl"] {
            assert!(
                matches!(HotkeySpec::parse(bad), Err(ConfigError::InvalidHotkey(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_duplicate_modifiers_collapse() {
        let spec = HotkeySpec::parse("ctrl+control+x").unwrap();
        assert_eq!(spec.modifiers(), &[Modifier::Ctrl]);
    }
}

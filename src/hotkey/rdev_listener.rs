//! rdev-based hotkey listener for platforms without evdev
//!
//! On macOS this needs Accessibility permission for the terminal or app
//! that launched the server. rdev's `listen` cannot be cancelled, so
//! stopping only mutes the callback; the thread ends with the process.

use super::{HotkeyEvent, HotkeyListener, HotkeySpec, Modifier};
use crate::error::HotkeyError;
use rdev::{listen, Event, EventType, Key};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Minimum time between two presses
const DEBOUNCE: Duration = Duration::from_millis(100);

pub struct RdevListener {
    target_key: Key,
    modifier_groups: Vec<Vec<Key>>,
    running: Arc<AtomicBool>,
}

impl RdevListener {
    pub fn new(spec: &HotkeySpec) -> Result<Self, HotkeyError> {
        let target_key =
            parse_key_name(spec.key()).ok_or_else(|| HotkeyError::UnknownKey(spec.key().to_string()))?;

        Ok(Self {
            target_key,
            modifier_groups: spec.modifiers().iter().map(|m| modifier_keys(*m)).collect(),
            running: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait::async_trait]
impl HotkeyListener for RdevListener {
    async fn start(&mut self) -> Result<mpsc::Receiver<HotkeyEvent>, HotkeyError> {
        let (tx, rx) = mpsc::channel(32);
        let target_key = self.target_key;
        let modifier_groups = self.modifier_groups.clone();
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        std::thread::spawn(move || {
            let mut held: HashSet<Key> = HashSet::new();
            let mut is_pressed = false;
            let mut last_press = Instant::now() - Duration::from_secs(10);

            let callback = move |event: Event| {
                if !running.load(Ordering::SeqCst) {
                    return;
                }

                let hotkey_event = match event.event_type {
                    EventType::KeyPress(key) if key == target_key => {
                        let modifiers_held = modifier_groups
                            .iter()
                            .all(|group| group.iter().any(|k| held.contains(k)));
                        if is_pressed || !modifiers_held || last_press.elapsed() < DEBOUNCE {
                            return;
                        }
                        is_pressed = true;
                        last_press = Instant::now();
                        HotkeyEvent::Pressed
                    }
                    EventType::KeyRelease(key) if key == target_key && is_pressed => {
                        is_pressed = false;
                        HotkeyEvent::Released
                    }
                    EventType::KeyPress(key) => {
                        held.insert(key);
                        return;
                    }
                    EventType::KeyRelease(key) => {
                        held.remove(&key);
                        return;
                    }
                    _ => return,
                };

                let _ = tx.blocking_send(hotkey_event);
            };

            // This blocks until an error occurs or the process is terminated
            if let Err(e) = listen(callback) {
                tracing::error!("rdev listen error: {:?}", e);
                tracing::warn!(
                    "Global hotkey capture failed. On macOS grant Accessibility permission in \
                     System Settings > Privacy & Security > Accessibility."
                );
            }
        });

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), HotkeyError> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn modifier_keys(modifier: Modifier) -> Vec<Key> {
    match modifier {
        Modifier::Ctrl => vec![Key::ControlLeft, Key::ControlRight],
        Modifier::Alt => vec![Key::Alt, Key::AltGr],
        Modifier::Shift => vec![Key::ShiftLeft, Key::ShiftRight],
        Modifier::Super => vec![Key::MetaLeft, Key::MetaRight],
    }
}

/// Map a canonical key name to rdev's Key
fn parse_key_name(name: &str) -> Option<Key> {
    let key = match name {
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,

        "pause" => Key::Pause,
        "scrolllock" => Key::ScrollLock,
        "capslock" => Key::CapsLock,
        "numlock" => Key::NumLock,
        "insert" => Key::Insert,
        "print" => Key::PrintScreen,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" => Key::PageUp,
        "pagedown" => Key::PageDown,
        "delete" => Key::Delete,
        "space" => Key::Space,
        "enter" => Key::Return,
        "tab" => Key::Tab,
        "backspace" => Key::Backspace,
        "esc" => Key::Escape,
        "grave" => Key::BackQuote,

        "a" => Key::KeyA,
        "b" => Key::KeyB,
        "c" => Key::KeyC,
        "d" => Key::KeyD,
        "e" => Key::KeyE,
        "f" => Key::KeyF,
        "g" => Key::KeyG,
        "h" => Key::KeyH,
        "i" => Key::KeyI,
        "j" => Key::KeyJ,
        "k" => Key::KeyK,
        "l" => Key::KeyL,
        "m" => Key::KeyM,
        "n" => Key::KeyN,
        "o" => Key::KeyO,
        "p" => Key::KeyP,
        "q" => Key::KeyQ,
        "r" => Key::KeyR,
        "s" => Key::KeyS,
        "t" => Key::KeyT,
        "u" => Key::KeyU,
        "v" => Key::KeyV,
        "w" => Key::KeyW,
        "x" => Key::KeyX,
        "y" => Key::KeyY,
        "z" => Key::KeyZ,

        "0" => Key::Num0,
        "1" => Key::Num1,
        "2" => Key::Num2,
        "3" => Key::Num3,
        "4" => Key::Num4,
        "5" => Key::Num5,
        "6" => Key::Num6,
        "7" => Key::Num7,
        "8" => Key::Num8,
        "9" => Key::Num9,

        // menu, f13-f24 and media keys have no rdev equivalent
        _ => return None,
    };
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_name() {
        assert_eq!(parse_key_name("f12"), Some(Key::F12));
        assert_eq!(parse_key_name("s"), Some(Key::KeyS));
        assert_eq!(parse_key_name("menu"), None);
    }
}

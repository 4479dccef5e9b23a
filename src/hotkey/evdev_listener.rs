//! evdev-based hotkey listener
//!
//! Uses the Linux evdev interface to detect key presses at the kernel level.
//! This works on all Wayland compositors because it bypasses the display server.
//!
//! The user must be in the 'input' group to access /dev/input/* devices.

use super::{HotkeyEvent, HotkeyListener, HotkeySpec, Modifier};
use crate::error::HotkeyError;
use evdev::{Device, InputEventKind, Key};
use std::collections::HashSet;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};

/// evdev-based hotkey listener
pub struct EvdevListener {
    /// Physical keys that count as the hotkey
    target_keys: HashSet<Key>,
    /// One group per modifier; any key of a group satisfies it
    modifier_groups: Vec<Vec<Key>>,
    /// Paths to keyboard devices
    device_paths: Vec<PathBuf>,
    /// Signal to stop the listener task
    stop_signal: Option<oneshot::Sender<()>>,
}

impl EvdevListener {
    /// Create a new evdev listener for the hotkey
    pub fn new(spec: &HotkeySpec) -> Result<Self, HotkeyError> {
        let target_keys = parse_key_name(spec.key())?.into_iter().collect();
        let modifier_groups = spec.modifiers().iter().map(|m| modifier_keys(*m)).collect();

        let device_paths = find_keyboard_devices()?;

        if device_paths.is_empty() {
            return Err(HotkeyError::NoKeyboard);
        }

        tracing::debug!(
            "Found {} keyboard device(s): {:?}",
            device_paths.len(),
            device_paths
        );

        Ok(Self {
            target_keys,
            modifier_groups,
            device_paths,
            stop_signal: None,
        })
    }
}

#[async_trait::async_trait]
impl HotkeyListener for EvdevListener {
    async fn start(&mut self) -> Result<mpsc::Receiver<HotkeyEvent>, HotkeyError> {
        let (tx, rx) = mpsc::channel(32);
        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop_signal = Some(stop_tx);

        let matcher = KeyMatcher {
            target_keys: self.target_keys.clone(),
            modifier_groups: self.modifier_groups.clone(),
        };
        let device_paths = self.device_paths.clone();

        // Spawn the listener task
        tokio::task::spawn_blocking(move || {
            evdev_listener_loop(device_paths, matcher, tx, stop_rx);
        });

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), HotkeyError> {
        if let Some(stop) = self.stop_signal.take() {
            let _ = stop.send(());
        }
        Ok(())
    }
}

/// Tracks modifier state and turns raw key events into hotkey events
struct KeyMatcher {
    target_keys: HashSet<Key>,
    modifier_groups: Vec<Vec<Key>>,
}

impl KeyMatcher {
    fn is_modifier(&self, key: Key) -> bool {
        self.modifier_groups.iter().any(|group| group.contains(&key))
    }

    fn modifiers_satisfied(&self, held: &HashSet<Key>) -> bool {
        self.modifier_groups
            .iter()
            .all(|group| group.iter().any(|k| held.contains(k)))
    }
}

/// Main listener loop running in a blocking task
fn evdev_listener_loop(
    device_paths: Vec<PathBuf>,
    matcher: KeyMatcher,
    tx: mpsc::Sender<HotkeyEvent>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    // Open all keyboard devices in non-blocking mode
    let mut devices: Vec<Device> = device_paths
        .iter()
        .filter_map(|path| match Device::open(path) {
            Ok(device) => {
                // Set device to non-blocking mode so fetch_events doesn't block
                let fd = device.as_raw_fd();
                unsafe {
                    let flags = libc::fcntl(fd, libc::F_GETFL);
                    if flags != -1 {
                        libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
                    }
                }
                tracing::debug!("Opened device (non-blocking): {:?}", path);
                Some(device)
            }
            Err(e) => {
                tracing::warn!("Failed to open {:?}: {}", path, e);
                None
            }
        })
        .collect();

    if devices.is_empty() {
        tracing::error!("No keyboard devices could be opened");
        return;
    }

    let mut held_modifiers: HashSet<Key> = HashSet::new();

    // Track if we're currently "pressed" (to handle repeat events)
    let mut is_pressed = false;

    tracing::info!("Listening for {:?}", matcher.target_keys);

    loop {
        // Check for stop signal (non-blocking)
        match stop_rx.try_recv() {
            Ok(_) | Err(oneshot::error::TryRecvError::Closed) => {
                tracing::debug!("Hotkey listener stopping");
                return;
            }
            Err(oneshot::error::TryRecvError::Empty) => {}
        }

        for device in &mut devices {
            // fetch_events returns immediately if no events (non-blocking)
            let Ok(events) = device.fetch_events() else {
                continue;
            };
            for event in events {
                let InputEventKind::Key(key) = event.kind() else {
                    continue;
                };
                let value = event.value();

                if matcher.is_modifier(key) {
                    match value {
                        1 => {
                            held_modifiers.insert(key);
                        }
                        0 => {
                            held_modifiers.remove(&key);
                        }
                        _ => {}
                    }
                }

                if !matcher.target_keys.contains(&key) {
                    continue;
                }

                let hotkey_event = match value {
                    // Key press (not repeat)
                    1 if !is_pressed && matcher.modifiers_satisfied(&held_modifiers) => {
                        is_pressed = true;
                        HotkeyEvent::Pressed
                    }
                    0 if is_pressed => {
                        is_pressed = false;
                        HotkeyEvent::Released
                    }
                    // Key repeat, or press without the modifiers
                    _ => continue,
                };

                tracing::debug!("Hotkey {:?}", hotkey_event);
                if tx.blocking_send(hotkey_event).is_err() {
                    return; // Channel closed
                }
            }
        }

        // Small sleep to avoid busy-waiting
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
}

/// Find all keyboard input devices
fn find_keyboard_devices() -> Result<Vec<PathBuf>, HotkeyError> {
    let mut keyboards = Vec::new();

    let input_dir = std::fs::read_dir("/dev/input").map_err(|e| {
        HotkeyError::DeviceAccess(format!("/dev/input: {}", e))
    })?;

    for entry in input_dir {
        let entry = entry.map_err(|e| HotkeyError::DeviceAccess(e.to_string()))?;
        let path = entry.path();

        // Only look at event* devices
        let is_event_device = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("event"))
            .unwrap_or(false);

        if !is_event_device {
            continue;
        }

        // Try to open and check if it's a keyboard
        match Device::open(&path) {
            Ok(device) => {
                // Check if device has keyboard capabilities
                let has_keys = device
                    .supported_keys()
                    .map(|keys| {
                        // A keyboard should have at least some letter keys
                        keys.contains(Key::KEY_A)
                            && keys.contains(Key::KEY_Z)
                            && keys.contains(Key::KEY_ENTER)
                    })
                    .unwrap_or(false);

                if has_keys {
                    tracing::debug!(
                        "Found keyboard: {:?} ({:?})",
                        path,
                        device.name().unwrap_or("unknown")
                    );
                    keyboards.push(path);
                }
            }
            Err(e) => {
                // Permission denied is common for non-input-group users
                if e.kind() == std::io::ErrorKind::PermissionDenied {
                    return Err(HotkeyError::DeviceAccess(path.display().to_string()));
                }
                // Other errors (device busy, etc.) - just skip
                tracing::trace!("Skipping {:?}: {}", path, e);
            }
        }
    }

    Ok(keyboards)
}

/// Both physical keys for a modifier
fn modifier_keys(modifier: Modifier) -> Vec<Key> {
    match modifier {
        Modifier::Ctrl => vec![Key::KEY_LEFTCTRL, Key::KEY_RIGHTCTRL],
        Modifier::Alt => vec![Key::KEY_LEFTALT, Key::KEY_RIGHTALT],
        Modifier::Shift => vec![Key::KEY_LEFTSHIFT, Key::KEY_RIGHTSHIFT],
        Modifier::Super => vec![Key::KEY_LEFTMETA, Key::KEY_RIGHTMETA],
    }
}

/// Map a canonical key name to the evdev key(s) that produce it
fn parse_key_name(name: &str) -> Result<Vec<Key>, HotkeyError> {
    let key = match name {
        // PC keyboards report the context-menu key as COMPOSE
        "menu" => return Ok(vec![Key::KEY_COMPOSE, Key::KEY_MENU]),

        // Lock keys
        "scrolllock" => Key::KEY_SCROLLLOCK,
        "pause" => Key::KEY_PAUSE,
        "capslock" => Key::KEY_CAPSLOCK,
        "numlock" => Key::KEY_NUMLOCK,
        "insert" => Key::KEY_INSERT,
        "print" => Key::KEY_SYSRQ,

        // Function keys
        "f1" => Key::KEY_F1,
        "f2" => Key::KEY_F2,
        "f3" => Key::KEY_F3,
        "f4" => Key::KEY_F4,
        "f5" => Key::KEY_F5,
        "f6" => Key::KEY_F6,
        "f7" => Key::KEY_F7,
        "f8" => Key::KEY_F8,
        "f9" => Key::KEY_F9,
        "f10" => Key::KEY_F10,
        "f11" => Key::KEY_F11,
        "f12" => Key::KEY_F12,
        "f13" => Key::KEY_F13,
        "f14" => Key::KEY_F14,
        "f15" => Key::KEY_F15,
        "f16" => Key::KEY_F16,
        "f17" => Key::KEY_F17,
        "f18" => Key::KEY_F18,
        "f19" => Key::KEY_F19,
        "f20" => Key::KEY_F20,
        "f21" => Key::KEY_F21,
        "f22" => Key::KEY_F22,
        "f23" => Key::KEY_F23,
        "f24" => Key::KEY_F24,

        // Navigation keys
        "home" => Key::KEY_HOME,
        "end" => Key::KEY_END,
        "pageup" => Key::KEY_PAGEUP,
        "pagedown" => Key::KEY_PAGEDOWN,
        "delete" => Key::KEY_DELETE,

        "space" => Key::KEY_SPACE,
        "enter" => Key::KEY_ENTER,
        "tab" => Key::KEY_TAB,
        "backspace" => Key::KEY_BACKSPACE,
        "esc" => Key::KEY_ESC,
        "grave" => Key::KEY_GRAVE,

        // Media keys
        "mute" => Key::KEY_MUTE,
        "volumedown" => Key::KEY_VOLUMEDOWN,
        "volumeup" => Key::KEY_VOLUMEUP,
        "playpause" => Key::KEY_PLAYPAUSE,
        "nextsong" => Key::KEY_NEXTSONG,
        "previoussong" => Key::KEY_PREVIOUSSONG,

        // Letters
        "a" => Key::KEY_A,
        "b" => Key::KEY_B,
        "c" => Key::KEY_C,
        "d" => Key::KEY_D,
        "e" => Key::KEY_E,
        "f" => Key::KEY_F,
        "g" => Key::KEY_G,
        "h" => Key::KEY_H,
        "i" => Key::KEY_I,
        "j" => Key::KEY_J,
        "k" => Key::KEY_K,
        "l" => Key::KEY_L,
        "m" => Key::KEY_M,
        "n" => Key::KEY_N,
        "o" => Key::KEY_O,
        "p" => Key::KEY_P,
        "q" => Key::KEY_Q,
        "r" => Key::KEY_R,
        "s" => Key::KEY_S,
        "t" => Key::KEY_T,
        "u" => Key::KEY_U,
        "v" => Key::KEY_V,
        "w" => Key::KEY_W,
        "x" => Key::KEY_X,
        "y" => Key::KEY_Y,
        "z" => Key::KEY_Z,

        // Digits
        "0" => Key::KEY_0,
        "1" => Key::KEY_1,
        "2" => Key::KEY_2,
        "3" => Key::KEY_3,
        "4" => Key::KEY_4,
        "5" => Key::KEY_5,
        "6" => Key::KEY_6,
        "7" => Key::KEY_7,
        "8" => Key::KEY_8,
        "9" => Key::KEY_9,

        // If not found, return error with suggestions
        _ => {
            return Err(HotkeyError::UnknownKey(format!(
                "{}. Try: menu, pause, scrolllock, f1-f24, or run 'evtest' to find key names",
                name
            )));
        }
    };

    Ok(vec![key])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_name() {
        assert_eq!(parse_key_name("scrolllock").unwrap(), vec![Key::KEY_SCROLLLOCK]);
        assert_eq!(parse_key_name("f13").unwrap(), vec![Key::KEY_F13]);
        assert_eq!(parse_key_name("s").unwrap(), vec![Key::KEY_S]);
        assert!(parse_key_name("menu").unwrap().contains(&Key::KEY_COMPOSE));
    }

    #[test]
    fn test_every_accepted_spec_key_maps() {
        for name in super::super::SPECIAL_KEYS {
            assert!(parse_key_name(name).is_ok(), "{} has no evdev mapping", name);
        }
    }

    #[test]
    fn test_modifiers_match_either_side() {
        let matcher = KeyMatcher {
            target_keys: [Key::KEY_S].into_iter().collect(),
            modifier_groups: vec![modifier_keys(Modifier::Ctrl), modifier_keys(Modifier::Alt)],
        };
        let held: HashSet<Key> = [Key::KEY_RIGHTCTRL, Key::KEY_LEFTALT].into_iter().collect();
        assert!(matcher.modifiers_satisfied(&held));

        let held: HashSet<Key> = [Key::KEY_RIGHTCTRL].into_iter().collect();
        assert!(!matcher.modifiers_satisfied(&held));
        assert!(matcher.is_modifier(Key::KEY_LEFTCTRL));
    }
}

//! Error types for voice-mcp
//!
//! Uses thiserror for ergonomic error definitions with clear messages
//! that guide users toward fixing common issues. The tool surface turns
//! every one of these into a status string; none of them cross the
//! MCP boundary as a protocol fault.

use thiserror::Error;

/// Top-level error type for the voice-mcp application
#[derive(Error, Debug)]
pub enum VoiceMcpError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Readiness error: {0}")]
    Readiness(#[from] ReadinessError),

    #[error("Hotkey lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Hotkey error: {0}")]
    Hotkey(#[from] HotkeyError),

    #[error("Hotkey monitor error: {0}")]
    Monitor(#[from] MonitorError),

    #[error("Audio capture error: {0}")]
    Audio(#[from] AudioError),

    #[error("Transcription error: {0}")]
    Transcribe(#[from] TranscribeError),

    #[error("Speech synthesis error: {0}")]
    Tts(#[from] TtsError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while resolving configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Invalid hotkey '{0}'. Use a key name (menu, f12, pause) or a combination like ctrl+alt+s.")]
    InvalidHotkey(String),
}

/// Errors from the component readiness state machine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadinessError {
    #[error("Component '{0}' is already registered")]
    DuplicateComponent(String),

    #[error("Component '{0}' is not registered")]
    UnknownComponent(String),

    #[error("Component '{name}' cannot move from {from} to {to}")]
    InvalidTransition {
        name: String,
        from: String,
        to: String,
    },

    #[error("Timed out waiting for component '{0}'")]
    Timeout(String),
}

/// Errors from the cross-process hotkey lock backends
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Lock backend unavailable: {0}")]
    Unavailable(String),

    #[error("Lock directory {path} is not usable: {source}")]
    Directory {
        path: String,
        source: std::io::Error,
    },

    #[error("Lock marker {path}: {source}")]
    Marker {
        path: String,
        source: std::io::Error,
    },

    #[error("Semaphore operation failed: {0}")]
    Semaphore(std::io::Error),
}

/// Errors related to hotkey detection
#[derive(Error, Debug)]
pub enum HotkeyError {
    #[error("Cannot open input device '{0}'. Is the user in the 'input' group?\n  Run: sudo usermod -aG input $USER\n  Then log out and back in.")]
    DeviceAccess(String),

    #[error("Unknown key name: '{0}'. Use evtest or wev to find valid key names.")]
    UnknownKey(String),

    #[error("No keyboard device found in /dev/input/")]
    NoKeyboard,

    #[error("Global hotkeys are not supported here: {0}")]
    Unsupported(String),

    #[error("Hotkey listener error: {0}")]
    Listener(String),
}

/// Errors from the hotkey monitor lifecycle
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Hotkey monitoring is already active")]
    AlreadyMonitoring,

    #[error("Hotkey monitoring is unavailable: {0}")]
    MonitoringUnavailable(#[from] HotkeyError),

    #[error("Hotkey monitoring is disabled in configuration")]
    Disabled,

    #[error("{0}")]
    Config(#[from] ConfigError),
}

/// Errors related to audio capture and playback
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Audio connection failed: {0}")]
    Connection(String),

    #[error("Audio device not found: '{0}'. List devices with: pactl list sources short")]
    DeviceNotFound(String),

    #[error("No audio was captured. Check your microphone.")]
    EmptyRecording,

    #[error("Audio stream error: {0}")]
    StreamError(String),

    #[error("Audio playback error: {0}")]
    Playback(String),
}

/// Errors related to speech-to-text transcription
#[derive(Error, Debug)]
pub enum TranscribeError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Whisper initialization failed: {0}")]
    InitFailed(String),

    #[error("Transcription failed: {0}")]
    InferenceFailed(String),

    #[error("Audio format error: {0}")]
    AudioFormat(String),

    #[error("No speech detected before the silence threshold elapsed")]
    NoSpeech,

    #[error("Speech-to-text is disabled in configuration")]
    Disabled,

    #[error("Speech-to-text is not ready: {0}")]
    NotReady(String),

    #[error("Audio capture failed: {0}")]
    Audio(#[from] AudioError),
}

/// Errors related to speech synthesis
#[derive(Error, Debug)]
pub enum TtsError {
    #[error("No speech synthesizer found. Install espeak-ng, speech-dispatcher (spd-say) or use macOS 'say'.")]
    EngineNotFound,

    #[error("Speech engine '{0}' not found in PATH")]
    EngineMissing(String),

    #[error("Speech synthesis is disabled in configuration")]
    Disabled,

    #[error("Speech engine failed: {0}")]
    Failed(String),
}

/// Errors related to text output
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("ydotool daemon not running.\n  Start with: systemctl --user start ydotool\n  Enable at boot: systemctl --user enable ydotool")]
    YdotoolNotRunning,

    #[error("{0} not found in PATH. Install it via your package manager.")]
    ToolNotFound(&'static str),

    #[error("Text injection failed: {0}")]
    InjectionFailed(String),

    #[error("Output mode '{0}' is disabled in configuration")]
    ModeDisabled(String),

    #[error("All output methods failed. Ensure wtype, ydotool, xdotool or a clipboard tool is available.")]
    AllMethodsFailed,
}

/// Result type alias using VoiceMcpError
pub type Result<T> = std::result::Result<T, VoiceMcpError>;


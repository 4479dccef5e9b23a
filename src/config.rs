//! Configuration loading and types for voice-mcp
//!
//! Configuration is loaded in layers:
//! 1. Built-in defaults
//! 2. Config file (~/.config/voice-mcp/config.toml)
//! 3. Environment variables (VOICE_MCP_*)
//! 4. CLI arguments (highest priority)
//!
//! Values are resolved once at startup and then shared read-only.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where transcribed hotkey text goes
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Type the text at the cursor position
    #[default]
    Typing,
    /// Copy the text to the clipboard
    Clipboard,
    /// Keep the text and report it through the hotkey status
    Return,
}

impl OutputMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputMode::Typing => "typing",
            OutputMode::Clipboard => "clipboard",
            OutputMode::Return => "return",
        }
    }
}

impl std::fmt::Display for OutputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OutputMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "typing" | "type" => Ok(OutputMode::Typing),
            "clipboard" => Ok(OutputMode::Clipboard),
            "return" => Ok(OutputMode::Return),
            other => Err(ConfigError::InvalidValue {
                key: "hotkey.output_mode".to_string(),
                value: other.to_string(),
                reason: "expected typing, clipboard or return".to_string(),
            }),
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Default log level when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub tts: TtsConfig,

    #[serde(default)]
    pub stt: SttConfig,

    #[serde(default)]
    pub hotkey: HotkeyConfig,

    #[serde(default)]
    pub audio_cues: AudioCueConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

/// Text-to-speech configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TtsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Warm up the speech engine in the background at startup
    #[serde(default = "default_true")]
    pub preload: bool,

    /// Speech command: "auto", "espeak-ng", "espeak", "spd-say" or "say"
    #[serde(default = "default_tts_engine")]
    pub engine: String,

    /// Voice name passed to the speech command (engine specific)
    #[serde(default)]
    pub voice: Option<String>,

    /// Speaking rate in words per minute
    #[serde(default = "default_tts_rate")]
    pub rate: u32,

    /// Volume from 0.0 to 1.0
    #[serde(default = "default_tts_volume")]
    pub volume: f32,
}

/// Speech-to-text configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SttConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Load the whisper model in the background at startup
    #[serde(default = "default_true")]
    pub preload: bool,

    /// Model name (tiny, base, small, medium, large-v3, ...) or path to a .bin file
    #[serde(default = "default_stt_model")]
    pub model: String,

    /// Language code, or "auto" for detection
    #[serde(default = "default_stt_language")]
    pub language: String,

    /// Translate non-English speech to English
    #[serde(default)]
    pub translate: bool,

    /// Seconds of continuous silence that end a capture
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold_secs: f32,

    /// Hard cap on a single capture
    #[serde(default = "default_max_duration")]
    pub max_duration_secs: u32,

    /// RMS level above which a frame counts as speech
    #[serde(default = "default_energy_threshold")]
    pub energy_threshold: f32,

    /// Input device name, or "default"
    #[serde(default = "default_device")]
    pub device: String,

    /// Number of CPU threads for inference (auto-detected when unset)
    #[serde(default)]
    pub threads: Option<usize>,

    /// Keep loaded models in memory between sessions
    #[serde(default = "default_true")]
    pub server_mode: bool,

    /// Extra models to load alongside `model` at startup
    #[serde(default)]
    pub preload_models: Vec<String>,

    /// Most models kept in memory at once; the least recently used goes first
    #[serde(default = "default_model_cache_size")]
    pub model_cache_size: usize,

    /// Unload a model after this many seconds without use (0 keeps it forever)
    #[serde(default = "default_model_timeout")]
    pub model_timeout_secs: u64,
}

/// Dictation hotkey configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HotkeyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Start monitoring as soon as the server starts
    #[serde(default = "default_true")]
    pub auto_start: bool,

    /// Key or combination, e.g. "menu", "f12", "ctrl+alt+s"
    #[serde(default = "default_hotkey_name")]
    pub name: String,

    #[serde(default)]
    pub output_mode: OutputMode,

    #[serde(default)]
    pub lock: HotkeyLockConfig,
}

/// Cross-process hotkey lock configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HotkeyLockConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory for lock markers (auto-detected when unset)
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Use a host semaphore when the file backend cannot be used
    #[serde(default = "default_true")]
    pub semaphore_fallback: bool,

    /// A marker whose holder process is gone may be reclaimed after this age
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: f64,

    /// Any marker older than this is reclaimed, live holder or not
    #[serde(default = "default_max_hold")]
    pub max_hold_secs: f64,
}

/// Audio cue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioCueConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// "default", "subtle", or a directory containing on.wav, off.wav and error.wav
    #[serde(default = "default_cue_theme")]
    pub theme: String,

    /// Volume level (0.0 to 1.0)
    #[serde(default = "default_cue_volume")]
    pub volume: f32,
}

/// Text output configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Pause before typing so the hotkey release does not interleave with the text
    #[serde(default = "default_typing_debounce")]
    pub typing_debounce_secs: f32,

    /// Delay between typed characters in milliseconds
    #[serde(default)]
    pub type_delay_ms: u32,

    /// Fall back to clipboard if typing fails
    #[serde(default = "default_true")]
    pub fallback_to_clipboard: bool,
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_tts_engine() -> String {
    "auto".to_string()
}

fn default_tts_rate() -> u32 {
    200
}

fn default_tts_volume() -> f32 {
    0.9
}

fn default_stt_model() -> String {
    "base".to_string()
}

fn default_stt_language() -> String {
    "en".to_string()
}

fn default_silence_threshold() -> f32 {
    4.0
}

fn default_max_duration() -> u32 {
    60
}

fn default_model_cache_size() -> usize {
    2
}

fn default_model_timeout() -> u64 {
    300
}

fn default_energy_threshold() -> f32 {
    0.01
}

fn default_device() -> String {
    "default".to_string()
}

fn default_hotkey_name() -> String {
    "menu".to_string()
}

fn default_stale_after() -> f64 {
    5.0
}

fn default_max_hold() -> f64 {
    120.0
}

fn default_cue_theme() -> String {
    "default".to_string()
}

fn default_cue_volume() -> f32 {
    0.7
}

fn default_typing_debounce() -> f32 {
    0.1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tts: TtsConfig::default(),
            stt: SttConfig::default(),
            hotkey: HotkeyConfig::default(),
            audio_cues: AudioCueConfig::default(),
            output: OutputConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            preload: true,
            engine: default_tts_engine(),
            voice: None,
            rate: default_tts_rate(),
            volume: default_tts_volume(),
        }
    }
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            preload: true,
            model: default_stt_model(),
            language: default_stt_language(),
            translate: false,
            silence_threshold_secs: default_silence_threshold(),
            max_duration_secs: default_max_duration(),
            energy_threshold: default_energy_threshold(),
            device: default_device(),
            threads: None,
            server_mode: true,
            preload_models: Vec::new(),
            model_cache_size: default_model_cache_size(),
            model_timeout_secs: default_model_timeout(),
        }
    }
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_start: true,
            name: default_hotkey_name(),
            output_mode: OutputMode::default(),
            lock: HotkeyLockConfig::default(),
        }
    }
}

impl Default for HotkeyLockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
            semaphore_fallback: true,
            stale_after_secs: default_stale_after(),
            max_hold_secs: default_max_hold(),
        }
    }
}

impl Default for AudioCueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            theme: default_cue_theme(),
            volume: default_cue_volume(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            typing_debounce_secs: default_typing_debounce(),
            type_delay_ms: 0,
            fallback_to_clipboard: true,
        }
    }
}

impl HotkeyLockConfig {
    /// Directory holding lock markers, auto-detected when not configured
    pub fn resolve_directory(&self) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(|| Config::runtime_base().join("voice-mcp-locks"))
    }

    pub fn stale_after(&self) -> Duration {
        seconds(self.stale_after_secs)
    }

    pub fn max_hold(&self) -> Duration {
        seconds(self.max_hold_secs)
    }
}

impl SttConfig {
    pub fn silence_threshold(&self) -> Duration {
        seconds(f64::from(self.silence_threshold_secs))
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.max_duration_secs))
    }

    /// None when idle models are never unloaded
    pub fn model_timeout(&self) -> Option<Duration> {
        (self.model_timeout_secs > 0).then(|| Duration::from_secs(self.model_timeout_secs))
    }
}

impl OutputConfig {
    pub fn typing_debounce(&self) -> Duration {
        seconds(f64::from(self.typing_debounce_secs))
    }
}

/// Longest duration accepted for any seconds-valued setting (one day)
const MAX_SECONDS: f64 = 86_400.0;

/// Time a session may run beyond its capture cap (STT wait, inference, typing)
pub const SESSION_MARGIN_SECS: f64 = 30.0;

/// Saturating conversion; `validate` keeps real values far inside the range
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "voice-mcp")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Base directory for ephemeral cross-process files
    pub fn runtime_base() -> PathBuf {
        // Use XDG_RUNTIME_DIR if available, otherwise fall back to the temp dir
        std::env::var("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir())
    }

    /// Get the data directory path (for models)
    pub fn data_dir() -> PathBuf {
        directories::ProjectDirs::from("", "", "voice-mcp")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Get the models directory path
    pub fn models_dir() -> PathBuf {
        Self::data_dir().join("models")
    }

    /// Apply `VOICE_MCP_*` overrides using the given variable lookup
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(voice) = lookup("VOICE_MCP_TTS_VOICE") {
            self.tts.voice = Some(voice).filter(|v| !v.trim().is_empty());
        }
        if let Some(v) = lookup("VOICE_MCP_TTS_RATE") {
            self.tts.rate = parse_number("VOICE_MCP_TTS_RATE", &v)?;
        }
        if let Some(v) = lookup("VOICE_MCP_TTS_VOLUME") {
            self.tts.volume = parse_number("VOICE_MCP_TTS_VOLUME", &v)?;
        }
        if let Some(engine) = lookup("VOICE_MCP_TTS_ENGINE") {
            self.tts.engine = engine;
        }
        if let Some(v) = lookup("VOICE_MCP_TTS_PRELOAD_ENABLED") {
            self.tts.preload = parse_bool("VOICE_MCP_TTS_PRELOAD_ENABLED", &v)?;
        }
        if let Some(v) = lookup("VOICE_MCP_STT_ENABLED") {
            self.stt.enabled = parse_bool("VOICE_MCP_STT_ENABLED", &v)?;
        }
        if let Some(v) = lookup("VOICE_MCP_STT_PRELOAD_ENABLED") {
            self.stt.preload = parse_bool("VOICE_MCP_STT_PRELOAD_ENABLED", &v)?;
        }
        if let Some(model) = lookup("VOICE_MCP_STT_MODEL") {
            self.stt.model = model;
        }
        if let Some(language) = lookup("VOICE_MCP_STT_LANGUAGE") {
            self.stt.language = language;
        }
        if let Some(v) = lookup("VOICE_MCP_STT_SILENCE_THRESHOLD") {
            self.stt.silence_threshold_secs = parse_number("VOICE_MCP_STT_SILENCE_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("VOICE_MCP_STT_SERVER_MODE") {
            self.stt.server_mode = parse_bool("VOICE_MCP_STT_SERVER_MODE", &v)?;
        }
        if let Some(v) = lookup("VOICE_MCP_STT_PRELOAD_MODELS") {
            self.stt.preload_models = v
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = lookup("VOICE_MCP_STT_MODEL_CACHE_SIZE") {
            self.stt.model_cache_size = parse_number("VOICE_MCP_STT_MODEL_CACHE_SIZE", &v)?;
        }
        if let Some(v) = lookup("VOICE_MCP_STT_MODEL_TIMEOUT") {
            self.stt.model_timeout_secs = parse_number("VOICE_MCP_STT_MODEL_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("VOICE_MCP_ENABLE_HOTKEY") {
            self.hotkey.enabled = parse_bool("VOICE_MCP_ENABLE_HOTKEY", &v)?;
        }
        if let Some(name) = lookup("VOICE_MCP_HOTKEY_NAME") {
            self.hotkey.name = name;
        }
        if let Some(v) = lookup("VOICE_MCP_HOTKEY_OUTPUT_MODE") {
            self.hotkey.output_mode = v.parse()?;
        }
        if let Some(v) = lookup("VOICE_MCP_HOTKEY_LOCK_ENABLED") {
            self.hotkey.lock.enabled = parse_bool("VOICE_MCP_HOTKEY_LOCK_ENABLED", &v)?;
        }
        if let Some(dir) = lookup("VOICE_MCP_HOTKEY_LOCK_DIRECTORY") {
            self.hotkey.lock.directory = Some(PathBuf::from(dir)).filter(|d| !d.as_os_str().is_empty());
        }
        if let Some(v) = lookup("VOICE_MCP_HOTKEY_LOCK_FALLBACK_SEMAPHORE") {
            self.hotkey.lock.semaphore_fallback =
                parse_bool("VOICE_MCP_HOTKEY_LOCK_FALLBACK_SEMAPHORE", &v)?;
        }
        if let Some(v) = lookup("VOICE_MCP_AUDIO_FEEDBACK") {
            self.audio_cues.enabled = parse_bool("VOICE_MCP_AUDIO_FEEDBACK", &v)?;
        }
        if let Some(v) = lookup("VOICE_MCP_TYPING_DEBOUNCE") {
            self.output.typing_debounce_secs = parse_number("VOICE_MCP_TYPING_DEBOUNCE", &v)?;
        }
        if let Some(level) = lookup("VOICE_MCP_LOG_LEVEL") {
            self.log_level = level.to_lowercase();
        }
        Ok(())
    }

    /// Reject values that cannot be used at all
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.tts.volume) {
            return Err(invalid("tts.volume", self.tts.volume, "must be between 0.0 and 1.0"));
        }
        if self.tts.rate == 0 {
            return Err(invalid("tts.rate", self.tts.rate, "must be greater than zero"));
        }

        check_seconds(
            "stt.silence_threshold_secs",
            f64::from(self.stt.silence_threshold_secs),
        )?;
        check_seconds("hotkey.lock.stale_after_secs", self.hotkey.lock.stale_after_secs)?;
        check_seconds("hotkey.lock.max_hold_secs", self.hotkey.lock.max_hold_secs)?;
        if !self.output.typing_debounce_secs.is_finite()
            || !(0.0..=60.0).contains(&self.output.typing_debounce_secs)
        {
            return Err(invalid(
                "output.typing_debounce_secs",
                self.output.typing_debounce_secs,
                "must be between 0 and 60 seconds",
            ));
        }

        if self.stt.max_duration_secs == 0 || f64::from(self.stt.max_duration_secs) > MAX_SECONDS {
            return Err(invalid(
                "stt.max_duration_secs",
                self.stt.max_duration_secs,
                "must be between 1 and 86400",
            ));
        }
        if self.stt.model_cache_size == 0 {
            return Err(invalid(
                "stt.model_cache_size",
                self.stt.model_cache_size,
                "must be at least 1",
            ));
        }

        let lock = &self.hotkey.lock;
        if lock.max_hold_secs < lock.stale_after_secs {
            return Err(invalid(
                "hotkey.lock.max_hold_secs",
                lock.max_hold_secs,
                "must not be shorter than stale_after_secs",
            ));
        }
        // A live holder is reclaimed at max_hold, so every session phase must fit inside it
        let longest_phase = f64::from(self.stt.max_duration_secs) + SESSION_MARGIN_SECS;
        if lock.max_hold_secs < longest_phase {
            return Err(invalid(
                "hotkey.lock.max_hold_secs",
                lock.max_hold_secs,
                &format!(
                    "must be at least stt.max_duration_secs + {} ({})",
                    SESSION_MARGIN_SECS, longest_phase
                ),
            ));
        }
        Ok(())
    }
}

/// A positive, finite number of seconds no longer than a day
fn check_seconds(key: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 && value <= MAX_SECONDS {
        Ok(())
    } else {
        Err(invalid(key, value, "must be a number of seconds between 0 and 86400"))
    }
}

fn invalid(key: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "expected true or false")),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(key, value, "expected a number"))
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    // Start with defaults
    let mut config = Config::default();

    // Determine config file path
    let config_path = path.map(PathBuf::from).or_else(Config::default_path);

    // Load from file if it exists
    if let Some(ref path) = config_path {
        if path.exists() {
            tracing::debug!("Loading config from {:?}", path);
            let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
                path: path.display().to_string(),
                source: e,
            })?;

            config = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
        }
    }

    // Override from environment variables
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;

    Ok(config)
}

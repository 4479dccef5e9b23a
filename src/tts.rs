//! Text-to-speech through the system speech command
//!
//! Supported engines, in auto-detection order:
//! - espeak-ng / espeak (Linux)
//! - spd-say (speech-dispatcher, Linux)
//! - say (macOS)

use crate::config::TtsConfig;
use crate::error::TtsError;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::process::Command;

/// Per-call speech parameters; unset fields use the configured defaults
#[derive(Debug, Clone, Default)]
pub struct SpeakOptions {
    pub voice: Option<String>,
    /// Words per minute
    pub rate: Option<u32>,
    /// 0.0 to 1.0
    pub volume: Option<f32>,
}

/// Speech synthesis collaborator
#[async_trait::async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Resolve and warm up the engine; blocking
    fn preload(&self) -> Result<(), TtsError>;

    /// Speak `text` and return once playback has finished
    async fn speak(&self, text: &str, options: &SpeakOptions) -> Result<(), TtsError>;
}

/// Speech command engines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    EspeakNg,
    Espeak,
    SpdSay,
    Say,
}

impl Engine {
    const AUTO_ORDER: [Engine; 4] = [Engine::EspeakNg, Engine::Espeak, Engine::SpdSay, Engine::Say];

    pub fn binary(&self) -> &'static str {
        match self {
            Engine::EspeakNg => "espeak-ng",
            Engine::Espeak => "espeak",
            Engine::SpdSay => "spd-say",
            Engine::Say => "say",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::AUTO_ORDER.into_iter().find(|e| e.binary() == name)
    }

    /// Command-line arguments for one utterance
    fn args(&self, text: &str, voice: Option<&str>, rate: u32, volume: f32) -> Vec<String> {
        let volume = volume.clamp(0.0, 1.0);
        let mut args = Vec::new();
        match self {
            Engine::EspeakNg | Engine::Espeak => {
                args.extend(["-s".to_string(), rate.to_string()]);
                args.extend(["-a".to_string(), ((volume * 200.0).round() as u32).to_string()]);
                if let Some(voice) = voice {
                    args.extend(["-v".to_string(), voice.to_string()]);
                }
            }
            Engine::SpdSay => {
                // spd-say takes relative rate and volume in -100..=100; 180 wpm is its neutral rate
                let relative_rate = ((rate as f32 / 180.0 - 1.0) * 100.0).clamp(-100.0, 100.0);
                args.extend(["-r".to_string(), (relative_rate.round() as i32).to_string()]);
                args.extend(["-i".to_string(), ((volume * 200.0 - 100.0).round() as i32).to_string()]);
                if let Some(voice) = voice {
                    args.extend(["-y".to_string(), voice.to_string()]);
                }
                args.push("-w".to_string());
            }
            Engine::Say => {
                args.extend(["-r".to_string(), rate.to_string()]);
                if let Some(voice) = voice {
                    args.extend(["-v".to_string(), voice.to_string()]);
                }
            }
        }
        args.push(text.to_string());
        args
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.binary())
    }
}

/// Synthesizer that shells out to a speech command
pub struct CommandSynthesizer {
    config: TtsConfig,
    resolved: Mutex<Option<(Engine, PathBuf)>>,
}

impl CommandSynthesizer {
    pub fn new(config: &TtsConfig) -> Self {
        Self {
            config: config.clone(),
            resolved: Mutex::new(None),
        }
    }

    /// Find the configured engine in PATH (cached once found)
    pub fn resolve(&self) -> Result<(Engine, PathBuf), TtsError> {
        let mut resolved = self
            .resolved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(found) = resolved.as_ref() {
            return Ok(found.clone());
        }

        let found = find_engine(&self.config.engine)?;
        tracing::info!("Using speech engine {} ({})", found.0, found.1.display());
        *resolved = Some(found.clone());
        Ok(found)
    }
}

fn find_engine(configured: &str) -> Result<(Engine, PathBuf), TtsError> {
    if configured == "auto" {
        return Engine::AUTO_ORDER
            .into_iter()
            .find_map(|engine| which::which(engine.binary()).ok().map(|path| (engine, path)))
            .ok_or(TtsError::EngineNotFound);
    }

    let engine = Engine::from_name(configured).ok_or_else(|| {
        TtsError::Failed(format!(
            "Unknown speech engine '{}'. Use auto, espeak-ng, espeak, spd-say or say.",
            configured
        ))
    })?;
    let path = which::which(engine.binary())
        .map_err(|_| TtsError::EngineMissing(engine.binary().to_string()))?;
    Ok((engine, path))
}

#[async_trait::async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    fn preload(&self) -> Result<(), TtsError> {
        if !self.config.enabled {
            return Err(TtsError::Disabled);
        }
        self.resolve().map(|_| ())
    }

    async fn speak(&self, text: &str, options: &SpeakOptions) -> Result<(), TtsError> {
        if !self.config.enabled {
            return Err(TtsError::Disabled);
        }
        let (engine, path) = self.resolve()?;

        let voice = options.voice.as_deref().or(self.config.voice.as_deref());
        let rate = options.rate.unwrap_or(self.config.rate);
        let volume = options.volume.unwrap_or(self.config.volume);
        let args = engine.args(text, voice, rate, volume);

        tracing::debug!("Speaking {} characters with {}", text.chars().count(), engine);
        let output = Command::new(&path)
            .args(&args)
            .output()
            .await
            .map_err(|e| TtsError::Failed(format!("failed to run {}: {}", engine, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TtsError::Failed(format!(
                "{} exited with {}: {}",
                engine,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

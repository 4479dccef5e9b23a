//! Audio cues
//!
//! Short tones played when a dictation session starts listening, stops
//! listening, or fails. Cues are best-effort: a failure is logged and the
//! session carries on.
//!
//! rodio's output stream is not Send, so it lives on a dedicated playback
//! thread fed through a channel.

use crate::config::AudioCueConfig;
use crate::error::AudioError;
use rodio::{Decoder, OutputStream, Sink, Source};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Mutex;

/// Cue names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    /// Listening started
    On,
    /// Listening stopped
    Off,
    /// The session failed
    Error,
}

impl Cue {
    pub fn name(&self) -> &'static str {
        match self {
            Cue::On => "on",
            Cue::Off => "off",
            Cue::Error => "error",
        }
    }
}

/// Plays named cues
pub trait CuePlayer: Send + Sync {
    fn play(&self, cue: Cue) -> Result<(), AudioError>;
}

/// Player used when cues are disabled or no output device exists
pub struct SilentCuePlayer;

impl CuePlayer for SilentCuePlayer {
    fn play(&self, _cue: Cue) -> Result<(), AudioError> {
        Ok(())
    }
}

/// Build the configured cue player, falling back to silence
pub fn create_cue_player(config: &AudioCueConfig) -> Box<dyn CuePlayer> {
    if !config.enabled {
        return Box::new(SilentCuePlayer);
    }
    match RodioCuePlayer::new(config) {
        Ok(player) => Box::new(player),
        Err(e) => {
            tracing::warn!("Audio cues disabled: {}", e);
            Box::new(SilentCuePlayer)
        }
    }
}

/// rodio-backed player running on its own thread
pub struct RodioCuePlayer {
    tx: Mutex<mpsc::Sender<Cue>>,
}

impl RodioCuePlayer {
    pub fn new(config: &AudioCueConfig) -> Result<Self, AudioError> {
        let theme = load_theme(&config.theme)?;
        let volume = config.volume.clamp(0.0, 1.0);

        let (tx, rx) = mpsc::channel::<Cue>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), AudioError>>(1);

        std::thread::Builder::new()
            .name("audio-cues".to_string())
            .spawn(move || {
                let (_stream, handle) = match OutputStream::try_default() {
                    Ok(pair) => {
                        let _ = ready_tx.send(Ok(()));
                        pair
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::Playback(format!(
                            "Failed to open audio output: {}",
                            e
                        ))));
                        return;
                    }
                };

                // Runs until every sender is dropped
                for cue in rx {
                    let data = theme.sound(cue);
                    if data.is_empty() {
                        continue;
                    }
                    let played = Decoder::new(Cursor::new(data.to_vec()))
                        .map_err(|e| format!("Failed to decode audio: {}", e))
                        .and_then(|source| {
                            let sink = Sink::try_new(&handle)
                                .map_err(|e| format!("Failed to create audio sink: {}", e))?;
                            sink.append(source.amplify(volume));
                            sink.detach(); // Let it play in the background
                            Ok(())
                        });
                    if let Err(e) = played {
                        tracing::warn!("Failed to play {} cue: {}", cue.name(), e);
                    }
                }
            })
            .map_err(|e| AudioError::Playback(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| AudioError::Playback("audio cue thread exited".to_string()))??;

        Ok(Self { tx: Mutex::new(tx) })
    }
}

impl CuePlayer for RodioCuePlayer {
    fn play(&self, cue: Cue) -> Result<(), AudioError> {
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .send(cue)
            .map_err(|_| AudioError::Playback("audio cue thread is gone".to_string()))
    }
}

/// WAV data per cue
struct SoundTheme {
    on: Vec<u8>,
    off: Vec<u8>,
    error: Vec<u8>,
}

impl SoundTheme {
    fn sound(&self, cue: Cue) -> &[u8] {
        match cue {
            Cue::On => &self.on,
            Cue::Off => &self.off,
            Cue::Error => &self.error,
        }
    }
}

/// Load a sound theme by name or path
fn load_theme(theme_name: &str) -> Result<SoundTheme, AudioError> {
    match theme_name {
        "default" => Ok(generate_default_theme()),
        "subtle" => Ok(generate_subtle_theme()),
        path => load_custom_theme(path),
    }
}

/// Load on.wav, off.wav and error.wav from a directory (missing files are silent)
fn load_custom_theme(path: &str) -> Result<SoundTheme, AudioError> {
    let dir = PathBuf::from(path);
    if !dir.is_dir() {
        return Err(AudioError::Playback(format!(
            "Theme directory not found: {}",
            path
        )));
    }

    let load_file = |name: &str| -> Vec<u8> { std::fs::read(dir.join(name)).unwrap_or_default() };

    Ok(SoundTheme {
        on: load_file("on.wav"),
        off: load_file("off.wav"),
        error: load_file("error.wav"),
    })
}

// Tones are generated in-process to avoid shipping binary assets

const SAMPLE_RATE: u32 = 44100;

/// Sine tone that glides from `from_hz` to `to_hz`, with a fade in/out envelope
fn generate_sweep_wav(from_hz: f32, to_hz: f32, duration_ms: u32, fade_ms: u32) -> Vec<u8> {
    let num_samples = (SAMPLE_RATE * duration_ms / 1000) as usize;
    let fade_samples = ((SAMPLE_RATE * fade_ms / 1000) as usize).max(1);

    let mut phase = 0.0f32;
    let samples: Vec<i16> = (0..num_samples)
        .map(|i| {
            let progress = i as f32 / num_samples.max(1) as f32;
            let freq = from_hz + (to_hz - from_hz) * progress;
            phase += 2.0 * std::f32::consts::PI * freq / SAMPLE_RATE as f32;

            let envelope = if i < fade_samples {
                i as f32 / fade_samples as f32
            } else if i >= num_samples.saturating_sub(fade_samples) {
                (num_samples - i) as f32 / fade_samples as f32
            } else {
                1.0
            };
            (phase.sin() * envelope * 16000.0) as i16
        })
        .collect();

    encode_wav(&samples)
}

/// Encode mono 16-bit samples as a WAV file in memory
fn encode_wav(samples: &[i16]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    let written = hound::WavWriter::new(&mut cursor, spec).and_then(|mut writer| {
        for sample in samples {
            writer.write_sample(*sample)?;
        }
        writer.finalize()
    });

    match written {
        Ok(()) => cursor.into_inner(),
        Err(e) => {
            tracing::warn!("Failed to encode cue: {}", e);
            Vec::new()
        }
    }
}

/// Default theme: rising tone to start, falling tone to stop
fn generate_default_theme() -> SoundTheme {
    SoundTheme {
        on: generate_sweep_wav(440.0, 880.0, 150, 20),
        off: generate_sweep_wav(880.0, 440.0, 150, 20),
        error: generate_sweep_wav(300.0, 200.0, 200, 30),
    }
}

/// Subtle theme: short quiet blips
fn generate_subtle_theme() -> SoundTheme {
    SoundTheme {
        on: generate_sweep_wav(1200.0, 1200.0, 50, 10),
        off: generate_sweep_wav(800.0, 800.0, 50, 10),
        error: generate_sweep_wav(400.0, 300.0, 100, 15),
    }
}

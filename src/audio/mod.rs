//! Microphone capture and audio cues
//!
//! Capture goes through cpal, which works with PipeWire, PulseAudio and
//! ALSA on Linux and CoreAudio on macOS. Samples are delivered mono at
//! [`SAMPLE_RATE`], the rate whisper expects.

pub mod cpal_capture;
pub mod feedback;
pub mod silence;

use crate::config::SttConfig;
use crate::error::AudioError;
use tokio::sync::mpsc;

/// Capture sample rate in Hz
pub const SAMPLE_RATE: u32 = 16_000;

/// Trait for audio capture implementations
#[async_trait::async_trait]
pub trait AudioCapture: Send + Sync {
    /// Start capturing audio
    /// Returns a channel receiver for audio chunks (f32 samples, mono, 16kHz)
    async fn start(&mut self) -> Result<mpsc::Receiver<Vec<f32>>, AudioError>;

    /// Stop capturing and return all recorded samples
    async fn stop(&mut self) -> Result<Vec<f32>, AudioError>;
}

/// Factory function to create audio capture
pub fn create_capture(config: &SttConfig) -> Result<Box<dyn AudioCapture>, AudioError> {
    Ok(Box::new(cpal_capture::CpalCapture::new(&config.device)))
}

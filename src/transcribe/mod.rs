//! Speech-to-text
//!
//! [`Transcriber`] turns a finished recording into text. [`SpeechRecognizer`]
//! is the higher-level collaborator the hotkey monitor talks to: it owns
//! the microphone, stops at the first long silence and transcribes what it
//! heard.

pub mod cache;
pub mod recognizer;
pub mod whisper;

use crate::error::TranscribeError;
use std::time::Duration;

/// Trait for speech-to-text implementations
pub trait Transcriber: Send + Sync {
    /// Transcribe audio samples to text
    /// Input: f32 samples, mono, 16kHz
    fn transcribe(&self, samples: &[f32], language: &str) -> Result<String, TranscribeError>;
}

/// Parameters of one listen-and-transcribe call
#[derive(Debug, Clone)]
pub struct ListenRequest {
    /// Language code, or "auto"
    pub language: String,
    /// Continuous silence that ends the capture
    pub silence_threshold: Duration,
    /// Hard cap on the capture
    pub max_duration: Duration,
    /// Model to transcribe with instead of the configured one
    pub model: Option<String>,
}

/// Progress callbacks from a recognizer
pub trait ListenObserver: Send + Sync {
    /// The microphone is closed and transcription is starting
    fn on_capture_finished(&self) {}

    /// Intermediate text, for engines that produce it
    fn on_partial(&self, _text: &str) {}
}

/// Observer that ignores everything
pub struct NoopObserver;

impl ListenObserver for NoopObserver {}

/// Capture-until-silence speech recognition
#[async_trait::async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Load models and open anything slow to open; blocking
    fn preload(&self) -> Result<(), TranscribeError>;

    /// Listen until the silence threshold or duration cap, then return the text
    ///
    /// An empty string means the engine heard speech but produced no words.
    async fn transcribe_until_silence(
        &self,
        request: &ListenRequest,
        observer: &dyn ListenObserver,
    ) -> Result<String, TranscribeError>;
}

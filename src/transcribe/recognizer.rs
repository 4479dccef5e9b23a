//! Microphone + whisper recognizer
//!
//! Models live in a [`ModelCache`]: loaded by the background preload or by
//! the first capture that needs them, then shared by every session. In
//! server mode the cache holds several models and unloads idle ones;
//! otherwise only the configured model is kept, for as long as the process
//! runs.

use super::cache::{self, CachedModelInfo, ModelCache, ModelLoader, SharedTranscriber};
use super::whisper::WhisperTranscriber;
use super::{ListenObserver, ListenRequest, SpeechRecognizer};
use crate::audio::silence::{SilenceDetector, SilenceVerdict};
use crate::audio::{self, AudioCapture};
use crate::config::SttConfig;
use crate::error::TranscribeError;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Slack on top of the duration cap for a device that stops delivering audio
const CAPTURE_GRACE: Duration = Duration::from_secs(1);

pub struct WhisperRecognizer {
    config: SttConfig,
    models: Arc<ModelCache>,
}

impl WhisperRecognizer {
    pub fn new(config: &SttConfig) -> Self {
        let whisper_config = config.clone();
        Self::with_loader(
            config,
            Box::new(move |model: &str| {
                let transcriber = WhisperTranscriber::load(model, &whisper_config)?;
                Ok(Arc::new(transcriber) as SharedTranscriber)
            }),
        )
    }

    /// Recognizer whose models come from `loader` instead of whisper files
    pub fn with_loader(config: &SttConfig, loader: Box<ModelLoader>) -> Self {
        let (capacity, idle_timeout) = if config.server_mode {
            (config.model_cache_size, config.model_timeout())
        } else {
            (1, None)
        };
        Self {
            config: config.clone(),
            models: Arc::new(ModelCache::new(capacity, idle_timeout, loader)),
        }
    }

    /// Whether the configured model is in memory
    pub fn is_loaded(&self) -> bool {
        self.models.contains(&self.config.model)
    }

    pub fn loaded_models(&self) -> Vec<CachedModelInfo> {
        self.models.loaded()
    }

    /// Unload idle models in the background; None when they are kept forever
    pub fn start_idle_unload(&self) -> Option<JoinHandle<()>> {
        cache::spawn_idle_sweeper(&self.models)
    }

    /// The configured model first, then the extra preload list without repeats
    fn startup_models(&self) -> Vec<&str> {
        let mut models = vec![self.config.model.as_str()];
        if self.config.server_mode {
            for extra in &self.config.preload_models {
                if !models.contains(&extra.as_str()) {
                    models.push(extra.as_str());
                }
            }
        }
        models
    }

    async fn transcriber(&self, model: &str) -> Result<SharedTranscriber, TranscribeError> {
        let models = self.models.clone();
        let model = model.to_string();
        tokio::task::spawn_blocking(move || models.get(&model))
            .await
            .map_err(|e| TranscribeError::InitFailed(e.to_string()))?
    }

    async fn capture(
        &self,
        capture: &mut dyn AudioCapture,
        request: &ListenRequest,
    ) -> Result<(Vec<f32>, SilenceVerdict), TranscribeError> {
        let mut rx = capture.start().await?;
        let mut detector = SilenceDetector::new(
            self.config.energy_threshold,
            request.silence_threshold,
            request.max_duration,
        );

        let deadline = tokio::time::Instant::now() + request.max_duration + CAPTURE_GRACE;
        let verdict = loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(chunk)) => {
                    let verdict = detector.feed(&chunk);
                    if verdict.is_final() {
                        break verdict;
                    }
                }
                Ok(None) => {
                    tracing::warn!("Audio stream ended before the silence threshold");
                    break SilenceVerdict::EndOfSpeech;
                }
                Err(_) => {
                    tracing::warn!("Audio device stopped delivering samples");
                    break SilenceVerdict::MaxDuration;
                }
            }
        };

        let samples = capture.stop().await?;
        tracing::debug!(
            "Capture finished after {:.1}s: {:?}",
            detector.elapsed().as_secs_f32(),
            verdict
        );

        if !detector.heard_speech() {
            return Err(TranscribeError::NoSpeech);
        }
        Ok((samples, verdict))
    }
}

#[async_trait::async_trait]
impl SpeechRecognizer for WhisperRecognizer {
    fn preload(&self) -> Result<(), TranscribeError> {
        if !self.config.enabled {
            return Err(TranscribeError::Disabled);
        }

        let models = self.startup_models();
        if models.len() > self.models.capacity() {
            tracing::warn!(
                "{} models requested for preloading but the cache holds {}; the oldest will be evicted",
                models.len(),
                self.models.capacity()
            );
        }

        // Only the configured model decides whether speech-to-text is usable
        self.models.get(models[0])?;
        for extra in &models[1..] {
            if let Err(e) = self.models.get(extra) {
                tracing::warn!("Could not preload whisper model '{}': {}", extra, e);
            }
        }
        Ok(())
    }

    async fn transcribe_until_silence(
        &self,
        request: &ListenRequest,
        observer: &dyn ListenObserver,
    ) -> Result<String, TranscribeError> {
        if !self.config.enabled {
            return Err(TranscribeError::Disabled);
        }

        let model = request.model.as_deref().unwrap_or(&self.config.model);
        let transcriber = self.transcriber(model).await?;
        let mut capture = audio::create_capture(&self.config)?;

        let captured = self.capture(capture.as_mut(), request).await;
        observer.on_capture_finished();
        let (samples, _) = captured?;

        let language = request.language.clone();
        let text = tokio::task::spawn_blocking(move || transcriber.transcribe(&samples, &language))
            .await
            .map_err(|e| TranscribeError::InferenceFailed(e.to_string()))??;

        if !text.is_empty() {
            observer.on_partial(&text);
        }
        Ok(text)
    }
}

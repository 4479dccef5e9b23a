//! Tool surface exposed to the assistant
//!
//! Every operation here returns a status string or a serializable report.
//! Failures from the engines, the lock or the hotkey hook are folded into
//! that result; nothing here returns an error to the protocol layer.

use crate::config::Config;
use crate::error::MonitorError;
use crate::monitor::{HotkeyMonitor, MonitorStatus};
use crate::readiness::{ComponentStatus, ReadinessTracker};
use crate::tts::{SpeakOptions, SpeechSynthesizer};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// How long `speak` waits for a text-to-speech engine that is still loading
const TTS_READY_WAIT: Duration = Duration::from_secs(2);

/// Readiness component for the hotkey hook installed at startup
pub const HOTKEY_COMPONENT: &str = "hotkey";

/// Longest text echoed back by `speak`
const SPOKEN_PREVIEW_CHARS: usize = 50;

/// Hotkey settings echoed by `get_hotkey_status`
#[derive(Debug, Clone, Serialize)]
pub struct HotkeyConfigReport {
    pub enabled: bool,
    pub hotkey_name: String,
    pub output_mode: String,
    pub language: String,
    pub silence_threshold_secs: f32,
    pub lock_enabled: bool,
    pub lock_directory: String,
    pub semaphore_fallback: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HotkeyStatusReport {
    #[serde(flatten)]
    pub monitor: MonitorStatus,
    pub configuration: HotkeyConfigReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentReport {
    pub status: ComponentStatus,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_secs: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadingSummary {
    pub all_ready: bool,
    pub any_failed: bool,
    pub total: usize,
    pub ready: usize,
    pub loading: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadingStatusReport {
    pub components: BTreeMap<String, ComponentReport>,
    pub summary: LoadingSummary,
}

/// The operations offered to the assistant
pub struct VoiceTools {
    config: Config,
    readiness: Arc<ReadinessTracker>,
    tts: Arc<dyn SpeechSynthesizer>,
    monitor: HotkeyMonitor,
}

impl VoiceTools {
    pub fn new(
        config: Config,
        readiness: Arc<ReadinessTracker>,
        tts: Arc<dyn SpeechSynthesizer>,
        monitor: HotkeyMonitor,
    ) -> Self {
        Self {
            config,
            readiness,
            tts,
            monitor,
        }
    }

    pub fn monitor(&self) -> &HotkeyMonitor {
        &self.monitor
    }

    /// Speak `text` aloud and wait for playback to finish
    pub async fn speak(&self, text: &str, options: SpeakOptions) -> String {
        let text = text.trim();
        if text.is_empty() {
            return "❌ No text provided to speak".to_string();
        }
        if !self.config.tts.enabled {
            return "❌ Text-to-speech is disabled in configuration".to_string();
        }
        if let Err(reason) = self.tts_ready().await {
            return format!("❌ TTS not ready: {}", reason);
        }

        match self.tts.speak(text, &options).await {
            Ok(()) => format!("✅ Spoke: {}", preview(text)),
            Err(e) => {
                tracing::warn!("Speech failed: {}", e);
                format!("❌ TTS error: {}", e)
            }
        }
    }

    /// Untracked engines are loaded lazily by the first call
    async fn tts_ready(&self) -> Result<(), String> {
        let Some(state) = self.readiness.get("tts") else {
            return Ok(());
        };
        let state = if state.status.is_terminal() {
            state
        } else {
            self.readiness
                .wait_for("tts", TTS_READY_WAIT)
                .await
                .map_err(|e| e.to_string())?
        };

        match state.status {
            ComponentStatus::Ready => Ok(()),
            ComponentStatus::Failed => Err(format!(
                "failed to load: {}",
                state.error.unwrap_or_else(|| "unknown error".to_string())
            )),
            _ => Err("still loading, try again shortly".to_string()),
        }
    }

    pub async fn start_hotkey_monitoring(&self) -> String {
        if !self.config.hotkey.enabled {
            return "⚠️  Hotkey monitoring is disabled in configuration".to_string();
        }
        describe_start(self.monitor.start_monitoring().await)
    }

    /// Start monitoring at server startup, reporting progress as the `hotkey` component
    pub async fn autostart_hotkey_monitoring(&self) -> String {
        if !self.config.hotkey.enabled {
            return "⚠️  Hotkey monitoring is disabled in configuration".to_string();
        }

        let tracked = self
            .readiness
            .register(HOTKEY_COMPONENT)
            .and_then(|()| self.readiness.mark_loading(HOTKEY_COMPONENT));
        if let Err(e) = &tracked {
            tracing::warn!("Hotkey startup is not tracked: {}", e);
        }

        let result = self.monitor.start_monitoring().await;
        if tracked.is_ok() {
            let marked = match &result {
                Ok(_) => self.readiness.mark_ready(HOTKEY_COMPONENT),
                Err(e) => self.readiness.mark_failed(HOTKEY_COMPONENT, e.to_string()),
            };
            if let Err(e) = marked {
                tracing::warn!("Could not record hotkey startup: {}", e);
            }
        }
        describe_start(result)
    }

    /// Stop listening; `force_abort` also cancels a session in progress
    pub async fn stop_hotkey_monitoring(&self, force_abort: bool) -> String {
        match self.monitor.stop_monitoring(force_abort).await {
            Ok(outcome) if !outcome.was_active && !outcome.session_aborted => {
                "✅ Hotkey monitoring was not active".to_string()
            }
            Ok(outcome) if outcome.session_aborted => {
                "✅ Hotkey monitoring stopped (active session aborted)".to_string()
            }
            Ok(outcome) if outcome.session_in_progress => {
                "✅ Hotkey monitoring stopped (the current session will finish)".to_string()
            }
            Ok(_) => "✅ Hotkey monitoring stopped".to_string(),
            Err(e) => format!("❌ Failed to stop hotkey monitoring: {}", e),
        }
    }

    pub fn get_hotkey_status(&self) -> HotkeyStatusReport {
        let hotkey = &self.config.hotkey;
        HotkeyStatusReport {
            monitor: self.monitor.get_status(),
            configuration: HotkeyConfigReport {
                enabled: hotkey.enabled,
                hotkey_name: hotkey.name.clone(),
                output_mode: hotkey.output_mode.to_string(),
                language: self.config.stt.language.clone(),
                silence_threshold_secs: self.config.stt.silence_threshold_secs,
                lock_enabled: hotkey.lock.enabled,
                lock_directory: hotkey.lock.resolve_directory().display().to_string(),
                semaphore_fallback: hotkey.lock.semaphore_fallback,
            },
        }
    }

    pub fn get_loading_status(&self) -> LoadingStatusReport {
        let snapshot = self.readiness.snapshot();
        let summary = LoadingSummary {
            all_ready: snapshot.all_ready,
            any_failed: snapshot.any_failed,
            total: snapshot.components.len(),
            ready: snapshot.count(ComponentStatus::Ready),
            loading: snapshot.count(ComponentStatus::Loading),
            failed: snapshot.count(ComponentStatus::Failed),
        };
        let components = snapshot
            .components
            .into_iter()
            .map(|(name, state)| {
                let report = ComponentReport {
                    status: state.status,
                    elapsed_secs: state.elapsed_secs(),
                    error: state.error,
                    started_at: state.started_at,
                    finished_at: state.finished_at,
                };
                (name, report)
            })
            .collect();

        LoadingStatusReport {
            components,
            summary,
        }
    }
}

fn describe_start(result: Result<String, MonitorError>) -> String {
    match result {
        Ok(description) => format!("✅ Hotkey monitoring started ({})", description),
        Err(e) => format!("❌ Failed to start hotkey monitoring: {}", e),
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() <= SPOKEN_PREVIEW_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(SPOKEN_PREVIEW_CHARS).collect();
    format!("{}...", head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::feedback::SilentCuePlayer;
    use crate::error::{HotkeyError, TranscribeError, TtsError};
    use crate::hotkey::{HotkeyHook, HotkeyListener, HotkeySpec};
    use crate::lock::HotkeyLock;
    use crate::monitor::MonitorDeps;
    use crate::output::CommandTextSink;
    use crate::transcribe::{ListenObserver, ListenRequest, SpeechRecognizer};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSynth {
        spoken: Mutex<Vec<(String, Option<u32>)>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl SpeechSynthesizer for RecordingSynth {
        fn preload(&self) -> Result<(), TtsError> {
            Ok(())
        }

        async fn speak(&self, text: &str, options: &SpeakOptions) -> Result<(), TtsError> {
            if self.fail {
                return Err(TtsError::Failed("audio device busy".to_string()));
            }
            self.spoken
                .lock()
                .unwrap()
                .push((text.to_string(), options.rate));
            Ok(())
        }
    }

    struct NoHook;

    impl HotkeyHook for NoHook {
        fn install(&self, _spec: &HotkeySpec) -> Result<Box<dyn HotkeyListener>, HotkeyError> {
            Err(HotkeyError::Unsupported("headless test".to_string()))
        }
    }

    struct Mute;

    #[async_trait::async_trait]
    impl SpeechRecognizer for Mute {
        fn preload(&self) -> Result<(), TranscribeError> {
            Ok(())
        }

        async fn transcribe_until_silence(
            &self,
            _request: &ListenRequest,
            _observer: &dyn ListenObserver,
        ) -> Result<String, TranscribeError> {
            Err(TranscribeError::NoSpeech)
        }
    }

    fn tools_with(config: Config, synth: Arc<RecordingSynth>) -> (VoiceTools, Arc<ReadinessTracker>) {
        let readiness = Arc::new(ReadinessTracker::new());
        let deps = MonitorDeps {
            hook: Arc::new(NoHook),
            lock: Arc::new(HotkeyLock::with_backend("menu", None)),
            recognizer: Arc::new(Mute),
            cues: Arc::new(SilentCuePlayer),
            sink: Arc::new(CommandTextSink::new(&config.output)),
            readiness: readiness.clone(),
        };
        let monitor = HotkeyMonitor::new(&config, deps);
        let tools = VoiceTools::new(config, readiness.clone(), synth, monitor);
        (tools, readiness)
    }

    #[tokio::test]
    async fn test_speak_empty_text() {
        let (tools, _) = tools_with(Config::default(), Arc::default());
        assert_eq!(
            tools.speak("   ", SpeakOptions::default()).await,
            "❌ No text provided to speak"
        );
    }

    #[tokio::test]
    async fn test_speak_passes_options() {
        let synth = Arc::new(RecordingSynth::default());
        let (tools, _) = tools_with(Config::default(), synth.clone());

        let options = SpeakOptions {
            rate: Some(150),
            ..Default::default()
        };
        let status = tools.speak("Build completed", options).await;
        assert_eq!(status, "✅ Spoke: Build completed");
        assert_eq!(
            *synth.spoken.lock().unwrap(),
            [("Build completed".to_string(), Some(150))]
        );
    }

    #[tokio::test]
    async fn test_speak_reports_engine_error() {
        let synth = Arc::new(RecordingSynth {
            fail: true,
            ..Default::default()
        });
        let (tools, _) = tools_with(Config::default(), synth);
        let status = tools.speak("hello", SpeakOptions::default()).await;
        assert!(status.starts_with("❌ TTS error:"));
        assert!(status.contains("audio device busy"));
    }

    #[tokio::test]
    async fn test_speak_when_tts_failed_to_load() {
        let synth = Arc::new(RecordingSynth::default());
        let (tools, readiness) = tools_with(Config::default(), synth.clone());
        readiness.register("tts").unwrap();
        readiness.mark_loading("tts").unwrap();
        readiness.mark_failed("tts", "espeak-ng not found").unwrap();

        let status = tools.speak("hello", SpeakOptions::default()).await;
        assert_eq!(status, "❌ TTS not ready: failed to load: espeak-ng not found");
        assert!(synth.spoken.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_speak_while_still_loading() {
        let (tools, readiness) = tools_with(Config::default(), Arc::default());
        readiness.register("tts").unwrap();
        readiness.mark_loading("tts").unwrap();

        let status = tools.speak("hello", SpeakOptions::default()).await;
        assert!(status.contains("still loading"));
    }

    #[test]
    fn test_preview_truncates_long_text() {
        let long = "a".repeat(80);
        let shown = preview(&long);
        assert_eq!(shown.chars().count(), SPOKEN_PREVIEW_CHARS + 3);
        assert!(shown.ends_with("..."));
        assert_eq!(preview("short"), "short");
    }

    #[tokio::test]
    async fn test_start_when_disabled() {
        let mut config = Config::default();
        config.hotkey.enabled = false;
        let (tools, _) = tools_with(config, Arc::default());
        assert_eq!(
            tools.start_hotkey_monitoring().await,
            "⚠️  Hotkey monitoring is disabled in configuration"
        );
    }

    #[tokio::test]
    async fn test_start_reports_unavailable_hook() {
        let (tools, _) = tools_with(Config::default(), Arc::default());
        let status = tools.start_hotkey_monitoring().await;
        assert!(status.starts_with("❌ Failed to start hotkey monitoring:"));
        assert!(status.contains("headless test"));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (tools, _) = tools_with(Config::default(), Arc::default());
        for _ in 0..2 {
            assert_eq!(
                tools.stop_hotkey_monitoring(false).await,
                "✅ Hotkey monitoring was not active"
            );
        }
    }

    #[test]
    fn test_hotkey_status_echoes_configuration() {
        let (tools, _) = tools_with(Config::default(), Arc::default());
        let status = serde_json::to_value(tools.get_hotkey_status()).unwrap();

        assert_eq!(status["active"], false);
        assert_eq!(status["hotkey_name"], "menu");
        assert_eq!(status["state"], "idle");
        assert_eq!(status["configuration"]["output_mode"], "typing");
        assert_eq!(status["configuration"]["lock_enabled"], true);
        assert_eq!(status["lock"]["guarded"], false);
    }

    #[test]
    fn test_loading_status_summary() {
        let (tools, readiness) = tools_with(Config::default(), Arc::default());
        readiness.register("tts").unwrap();
        readiness.register("stt").unwrap();
        readiness.mark_loading("tts").unwrap();
        readiness.mark_ready("tts").unwrap();
        readiness.mark_loading("stt").unwrap();

        let report = tools.get_loading_status();
        assert!(!report.summary.all_ready);
        assert_eq!(report.summary.total, 2);
        assert_eq!(report.summary.ready, 1);
        assert_eq!(report.summary.loading, 1);
        assert!(report.components["tts"].elapsed_secs.is_some());
        assert!(report.components["stt"].finished_at.is_none());
    }
}

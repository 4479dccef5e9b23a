//! Fake collaborators shared by the integration tests
//!
//! Each fake implements the public trait the real engine implements, so
//! the monitor and tool surface run unmodified without audio hardware,
//! speech engines or input devices.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use voice_mcp::audio::feedback::SilentCuePlayer;
use voice_mcp::config::{Config, OutputMode};
use voice_mcp::error::{HotkeyError, OutputError, TranscribeError, TtsError};
use voice_mcp::hotkey::{HotkeyEvent, HotkeyHook, HotkeyListener, HotkeySpec};
use voice_mcp::lock::file::FileLock;
use voice_mcp::lock::{HotkeyLock, StalenessPolicy};
use voice_mcp::monitor::{HotkeyMonitor, MonitorDeps};
use voice_mcp::output::TextSink;
use voice_mcp::readiness::ReadinessTracker;
use voice_mcp::tools::VoiceTools;
use voice_mcp::transcribe::{ListenObserver, ListenRequest, SpeechRecognizer};
use voice_mcp::tts::{SpeakOptions, SpeechSynthesizer};

pub const RESOURCE: &str = "menu";

pub fn policy() -> StalenessPolicy {
    StalenessPolicy {
        stale_after: Duration::from_secs(5),
        max_hold: Duration::from_secs(120),
    }
}

/// A lock arbiter backed by marker files in `dir`, as another process would build it
pub fn file_lock(dir: &Path) -> Arc<HotkeyLock> {
    let backend = FileLock::open(dir, RESOURCE, policy()).expect("lock directory");
    Arc::new(HotkeyLock::with_backend(RESOURCE, Some(Box::new(backend))))
}

pub fn marker_path(dir: &Path) -> std::path::PathBuf {
    FileLock::open(dir, RESOURCE, policy())
        .expect("lock directory")
        .marker_path()
        .to_path_buf()
}

/// Hotkey hook whose presses are injected by the test
#[derive(Default)]
pub struct FakeHook {
    tx: Mutex<Option<mpsc::Sender<HotkeyEvent>>>,
    pub fail: bool,
}

impl FakeHook {
    pub async fn press(&self) {
        let tx = self.tx.lock().unwrap().clone().expect("hook installed");
        tx.send(HotkeyEvent::Pressed).await.expect("monitor listening");
        tx.send(HotkeyEvent::Released).await.expect("monitor listening");
    }
}

struct FakeListener {
    rx: Option<mpsc::Receiver<HotkeyEvent>>,
}

#[async_trait::async_trait]
impl HotkeyListener for FakeListener {
    async fn start(&mut self) -> Result<mpsc::Receiver<HotkeyEvent>, HotkeyError> {
        self.rx
            .take()
            .ok_or_else(|| HotkeyError::Listener("already started".to_string()))
    }

    async fn stop(&mut self) -> Result<(), HotkeyError> {
        Ok(())
    }
}

impl HotkeyHook for FakeHook {
    fn install(&self, _spec: &HotkeySpec) -> Result<Box<dyn HotkeyListener>, HotkeyError> {
        if self.fail {
            return Err(HotkeyError::Unsupported("no input hook in tests".to_string()));
        }
        let (tx, rx) = mpsc::channel(16);
        *self.tx.lock().unwrap() = Some(tx);
        Ok(Box::new(FakeListener { rx: Some(rx) }))
    }
}

/// What the fake recognizer does when a session asks it to listen
#[derive(Debug, Clone, Copy)]
pub enum Script {
    /// Hear this text right away
    Text(&'static str),
    /// Finish capturing, then fail while transcribing
    FailTranscribing(&'static str),
    /// Stay in capture until `gate` is notified, then hear this text
    Gate(&'static str),
}

pub struct FakeRecognizer {
    script: Script,
    pub gate: Notify,
    pub calls: AtomicUsize,
}

impl FakeRecognizer {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            gate: Notify::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SpeechRecognizer for FakeRecognizer {
    fn preload(&self) -> Result<(), TranscribeError> {
        Ok(())
    }

    async fn transcribe_until_silence(
        &self,
        _request: &ListenRequest,
        observer: &dyn ListenObserver,
    ) -> Result<String, TranscribeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::Text(text) => {
                observer.on_capture_finished();
                Ok(text.to_string())
            }
            Script::FailTranscribing(message) => {
                observer.on_capture_finished();
                Err(TranscribeError::InferenceFailed(message.to_string()))
            }
            Script::Gate(text) => {
                self.gate.notified().await;
                observer.on_capture_finished();
                Ok(text.to_string())
            }
        }
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub delivered: Mutex<Vec<(String, OutputMode)>>,
}

#[async_trait::async_trait]
impl TextSink for RecordingSink {
    async fn output(&self, text: &str, mode: OutputMode) -> Result<String, OutputError> {
        self.delivered
            .lock()
            .unwrap()
            .push((text.to_string(), mode));
        Ok("recording".to_string())
    }
}

#[derive(Default)]
pub struct FakeSynth {
    pub spoken: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl SpeechSynthesizer for FakeSynth {
    fn preload(&self) -> Result<(), TtsError> {
        Ok(())
    }

    async fn speak(&self, text: &str, _options: &SpeakOptions) -> Result<(), TtsError> {
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// A monitor wired to fakes, plus handles to inspect them
pub struct Rig {
    pub monitor: HotkeyMonitor,
    pub hook: Arc<FakeHook>,
    pub recognizer: Arc<FakeRecognizer>,
    pub sink: Arc<RecordingSink>,
    pub readiness: Arc<ReadinessTracker>,
}

pub fn rig(lock: Arc<HotkeyLock>, script: Script) -> Rig {
    rig_with(&Config::default(), lock, script)
}

pub fn rig_with(config: &Config, lock: Arc<HotkeyLock>, script: Script) -> Rig {
    let hook = Arc::new(FakeHook::default());
    let recognizer = Arc::new(FakeRecognizer::new(script));
    let sink = Arc::new(RecordingSink::default());
    let readiness = Arc::new(ReadinessTracker::new());

    let deps = MonitorDeps {
        hook: hook.clone(),
        lock,
        recognizer: recognizer.clone(),
        cues: Arc::new(SilentCuePlayer),
        sink: sink.clone(),
        readiness: readiness.clone(),
    };
    Rig {
        monitor: HotkeyMonitor::new(config, deps),
        hook,
        recognizer,
        sink,
        readiness,
    }
}

/// The tool surface over a rig with an unguarded lock and a failing hook
pub fn tools(readiness: Arc<ReadinessTracker>, synth: Arc<FakeSynth>) -> VoiceTools {
    let config = Config::default();
    let deps = MonitorDeps {
        hook: Arc::new(FakeHook {
            fail: true,
            ..Default::default()
        }),
        lock: Arc::new(HotkeyLock::with_backend(RESOURCE, None)),
        recognizer: Arc::new(FakeRecognizer::new(Script::Text(""))),
        cues: Arc::new(SilentCuePlayer),
        sink: Arc::new(RecordingSink::default()),
        readiness: readiness.clone(),
    };
    let monitor = HotkeyMonitor::new(&config, deps);
    VoiceTools::new(config, readiness, synth, monitor)
}

/// Poll `condition` every few milliseconds for up to two seconds
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

//! Server lifecycle
//!
//! Builds every component once at startup and hands them to the tool
//! surface by reference. `run` schedules the engine warm-ups, optionally
//! starts hotkey monitoring (tracked as the `hotkey` component), serves MCP
//! on stdio and cleans up on stdin EOF, SIGINT, SIGTERM or SIGHUP.

use crate::audio::feedback::{create_cue_player, CuePlayer};
use crate::config::Config;
use crate::error::{ReadinessError, Result};
use crate::hotkey::SystemHotkeyHook;
use crate::loader::BackgroundLoader;
use crate::lock::HotkeyLock;
use crate::mcp::McpServer;
use crate::monitor::{HotkeyMonitor, MonitorDeps};
use crate::output::CommandTextSink;
use crate::readiness::ReadinessTracker;
use crate::tools::VoiceTools;
use crate::transcribe::recognizer::WhisperRecognizer;
use crate::transcribe::SpeechRecognizer;
use crate::tts::{CommandSynthesizer, SpeechSynthesizer};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;

/// Longest a forced session abort may take during shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

pub struct VoiceServer {
    config: Config,
    loader: BackgroundLoader,
    tts: Arc<dyn SpeechSynthesizer>,
    recognizer: Arc<WhisperRecognizer>,
    tools: Arc<VoiceTools>,
}

impl VoiceServer {
    /// Construct every component from the resolved configuration
    pub fn new(config: Config) -> Self {
        let readiness = Arc::new(ReadinessTracker::new());
        let tts: Arc<dyn SpeechSynthesizer> = Arc::new(CommandSynthesizer::new(&config.tts));
        let recognizer = Arc::new(WhisperRecognizer::new(&config.stt));
        let cues: Arc<dyn CuePlayer> = Arc::from(create_cue_player(&config.audio_cues));

        let lock = HotkeyLock::from_config(&config.hotkey.name, &config.hotkey.lock);
        let deps = MonitorDeps {
            hook: Arc::new(SystemHotkeyHook),
            lock: Arc::new(lock),
            recognizer: recognizer.clone() as Arc<dyn SpeechRecognizer>,
            cues,
            sink: Arc::new(CommandTextSink::new(&config.output)),
            readiness: readiness.clone(),
        };
        let monitor = HotkeyMonitor::new(&config, deps);
        let tools = Arc::new(VoiceTools::new(
            config.clone(),
            readiness.clone(),
            tts.clone(),
            monitor,
        ));

        Self {
            config,
            loader: BackgroundLoader::new(readiness),
            tts,
            recognizer,
            tools,
        }
    }

    pub fn tools(&self) -> &Arc<VoiceTools> {
        &self.tools
    }

    /// Register and warm up every enabled engine that has preload on.
    ///
    /// Engines without preload are loaded by their first use instead.
    pub fn start_preloads(&self) -> std::result::Result<(), ReadinessError> {
        let tracker = self.loader.tracker();

        if self.config.tts.enabled && self.config.tts.preload {
            tracker.register("tts")?;
            let tts = self.tts.clone();
            self.loader.schedule("tts", move || Ok(tts.preload()?))?;
        }

        if self.config.stt.enabled && self.config.stt.preload {
            tracker.register("stt")?;
            let recognizer = self.recognizer.clone();
            self.loader
                .schedule("stt", move || Ok(recognizer.preload()?))?;
        }

        if tracker.snapshot().components.is_empty() {
            tracing::info!("No engines scheduled for preloading");
        }
        Ok(())
    }

    /// Serve MCP on stdin/stdout until the client goes away or a signal arrives
    pub async fn run(self, start_hotkey: bool) -> Result<()> {
        tracing::info!("Starting voice-mcp {}", env!("CARGO_PKG_VERSION"));
        self.start_preloads()?;
        let idle_unload = self.recognizer.start_idle_unload();

        let hotkey = &self.config.hotkey;
        if start_hotkey && hotkey.enabled && hotkey.auto_start {
            let status = self.tools.autostart_hotkey_monitoring().await;
            tracing::info!("{}", status);
        }

        let server = McpServer::new(self.tools.clone());
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();

        tokio::select! {
            result = server.serve(stdin, stdout) => {
                if let Err(e) = result {
                    tracing::error!("MCP transport failed: {}", e);
                }
            }
            signal = shutdown_signal() => {
                tracing::info!("Received {}, shutting down...", signal);
            }
        }

        self.shutdown().await;
        if let Some(task) = idle_unload {
            task.abort();
        }
        Ok(())
    }

    /// Stop monitoring and release the hotkey lock if a session holds it
    pub async fn shutdown(&self) {
        let monitor = self.tools.monitor();
        match tokio::time::timeout(SHUTDOWN_GRACE, monitor.stop_monitoring(true)).await {
            Ok(Ok(outcome)) if outcome.session_aborted => {
                tracing::info!("Aborted the dictation in progress")
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!("Error stopping hotkey monitoring: {}", e),
            Err(_) => tracing::warn!("Timed out stopping hotkey monitoring"),
        }
        tracing::info!("voice-mcp stopped");
    }
}

/// Resolves with the name of the first termination signal received
#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, Signal, SignalKind};

    async fn recv(signal: &mut Option<Signal>) {
        match signal {
            Some(signal) => {
                signal.recv().await;
            }
            None => std::future::pending().await,
        }
    }

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| tracing::warn!("Failed to set up SIGTERM handler: {}", e))
        .ok();
    let mut sighup = signal(SignalKind::hangup())
        .map_err(|e| tracing::warn!("Failed to set up SIGHUP handler: {}", e))
        .ok();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = recv(&mut sigterm) => "SIGTERM",
        _ = recv(&mut sighup) => "SIGHUP",
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    "Ctrl+C"
}

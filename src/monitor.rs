//! Hotkey monitor: turns hotkey presses into dictation sessions
//!
//! Every press tries the cross-process [`HotkeyLock`] once. The loser of a
//! race forfeits silently; the winner runs one session on its own task:
//!
//! ```text
//! press -> try lock -> Capturing -> Transcribing -> Outputting -> Done
//!                  \-> forfeit                  any step -> Aborted
//! ```
//!
//! The lock is released on every exit path, including a panicking or
//! cancelled session task.

use crate::audio::feedback::{Cue, CuePlayer};
use crate::config::{Config, HotkeyConfig, SttConfig};
use crate::error::{MonitorError, TranscribeError};
use crate::hotkey::{HotkeyEvent, HotkeyHook, HotkeyListener, HotkeySpec};
use crate::lock::{HotkeyLock, LockAttempt, LockGuard, LockHandle, LockStatus};
use crate::output::TextSink;
use crate::readiness::{ComponentStatus, ReadinessTracker};
use crate::session::{HotkeySession, SessionState};
use crate::transcribe::{ListenObserver, ListenRequest, SpeechRecognizer};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// How long a press waits for speech-to-text that is still loading
const STT_READY_WAIT: Duration = Duration::from_secs(2);

/// Collaborators the monitor drives
#[derive(Clone)]
pub struct MonitorDeps {
    pub hook: Arc<dyn HotkeyHook>,
    pub lock: Arc<HotkeyLock>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub cues: Arc<dyn CuePlayer>,
    pub sink: Arc<dyn TextSink>,
    pub readiness: Arc<ReadinessTracker>,
}

/// Press and session counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorStats {
    pub activations: u64,
    pub forfeited: u64,
    pub sessions: u64,
    pub completed: u64,
    pub aborted: u64,
}

/// Snapshot returned by [`HotkeyMonitor::get_status`]
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub active: bool,
    pub hotkey_name: String,
    pub description: Option<String>,
    pub is_combination: bool,
    /// State of the session in progress, or Idle
    pub state: SessionState,
    pub session: Option<HotkeySession>,
    pub last_session: Option<HotkeySession>,
    pub lock: LockStatus,
    pub stats: MonitorStats,
}

/// What [`HotkeyMonitor::stop_monitoring`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOutcome {
    /// Monitoring was running before the call
    pub was_active: bool,
    /// A session was cancelled because of `force_abort`
    pub session_aborted: bool,
    /// A session is still running and will finish on its own
    pub session_in_progress: bool,
}

#[derive(Default)]
struct Control {
    listener: Option<Box<dyn HotkeyListener>>,
    events: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct SessionBook {
    current: Option<HotkeySession>,
    last: Option<HotkeySession>,
    task: Option<JoinHandle<()>>,
    next_id: u64,
    stats: MonitorStats,
}

struct MonitorInner {
    hotkey: HotkeyConfig,
    stt: SttConfig,
    deps: MonitorDeps,
    control: tokio::sync::Mutex<Control>,
    book: Mutex<SessionBook>,
    active: AtomicBool,
    idle: watch::Sender<bool>,
}

/// Listens for the configured hotkey and runs dictation sessions
#[derive(Clone)]
pub struct HotkeyMonitor {
    inner: Arc<MonitorInner>,
}

impl HotkeyMonitor {
    pub fn new(config: &Config, deps: MonitorDeps) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            inner: Arc::new(MonitorInner {
                hotkey: config.hotkey.clone(),
                stt: config.stt.clone(),
                deps,
                control: tokio::sync::Mutex::new(Control::default()),
                book: Mutex::new(SessionBook::default()),
                active: AtomicBool::new(false),
                idle,
            }),
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn hotkey_name(&self) -> &str {
        &self.inner.hotkey.name
    }

    /// Install the hotkey hook and start handling presses
    ///
    /// Returns the human description of the hotkey.
    pub async fn start_monitoring(&self) -> Result<String, MonitorError> {
        if !self.inner.hotkey.enabled {
            return Err(MonitorError::Disabled);
        }

        let mut control = self.inner.control.lock().await;
        if control.events.is_some() {
            return Err(MonitorError::AlreadyMonitoring);
        }

        let spec = HotkeySpec::parse(&self.inner.hotkey.name)?;
        let mut listener = self.inner.deps.hook.install(&spec)?;
        let rx = listener.start().await?;

        let inner = self.inner.clone();
        control.events = Some(tokio::spawn(async move { inner.event_loop(rx).await }));
        control.listener = Some(listener);
        self.inner.active.store(true, Ordering::SeqCst);

        if !self.inner.deps.lock.is_guarded() {
            tracing::error!(
                "Hotkey '{}' is monitored WITHOUT a cross-process lock; other instances may \
                 handle the same press",
                spec
            );
        }
        tracing::info!("Hotkey monitoring started ({})", spec.description());
        Ok(spec.description())
    }

    /// Remove the hook. A running session finishes unless `force_abort` is set.
    ///
    /// Calling this while not monitoring is not an error.
    pub async fn stop_monitoring(&self, force_abort: bool) -> Result<StopOutcome, MonitorError> {
        let mut control = self.inner.control.lock().await;
        let was_active = control.events.is_some();

        if let Some(mut listener) = control.listener.take() {
            if let Err(e) = listener.stop().await {
                tracing::warn!("Failed to stop hotkey listener: {}", e);
            }
        }
        if let Some(events) = control.events.take() {
            events.abort();
        }
        self.inner.active.store(false, Ordering::SeqCst);
        drop(control);

        let session_aborted = force_abort && self.abort_session().await;
        let session_in_progress = self.inner.book().current.is_some();

        if was_active {
            tracing::info!("Hotkey monitoring stopped");
        }
        Ok(StopOutcome {
            was_active,
            session_aborted,
            session_in_progress,
        })
    }

    /// Cancel the running session; its lock is released as the task unwinds
    async fn abort_session(&self) -> bool {
        let task = self.inner.book().task.take();
        match task {
            Some(task) => {
                task.abort();
                let _ = task.await;
                tracing::info!("Hotkey session aborted");
                true
            }
            None => false,
        }
    }

    /// Wait until no session is running; false on timeout
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let mut rx = self.inner.idle.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|idle| *idle))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    pub fn get_status(&self) -> MonitorStatus {
        let spec = HotkeySpec::parse(&self.inner.hotkey.name).ok();
        let book = self.inner.book();
        MonitorStatus {
            active: self.is_active(),
            hotkey_name: self.inner.hotkey.name.clone(),
            description: spec.as_ref().map(|s| s.description()),
            is_combination: spec.as_ref().is_some_and(|s| s.is_combination()),
            state: book
                .current
                .as_ref()
                .map_or(SessionState::Idle, |s| s.state),
            session: book.current.clone(),
            last_session: book.last.clone(),
            lock: self.inner.deps.lock.status(),
            stats: book.stats.clone(),
        }
    }
}

impl MonitorInner {
    fn book(&self) -> MutexGuard<'_, SessionBook> {
        self.book.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn event_loop(self: Arc<Self>, mut rx: mpsc::Receiver<HotkeyEvent>) {
        while let Some(event) = rx.recv().await {
            if event == HotkeyEvent::Pressed {
                self.on_activation().await;
            }
        }
        tracing::debug!("Hotkey event stream closed");
    }

    /// Presses are handled one at a time by the event loop
    async fn on_activation(self: &Arc<Self>) {
        {
            let mut book = self.book();
            book.stats.activations += 1;
            if book.current.is_some() {
                tracing::debug!("Hotkey pressed during a session; ignoring");
                return;
            }
        }

        // File I/O and guard retries stay off the runtime and outside the book
        let lock = self.deps.lock.clone();
        let attempt = tokio::task::spawn_blocking(move || lock.try_acquire()).await;
        let guard = match attempt {
            Ok(Ok(LockAttempt::Held(guard))) => Some(guard),
            Ok(Ok(LockAttempt::Unguarded)) => None,
            Ok(Ok(LockAttempt::Denied(_))) => {
                self.book().stats.forfeited += 1;
                return;
            }
            Ok(Err(e)) => {
                tracing::warn!("Hotkey lock attempt failed, forfeiting press: {}", e);
                self.book().stats.forfeited += 1;
                return;
            }
            Err(e) => {
                tracing::warn!("Hotkey lock attempt did not complete, forfeiting press: {}", e);
                self.book().stats.forfeited += 1;
                return;
            }
        };

        let mut book = self.book();
        book.next_id += 1;
        let id = book.next_id;
        let handle = guard.as_ref().map(|g| g.handle().clone());
        book.current = Some(HotkeySession::new(id, self.hotkey.output_mode, handle.clone()));
        book.stats.sessions += 1;
        self.idle.send_replace(false);

        let mut finisher = SessionFinisher {
            inner: self.clone(),
            id,
            guard,
        };
        let inner = self.clone();
        book.task = Some(tokio::spawn(async move {
            if let Err(reason) = inner.drive_session(id, handle.as_ref()).await {
                tracing::warn!("Hotkey session {} aborted: {}", id, reason);
                inner.play_cue(Cue::Error);
                inner.update_session(id, |s| s.abort(reason));
            }
            finisher.release_lock().await;
        }));
        tracing::info!("Hotkey session {} started", id);
    }

    async fn drive_session(&self, id: u64, handle: Option<&LockHandle>) -> Result<(), String> {
        self.ensure_stt_ready().await?;

        self.update_session(id, |s| s.advance(SessionState::Capturing));
        self.play_cue(Cue::On);

        let request = ListenRequest {
            language: self.stt.language.clone(),
            silence_threshold: self.stt.silence_threshold(),
            max_duration: self.stt.max_duration(),
            model: None,
        };
        let observer = SessionObserver {
            inner: self,
            id,
            handle,
        };
        let result = self
            .deps
            .recognizer
            .transcribe_until_silence(&request, &observer)
            .await;
        self.play_cue(Cue::Off);

        let text = match result {
            Ok(text) => text,
            Err(TranscribeError::NoSpeech) => {
                tracing::info!("No speech detected");
                String::new()
            }
            Err(e) => return Err(e.to_string()),
        };
        observer.on_capture_finished();

        let text = text.trim();
        if text.is_empty() {
            self.update_session(id, |s| s.advance(SessionState::Done));
            return Ok(());
        }

        // Typing must never race another instance that took the hotkey over
        self.renew_lock(handle).await?;

        let mode = self.update_session(id, |s| {
            s.record_transcript(text);
            s.advance(SessionState::Outputting);
            s.output_mode
        });
        let Some(mode) = mode else {
            return Ok(());
        };

        let method = self
            .deps
            .sink
            .output(text, mode)
            .await
            .map_err(|e| e.to_string())?;

        self.update_session(id, |s| {
            s.delivered_via = Some(method);
            s.advance(SessionState::Done)
        });
        tracing::info!("Hotkey session {} done ({} characters)", id, text.chars().count());
        Ok(())
    }

    /// Restart the lock's max-hold clock; fails if another instance reclaimed it
    async fn renew_lock(&self, handle: Option<&LockHandle>) -> Result<(), String> {
        let Some(handle) = handle.cloned() else {
            return Ok(());
        };
        let lock = self.deps.lock.clone();
        match tokio::task::spawn_blocking(move || lock.renew(&handle)).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err("Hotkey lock was taken over by another instance".to_string()),
            Ok(Err(e)) => {
                tracing::warn!("Could not renew hotkey lock: {}", e);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Hotkey lock renewal did not complete: {}", e);
                Ok(())
            }
        }
    }

    /// Speech-to-text must be Ready if it is tracked at all
    async fn ensure_stt_ready(&self) -> Result<(), String> {
        let readiness = &self.deps.readiness;
        match readiness.get("stt") {
            None => return Ok(()),
            Some(state) if state.status == ComponentStatus::Ready => return Ok(()),
            Some(_) => {}
        }

        let state = readiness
            .wait_for("stt", STT_READY_WAIT)
            .await
            .map_err(|e| e.to_string())?;
        match state.status {
            ComponentStatus::Ready => Ok(()),
            ComponentStatus::Failed => Err(format!(
                "Speech-to-text failed to load: {}",
                state.error.unwrap_or_default()
            )),
            _ => Err("Speech-to-text is not ready yet (still loading)".to_string()),
        }
    }

    fn play_cue(&self, cue: Cue) {
        if let Err(e) = self.deps.cues.play(cue) {
            tracing::debug!("Could not play {} cue: {}", cue.name(), e);
        }
    }

    /// Apply `f` to the current session if it is still session `id`
    fn update_session<R>(&self, id: u64, f: impl FnOnce(&mut HotkeySession) -> R) -> Option<R> {
        let mut book = self.book();
        book.current.as_mut().filter(|s| s.id == id).map(f)
    }

    fn finish_session(&self, id: u64) {
        let mut book = self.book();
        if book.current.as_ref().map(|s| s.id) != Some(id) {
            return;
        }
        let Some(mut session) = book.current.take() else {
            return;
        };

        if !session.state.is_finished() {
            session.abort("Session cancelled before completion");
        }
        match session.state {
            SessionState::Done => book.stats.completed += 1,
            _ => book.stats.aborted += 1,
        }
        tracing::debug!(
            "Hotkey session {} finished as {} after {:.1}s",
            id,
            session.state,
            session.duration_secs()
        );

        book.last = Some(session);
        book.task = None;
        drop(book);
        self.idle.send_replace(true);
    }
}

/// Moves the session to Transcribing when capture ends
struct SessionObserver<'a> {
    inner: &'a MonitorInner,
    id: u64,
    handle: Option<&'a LockHandle>,
}

impl ListenObserver for SessionObserver<'_> {
    fn on_capture_finished(&self) {
        let started = self.inner.update_session(self.id, |s| {
            let capturing = s.state == SessionState::Capturing;
            if capturing {
                s.advance(SessionState::Transcribing);
            }
            capturing
        });

        // Transcription gets a full max-hold window of its own
        if let (Some(true), Some(handle)) = (started, self.handle) {
            let lock = self.inner.deps.lock.clone();
            let handle = handle.clone();
            tokio::task::spawn_blocking(move || {
                if let Err(e) = lock.renew(&handle) {
                    tracing::warn!("Could not renew hotkey lock: {}", e);
                }
            });
        }
    }

    fn on_partial(&self, text: &str) {
        tracing::debug!("Session {} heard {} characters", self.id, text.chars().count());
    }
}

/// Releases the lock and files the session away when the session task ends
///
/// A session that runs to the end releases through [`Self::release_lock`];
/// a cancelled or panicking one releases in `drop`.
struct SessionFinisher {
    inner: Arc<MonitorInner>,
    id: u64,
    guard: Option<LockGuard>,
}

impl SessionFinisher {
    async fn release_lock(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        match tokio::task::spawn_blocking(move || guard.release()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Hotkey lock release failed: {}", e),
            Err(e) => tracing::warn!("Hotkey lock release did not complete: {}", e),
        }
    }
}

impl Drop for SessionFinisher {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            if let Err(e) = guard.release() {
                tracing::warn!("Hotkey lock release failed: {}", e);
            }
        }
        self.inner.finish_session(self.id);
    }
}

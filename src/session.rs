//! State machine for one hotkey dictation session
//!
//! Idle → Capturing → Transcribing → Outputting → Done
//!
//! Any active state may drop to Aborted. Done and Aborted are final; the
//! monitor keeps the finished session around for status reports.

use crate::config::OutputMode;
use crate::lock::LockHandle;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, lock held, capture not started yet
    Idle,
    /// Microphone open, waiting for the silence threshold
    Capturing,
    /// Audio captured, speech recognition running
    Transcribing,
    /// Delivering text to the output sink
    Outputting,
    Done,
    Aborted,
}

impl SessionState {
    /// Capturing, Transcribing or Outputting
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Capturing | SessionState::Transcribing | SessionState::Outputting
        )
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Aborted)
    }

    fn can_move_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle, Capturing)
            | (Capturing, Transcribing)
            | (Transcribing, Outputting)
            | (Transcribing, Done)
            | (Outputting, Done) => true,
            (from, Aborted) => !from.is_finished(),
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Idle => "Idle",
            SessionState::Capturing => "Capturing",
            SessionState::Transcribing => "Transcribing",
            SessionState::Outputting => "Outputting",
            SessionState::Done => "Done",
            SessionState::Aborted => "Aborted",
        };
        f.write_str(s)
    }
}

/// One press-to-transcribe interaction
#[derive(Debug, Clone, Serialize)]
pub struct HotkeySession {
    pub id: u64,
    pub state: SessionState,
    /// Fixed when the session starts
    pub output_mode: OutputMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// None when the hotkey runs without cross-instance arbitration
    pub lock: Option<LockHandle>,
    /// Number of characters recognized
    pub characters: Option<usize>,
    /// Recognized text, kept only in return mode
    pub transcript: Option<String>,
    /// Output method that delivered the text
    pub delivered_via: Option<String>,
    /// Why the session was aborted
    pub error: Option<String>,
}

impl HotkeySession {
    pub fn new(id: u64, output_mode: OutputMode, lock: Option<LockHandle>) -> Self {
        Self {
            id,
            state: SessionState::Idle,
            output_mode,
            started_at: Utc::now(),
            finished_at: None,
            lock,
            characters: None,
            transcript: None,
            delivered_via: None,
            error: None,
        }
    }

    /// Move to `next`; illegal moves are refused and leave the state unchanged
    pub fn advance(&mut self, next: SessionState) -> bool {
        if !self.state.can_move_to(next) {
            tracing::warn!("Session {} cannot move from {} to {}", self.id, self.state, next);
            return false;
        }
        tracing::debug!("Session {}: {} -> {}", self.id, self.state, next);
        self.state = next;
        if next.is_finished() {
            self.finished_at = Some(Utc::now());
        }
        true
    }

    pub fn record_transcript(&mut self, text: &str) {
        self.characters = Some(text.chars().count());
        if self.output_mode == OutputMode::Return {
            self.transcript = Some(text.to_string());
        }
    }

    pub fn abort(&mut self, error: impl Into<String>) {
        if self.advance(SessionState::Aborted) {
            self.error = Some(error.into());
        }
    }

    pub fn duration_secs(&self) -> f64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_idle() {
        let session = HotkeySession::new(1, OutputMode::Typing, None);
        assert_eq!(session.state, SessionState::Idle);
        assert!(!session.state.is_active());
        assert!(session.finished_at.is_none());
    }

    #[test]
    fn test_full_lifecycle() {
        let mut session = HotkeySession::new(1, OutputMode::Clipboard, None);
        for next in [
            SessionState::Capturing,
            SessionState::Transcribing,
            SessionState::Outputting,
            SessionState::Done,
        ] {
            assert!(session.advance(next));
        }
        assert!(session.state.is_finished());
        assert!(session.finished_at.is_some());
    }

    #[test]
    fn test_illegal_moves_are_refused() {
        let mut session = HotkeySession::new(1, OutputMode::Typing, None);
        assert!(!session.advance(SessionState::Outputting));
        assert!(!session.advance(SessionState::Done));
        assert_eq!(session.state, SessionState::Idle);
    }

    #[test]
    fn test_abort_records_error_once() {
        let mut session = HotkeySession::new(1, OutputMode::Typing, None);
        session.advance(SessionState::Capturing);
        session.advance(SessionState::Transcribing);
        session.abort("model crashed");
        assert_eq!(session.state, SessionState::Aborted);
        assert_eq!(session.error.as_deref(), Some("model crashed"));

        session.abort("second");
        assert_eq!(session.error.as_deref(), Some("model crashed"));
        assert!(!session.advance(SessionState::Capturing));
    }

    #[test]
    fn test_transcript_kept_only_in_return_mode() {
        let mut typing = HotkeySession::new(1, OutputMode::Typing, None);
        typing.record_transcript("héllo");
        assert_eq!(typing.characters, Some(5));
        assert!(typing.transcript.is_none());

        let mut ret = HotkeySession::new(2, OutputMode::Return, None);
        ret.record_transcript("hello");
        assert_eq!(ret.transcript.as_deref(), Some("hello"));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Transcribing.to_string(), "Transcribing");
        assert_eq!(format!("{}", SessionState::Idle), "Idle");
    }
}

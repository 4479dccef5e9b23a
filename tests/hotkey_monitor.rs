//! Hotkey monitor driven end to end with fake hook, recognizer and sink
//!
//! The lock is the real marker-file backend in a temporary directory.

mod common;

use chrono::Utc;
use common::{eventually, file_lock, marker_path, rig, Script, RESOURCE};
use std::path::Path;
use std::time::Duration;
use voice_mcp::config::OutputMode;
use voice_mcp::error::MonitorError;
use voice_mcp::lock::{HolderId, LockRecord};
use voice_mcp::session::SessionState;

fn plant_marker(dir: &Path, pid: u32, age_secs: i64) {
    let mut record = LockRecord::new(
        RESOURCE,
        &HolderId {
            pid,
            token: uuid::Uuid::new_v4(),
        },
    );
    record.acquired_at = Utc::now() - chrono::Duration::seconds(age_secs);
    std::fs::write(marker_path(dir), serde_json::to_vec(&record).unwrap()).unwrap();
}

#[tokio::test]
async fn press_after_crashed_holder_reclaims_and_abort_releases() {
    let dir = tempfile::tempdir().unwrap();
    // Left behind by an instance that died six seconds ago
    plant_marker(dir.path(), i32::MAX as u32, 6);

    let rig = rig(file_lock(dir.path()), Script::Gate("never delivered"));
    rig.monitor.start_monitoring().await.unwrap();
    rig.hook.press().await;

    let monitor = rig.monitor.clone();
    assert!(eventually(|| monitor.get_status().state == SessionState::Capturing).await);

    let status = rig.monitor.get_status();
    assert!(status.lock.held.is_some());
    assert_eq!(status.lock.stats.reclaimed, 1);
    assert_eq!(
        &status.lock.current_holder.unwrap().holder,
        &status.lock.holder_id
    );

    let outcome = rig.monitor.stop_monitoring(true).await.unwrap();
    assert!(outcome.was_active);
    assert!(outcome.session_aborted);
    assert!(!outcome.session_in_progress);

    assert!(!marker_path(dir.path()).exists());
    let status = rig.monitor.get_status();
    assert!(!status.active);
    assert_eq!(status.state, SessionState::Idle);
    assert_eq!(status.last_session.unwrap().state, SessionState::Aborted);
    assert!(status.lock.held.is_none());
    assert!(rig.sink.delivered.lock().unwrap().is_empty());
}

#[tokio::test]
async fn completed_session_delivers_text_and_releases() {
    let dir = tempfile::tempdir().unwrap();
    let rig = rig(file_lock(dir.path()), Script::Text(" turn on the lights "));
    rig.monitor.start_monitoring().await.unwrap();
    rig.hook.press().await;

    assert!(rig.monitor.wait_for_idle(Duration::from_secs(2)).await);
    let monitor = rig.monitor.clone();
    assert!(eventually(|| monitor.get_status().last_session.is_some()).await);

    let last = rig.monitor.get_status().last_session.unwrap();
    assert_eq!(last.state, SessionState::Done);
    assert_eq!(last.characters, Some(18));
    assert!(last.transcript.is_none(), "typing mode does not keep the text");
    assert_eq!(last.delivered_via.as_deref(), Some("recording"));
    assert!(last.finished_at.is_some());
    assert_eq!(
        *rig.sink.delivered.lock().unwrap(),
        [("turn on the lights".to_string(), OutputMode::Typing)]
    );
    assert!(!marker_path(dir.path()).exists());
}

#[tokio::test]
async fn failed_transcription_releases_lock_and_returns_to_idle() {
    let dir = tempfile::tempdir().unwrap();
    let rig = rig(file_lock(dir.path()), Script::FailTranscribing("decoder exploded"));
    rig.monitor.start_monitoring().await.unwrap();
    rig.hook.press().await;

    let monitor = rig.monitor.clone();
    assert!(eventually(|| monitor.get_status().last_session.is_some()).await);

    let status = rig.monitor.get_status();
    let last = status.last_session.unwrap();
    assert_eq!(last.state, SessionState::Aborted);
    assert!(last.error.unwrap().contains("decoder exploded"));
    assert_eq!(status.state, SessionState::Idle);
    assert_eq!(status.stats.aborted, 1);
    assert!(status.active, "monitoring survives a failed session");
    assert!(!marker_path(dir.path()).exists());

    // The next press gets the lock again
    rig.hook.press().await;
    let monitor = rig.monitor.clone();
    assert!(eventually(|| monitor.get_status().stats.sessions == 2).await);
}

#[tokio::test]
async fn press_forfeits_while_another_instance_holds_the_hotkey() {
    let dir = tempfile::tempdir().unwrap();
    // A live holder (this very process, another instance token) took it just now
    plant_marker(dir.path(), std::process::id(), 0);

    let rig = rig(file_lock(dir.path()), Script::Text("mine"));
    rig.monitor.start_monitoring().await.unwrap();
    rig.hook.press().await;

    let monitor = rig.monitor.clone();
    assert!(eventually(|| monitor.get_status().stats.forfeited == 1).await);

    let status = rig.monitor.get_status();
    assert_eq!(status.stats.sessions, 0);
    assert!(status.session.is_none());
    assert!(status.last_session.is_none());
    assert_eq!(status.lock.stats.denied, 1);
    assert_eq!(rig.recognizer.calls(), 0);
    assert!(marker_path(dir.path()).exists(), "the holder's marker is untouched");
}

#[tokio::test]
async fn second_press_during_session_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let rig = rig(file_lock(dir.path()), Script::Gate("once"));
    rig.monitor.start_monitoring().await.unwrap();

    rig.hook.press().await;
    let monitor = rig.monitor.clone();
    assert!(eventually(|| monitor.get_status().state == SessionState::Capturing).await);

    rig.hook.press().await;
    let monitor = rig.monitor.clone();
    assert!(eventually(|| monitor.get_status().stats.activations == 2).await);
    assert_eq!(rig.monitor.get_status().stats.sessions, 1);

    rig.recognizer.gate.notify_one();
    assert!(rig.monitor.wait_for_idle(Duration::from_secs(2)).await);
    assert_eq!(rig.recognizer.calls(), 1);
    assert_eq!(rig.sink.delivered.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn graceful_stop_lets_the_session_finish() {
    let dir = tempfile::tempdir().unwrap();
    let rig = rig(file_lock(dir.path()), Script::Gate("finish me"));
    rig.monitor.start_monitoring().await.unwrap();
    rig.hook.press().await;

    let monitor = rig.monitor.clone();
    assert!(eventually(|| monitor.get_status().state == SessionState::Capturing).await);

    let outcome = rig.monitor.stop_monitoring(false).await.unwrap();
    assert!(outcome.was_active);
    assert!(!outcome.session_aborted);
    assert!(outcome.session_in_progress);
    assert!(!rig.monitor.is_active());
    assert!(marker_path(dir.path()).exists());

    rig.recognizer.gate.notify_one();
    assert!(rig.monitor.wait_for_idle(Duration::from_secs(2)).await);

    let last = rig.monitor.get_status().last_session.unwrap();
    assert_eq!(last.state, SessionState::Done);
    assert!(!marker_path(dir.path()).exists());
}

#[tokio::test]
async fn stop_is_idempotent_and_start_rejects_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let rig = rig(file_lock(dir.path()), Script::Text("unused"));

    let outcome = rig.monitor.stop_monitoring(true).await.unwrap();
    assert!(!outcome.was_active);

    rig.monitor.start_monitoring().await.unwrap();
    assert!(matches!(
        rig.monitor.start_monitoring().await,
        Err(MonitorError::AlreadyMonitoring)
    ));

    assert!(rig.monitor.stop_monitoring(false).await.unwrap().was_active);
    let again = rig.monitor.stop_monitoring(false).await.unwrap();
    assert!(!again.was_active);
    assert!(!again.session_in_progress);

    // Restart after a stop installs a fresh hook
    rig.monitor.start_monitoring().await.unwrap();
    assert!(rig.monitor.is_active());
}

#[tokio::test]
async fn session_that_lost_the_lock_does_not_deliver() {
    let dir = tempfile::tempdir().unwrap();
    let rig = rig(file_lock(dir.path()), Script::Gate("too late"));
    rig.monitor.start_monitoring().await.unwrap();
    rig.hook.press().await;

    let monitor = rig.monitor.clone();
    assert!(eventually(|| monitor.get_status().state == SessionState::Capturing).await);

    // Another instance reclaimed the marker while we were still capturing
    plant_marker(dir.path(), std::process::id(), 0);
    rig.recognizer.gate.notify_one();

    let monitor = rig.monitor.clone();
    assert!(eventually(|| monitor.get_status().last_session.is_some()).await);

    let last = rig.monitor.get_status().last_session.unwrap();
    assert_eq!(last.state, SessionState::Aborted);
    assert!(last.error.unwrap().contains("taken over"));
    assert!(rig.sink.delivered.lock().unwrap().is_empty());

    // The new owner's marker is left alone
    let record: LockRecord =
        serde_json::from_slice(&std::fs::read(marker_path(dir.path())).unwrap()).unwrap();
    assert_ne!(record.holder, rig.monitor.get_status().lock.holder_id);
}

//! Background loading as observed through the tool surface

mod common;

use common::{eventually, rig, tools, FakeSynth, Script, RESOURCE};
use std::sync::Arc;
use std::time::Duration;
use voice_mcp::error::ReadinessError;
use voice_mcp::config::Config;
use voice_mcp::loader::BackgroundLoader;
use voice_mcp::lock::HotkeyLock;
use voice_mcp::readiness::{ComponentStatus, ReadinessTracker};
use voice_mcp::tools::{VoiceTools, HOTKEY_COMPONENT};
use voice_mcp::tts::SpeakOptions;

fn loader_with(names: &[&str]) -> BackgroundLoader {
    let tracker = Arc::new(ReadinessTracker::new());
    for name in names {
        tracker.register(name).unwrap();
    }
    BackgroundLoader::new(tracker)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engines_warm_up_in_background_until_all_ready() {
    let loader = loader_with(&["tts", "stt"]);
    let surface = tools(loader.tracker().clone(), Arc::new(FakeSynth::default()));

    loader
        .schedule("tts", || {
            std::thread::sleep(Duration::from_millis(50));
            Ok(())
        })
        .unwrap();
    loader
        .schedule("stt", || {
            std::thread::sleep(Duration::from_millis(80));
            Ok(())
        })
        .unwrap();

    // Scheduling returns before any warm-up completes
    let early = surface.get_loading_status();
    assert!(!early.summary.all_ready);
    assert_eq!(early.summary.total, 2);
    assert!(early
        .components
        .values()
        .all(|c| c.status != ComponentStatus::NotStarted));

    assert!(eventually(|| surface.get_loading_status().summary.all_ready).await);

    let report = surface.get_loading_status();
    assert_eq!(report.summary.ready, 2);
    assert!(!report.summary.any_failed);
    for component in report.components.values() {
        assert_eq!(component.status, ComponentStatus::Ready);
        assert!(component.error.is_none());
        assert!(component.finished_at.is_some());
        assert!(component.elapsed_secs.unwrap() >= 0.04);
    }
}

#[tokio::test]
async fn failed_warm_up_is_reported_with_its_cause() {
    let loader = loader_with(&["tts", "stt"]);
    let surface = tools(loader.tracker().clone(), Arc::new(FakeSynth::default()));

    loader.schedule("tts", || Ok(())).unwrap();
    loader
        .schedule("stt", || anyhow::bail!("model file ggml-base.en.bin not found"))
        .unwrap();
    loader.join_all().await;

    let report = surface.get_loading_status();
    assert!(report.summary.any_failed);
    assert!(!report.summary.all_ready);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.components["tts"].status, ComponentStatus::Ready);

    let stt = &report.components["stt"];
    assert_eq!(stt.status, ComponentStatus::Failed);
    assert!(stt.error.as_deref().unwrap().contains("ggml-base.en.bin"));
}

#[tokio::test]
async fn panicking_warm_up_is_failed_not_stuck() {
    let loader = loader_with(&["stt"]);
    loader
        .schedule("stt", || panic!("whisper context exploded"))
        .unwrap();
    loader.join_all().await;

    let state = loader.tracker().get("stt").unwrap();
    assert_eq!(state.status, ComponentStatus::Failed);
    assert!(state.error.unwrap().contains("whisper context exploded"));
}

#[tokio::test]
async fn speak_waits_for_tts_that_finishes_loading() {
    let loader = loader_with(&["tts"]);
    let synth = Arc::new(FakeSynth::default());
    let surface = tools(loader.tracker().clone(), synth.clone());

    loader
        .schedule("tts", || {
            std::thread::sleep(Duration::from_millis(100));
            Ok(())
        })
        .unwrap();

    let result = surface.speak("Build finished", SpeakOptions::default()).await;
    assert_eq!(result, "✅ Spoke: Build finished");
    assert_eq!(*synth.spoken.lock().unwrap(), ["Build finished"]);
}

#[tokio::test]
async fn speak_refuses_when_tts_failed_to_load() {
    let loader = loader_with(&["tts"]);
    let synth = Arc::new(FakeSynth::default());
    let surface = tools(loader.tracker().clone(), synth.clone());

    loader
        .schedule("tts", || anyhow::bail!("no speech command found"))
        .unwrap();
    loader.join_all().await;

    let result = surface.speak("hello", SpeakOptions::default()).await;
    assert!(result.starts_with("❌ TTS not ready: failed to load"));
    assert!(result.contains("no speech command found"));
    assert!(synth.spoken.lock().unwrap().is_empty());
}

#[test]
fn tracker_rejects_out_of_order_transitions() {
    let tracker = ReadinessTracker::new();
    tracker.register("stt").unwrap();

    assert!(matches!(
        tracker.mark_ready("stt"),
        Err(ReadinessError::InvalidTransition { .. })
    ));
    tracker.mark_loading("stt").unwrap();
    tracker.mark_ready("stt").unwrap();
    assert!(matches!(
        tracker.mark_loading("stt"),
        Err(ReadinessError::InvalidTransition { .. })
    ));
    assert!(matches!(
        tracker.register("stt"),
        Err(ReadinessError::DuplicateComponent(_))
    ));
    assert!(matches!(
        tracker.mark_loading("tts"),
        Err(ReadinessError::UnknownComponent(_))
    ));
}

#[tokio::test]
async fn wait_for_returns_terminal_state_or_times_out() {
    let tracker = Arc::new(ReadinessTracker::new());
    tracker.register("stt").unwrap();
    tracker.mark_loading("stt").unwrap();

    let state = tracker
        .wait_for("stt", Duration::from_millis(30))
        .await
        .unwrap();
    assert_eq!(state.status, ComponentStatus::Loading);

    let marker = tracker.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        marker.mark_failed("stt", "boom").unwrap();
    });
    let state = tracker.wait_for("stt", Duration::from_secs(2)).await.unwrap();
    assert_eq!(state.status, ComponentStatus::Failed);
    assert_eq!(state.error.as_deref(), Some("boom"));
}

#[tokio::test]
async fn hotkey_startup_failure_is_a_failed_component() {
    let readiness = Arc::new(ReadinessTracker::new());
    let surface = tools(readiness.clone(), Arc::new(FakeSynth::default()));

    let status = surface.autostart_hotkey_monitoring().await;
    assert!(status.starts_with("❌ Failed to start hotkey monitoring"));

    let hotkey = readiness.get(HOTKEY_COMPONENT).unwrap();
    assert_eq!(hotkey.status, ComponentStatus::Failed);
    assert!(hotkey.error.unwrap().contains("no input hook"));
    assert!(surface.get_loading_status().summary.any_failed);
}

#[tokio::test]
async fn hotkey_startup_success_is_a_ready_component() {
    let rig = rig(
        Arc::new(HotkeyLock::with_backend(RESOURCE, None)),
        Script::Text(""),
    );
    let readiness = rig.readiness.clone();
    let surface = VoiceTools::new(
        Config::default(),
        readiness.clone(),
        Arc::new(FakeSynth::default()),
        rig.monitor,
    );

    let status = surface.autostart_hotkey_monitoring().await;
    assert!(status.starts_with("✅ Hotkey monitoring started"));
    assert_eq!(
        readiness.get(HOTKEY_COMPONENT).unwrap().status,
        ComponentStatus::Ready
    );

    surface.stop_hotkey_monitoring(false).await;
}

//! Background warm-up of heavyweight components
//!
//! Each scheduled component gets its own blocking task so model loads run
//! in parallel with each other and never stall the protocol loop. Outcomes
//! are recorded in the [`ReadinessTracker`]; nothing is retried.

use crate::error::ReadinessError;
use crate::readiness::ReadinessTracker;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Fires off and tracks one warm-up per component
pub struct BackgroundLoader {
    tracker: Arc<ReadinessTracker>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundLoader {
    pub fn new(tracker: Arc<ReadinessTracker>) -> Self {
        Self {
            tracker,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn tracker(&self) -> &Arc<ReadinessTracker> {
        &self.tracker
    }

    /// Mark `name` Loading and run `warmup` on the blocking pool.
    ///
    /// Returns as soon as the task is spawned. A warm-up that returns an
    /// error or panics leaves the component Failed with the cause as text.
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, name: &str, warmup: F) -> Result<(), ReadinessError>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.tracker.mark_loading(name)?;
        tracing::info!("Loading {} in background", name);

        let tracker = self.tracker.clone();
        let name = name.to_string();
        let work = tokio::task::spawn_blocking(warmup);

        let supervisor = tokio::spawn(async move {
            let outcome = match work.await {
                Ok(Ok(())) => tracker.mark_ready(&name),
                Ok(Err(e)) => {
                    tracing::warn!("Failed to load {}: {:#}", name, e);
                    tracker.mark_failed(&name, format!("{:#}", e))
                }
                Err(join_err) => {
                    let cause = panic_message(join_err);
                    tracing::warn!("Loading {} panicked: {}", name, cause);
                    tracker.mark_failed(&name, cause)
                }
            };

            match outcome {
                Ok(()) => {
                    if let Some(state) = tracker.get(&name) {
                        tracing::info!(
                            "{} is {} after {:.2}s",
                            name,
                            state.status,
                            state.elapsed_secs().unwrap_or_default()
                        );
                    }
                }
                Err(e) => tracing::error!("Could not record load outcome: {}", e),
            }
        });

        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(supervisor);
        Ok(())
    }

    /// Wait for every warm-up scheduled so far to finish
    pub async fn join_all(&self) {
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            let _ = task.await;
        }
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return format!("warm-up task cancelled: {}", err);
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("warm-up panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("warm-up panicked: {}", s)
    } else {
        "warm-up panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readiness::ComponentStatus;
    use std::time::Duration;

    #[tokio::test]
    async fn test_schedule_marks_loading_immediately() {
        let tracker = Arc::new(ReadinessTracker::new());
        tracker.register("tts").unwrap();
        let loader = BackgroundLoader::new(tracker.clone());

        let (tx, rx) = std::sync::mpsc::channel::<()>();
        loader
            .schedule("tts", move || {
                let _ = rx.recv_timeout(Duration::from_secs(5));
                Ok(())
            })
            .unwrap();

        assert_eq!(tracker.get("tts").unwrap().status, ComponentStatus::Loading);
        tx.send(()).unwrap();
        loader.join_all().await;
        assert_eq!(tracker.get("tts").unwrap().status, ComponentStatus::Ready);
    }

    #[tokio::test]
    async fn test_failed_warmup_records_error() {
        let tracker = Arc::new(ReadinessTracker::new());
        tracker.register("stt").unwrap();
        let loader = BackgroundLoader::new(tracker.clone());

        loader
            .schedule("stt", || anyhow::bail!("model file missing"))
            .unwrap();
        loader.join_all().await;

        let state = tracker.get("stt").unwrap();
        assert_eq!(state.status, ComponentStatus::Failed);
        assert!(state.error.unwrap().contains("model file missing"));
    }

    #[tokio::test]
    async fn test_panicking_warmup_is_a_failure() {
        let tracker = Arc::new(ReadinessTracker::new());
        tracker.register("stt").unwrap();
        let loader = BackgroundLoader::new(tracker.clone());

        loader
            .schedule("stt", || panic!("engine exploded"))
            .unwrap();
        loader.join_all().await;

        let state = tracker.get("stt").unwrap();
        assert_eq!(state.status, ComponentStatus::Failed);
        assert!(state.error.unwrap().contains("engine exploded"));
    }

    #[tokio::test]
    async fn test_schedule_twice_is_invalid() {
        let tracker = Arc::new(ReadinessTracker::new());
        tracker.register("tts").unwrap();
        let loader = BackgroundLoader::new(tracker.clone());

        loader.schedule("tts", || Ok(())).unwrap();
        assert!(matches!(
            loader.schedule("tts", || Ok(())),
            Err(ReadinessError::InvalidTransition { .. })
        ));
        loader.join_all().await;
    }

    #[tokio::test]
    async fn test_unregistered_component_is_rejected() {
        let loader = BackgroundLoader::new(Arc::new(ReadinessTracker::new()));
        assert!(matches!(
            loader.schedule("hotkey", || Ok(())),
            Err(ReadinessError::UnknownComponent(_))
        ));
    }
}

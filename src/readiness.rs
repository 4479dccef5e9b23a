//! Component readiness tracking
//!
//! Every heavyweight component (`tts`, `stt`, ...) moves through
//! NotStarted → Loading → {Ready | Failed}. Terminal states are final for
//! the lifetime of the process. Callers can read a snapshot at any time or
//! await a component without polling.

use crate::error::ReadinessError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

/// Load status of a single component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    NotStarted,
    Loading,
    Ready,
    Failed,
}

impl ComponentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ComponentStatus::Ready | ComponentStatus::Failed)
    }
}

impl std::fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ComponentStatus::NotStarted => "not_started",
            ComponentStatus::Loading => "loading",
            ComponentStatus::Ready => "ready",
            ComponentStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Load state of one named component
#[derive(Debug, Clone, Serialize)]
pub struct ComponentState {
    pub name: String,
    pub status: ComponentStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Set only when `status` is Failed
    pub error: Option<String>,
}

impl ComponentState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: ComponentStatus::NotStarted,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// Seconds spent loading, if loading has finished
    pub fn elapsed_secs(&self) -> Option<f64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}

/// Immutable copy of every tracked component
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessSnapshot {
    pub components: BTreeMap<String, ComponentState>,
    /// True iff every registered component is Ready
    pub all_ready: bool,
    pub any_failed: bool,
}

impl ReadinessSnapshot {
    pub fn get(&self, name: &str) -> Option<&ComponentState> {
        self.components.get(name)
    }

    pub fn count(&self, status: ComponentStatus) -> usize {
        self.components
            .values()
            .filter(|c| c.status == status)
            .count()
    }
}

/// Thread-safe store of per-component load state
pub struct ReadinessTracker {
    components: Mutex<BTreeMap<String, ComponentState>>,
    /// Bumped on every transition so waiters wake without polling
    generation: watch::Sender<u64>,
}

impl Default for ReadinessTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessTracker {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            components: Mutex::new(BTreeMap::new()),
            generation,
        }
    }

    /// Add a component in NotStarted state
    pub fn register(&self, name: &str) -> Result<(), ReadinessError> {
        let mut components = self.lock();
        if components.contains_key(name) {
            return Err(ReadinessError::DuplicateComponent(name.to_string()));
        }
        components.insert(name.to_string(), ComponentState::new(name));
        drop(components);

        tracing::debug!("Registered component '{}'", name);
        self.bump();
        Ok(())
    }

    /// NotStarted → Loading
    pub fn mark_loading(&self, name: &str) -> Result<(), ReadinessError> {
        self.transition(name, ComponentStatus::Loading, |state| {
            state.started_at = Some(Utc::now());
        })
    }

    /// Loading → Ready
    pub fn mark_ready(&self, name: &str) -> Result<(), ReadinessError> {
        self.transition(name, ComponentStatus::Ready, |state| {
            state.finished_at = Some(Utc::now());
        })
    }

    /// Loading → Failed
    pub fn mark_failed(&self, name: &str, error: impl Into<String>) -> Result<(), ReadinessError> {
        let error = error.into();
        self.transition(name, ComponentStatus::Failed, move |state| {
            state.finished_at = Some(Utc::now());
            state.error = Some(error);
        })
    }

    fn transition<F>(&self, name: &str, to: ComponentStatus, apply: F) -> Result<(), ReadinessError>
    where
        F: FnOnce(&mut ComponentState),
    {
        let mut components = self.lock();
        let state = components
            .get_mut(name)
            .ok_or_else(|| ReadinessError::UnknownComponent(name.to_string()))?;

        let allowed = matches!(
            (state.status, to),
            (ComponentStatus::NotStarted, ComponentStatus::Loading)
                | (ComponentStatus::Loading, ComponentStatus::Ready)
                | (ComponentStatus::Loading, ComponentStatus::Failed)
        );
        if !allowed {
            return Err(ReadinessError::InvalidTransition {
                name: name.to_string(),
                from: state.status.to_string(),
                to: to.to_string(),
            });
        }

        state.status = to;
        apply(state);
        drop(components);

        tracing::debug!("Component '{}' is now {}", name, to);
        self.bump();
        Ok(())
    }

    /// Copy of one component's state
    pub fn get(&self, name: &str) -> Option<ComponentState> {
        self.lock().get(name).cloned()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn snapshot(&self) -> ReadinessSnapshot {
        let components = self.lock().clone();
        let all_ready = components
            .values()
            .all(|c| c.status == ComponentStatus::Ready);
        let any_failed = components
            .values()
            .any(|c| c.status == ComponentStatus::Failed);

        ReadinessSnapshot {
            components,
            all_ready,
            any_failed,
        }
    }

    /// Wait until `name` reaches a terminal state, or the timeout elapses.
    ///
    /// Returns the component's state at that point (which may still be
    /// Loading if the timeout won).
    pub async fn wait_for(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<ComponentState, ReadinessError> {
        let mut rx = self.generation.subscribe();
        let wait = async {
            loop {
                let Some(state) = self.get(name) else {
                    return Err(ReadinessError::UnknownComponent(name.to_string()));
                };
                if state.status.is_terminal() || rx.changed().await.is_err() {
                    return Ok(state);
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => self
                .get(name)
                .ok_or_else(|| ReadinessError::UnknownComponent(name.to_string())),
        }
    }

    /// Wait until every registered component is terminal
    pub async fn wait_all(&self, timeout: Duration) -> Result<ReadinessSnapshot, ReadinessError> {
        let mut rx = self.generation.subscribe();
        let wait = async {
            loop {
                let snapshot = self.snapshot();
                let settled = snapshot
                    .components
                    .values()
                    .all(|c| c.status.is_terminal());
                if settled || rx.changed().await.is_err() {
                    return snapshot;
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ReadinessError::Timeout("all".to_string()))
    }

    fn bump(&self) {
        self.generation.send_modify(|g| *g += 1);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, ComponentState>> {
        self.components
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

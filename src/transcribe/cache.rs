//! Whisper models kept in memory between sessions
//!
//! Up to `capacity` models stay loaded. Using a model makes it the most
//! recently used; loading one into a full cache evicts the least recently
//! used. [`ModelCache::evict_idle`] unloads models nobody used within the
//! idle timeout, and [`spawn_idle_sweeper`] calls it periodically.
//!
//! A session that still holds an evicted model keeps it alive until it is
//! done with it; eviction only drops the cache's reference.

use super::Transcriber;
use crate::error::TranscribeError;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

pub type SharedTranscriber = Arc<dyn Transcriber>;

/// Loads one model by name; blocking
pub type ModelLoader = dyn Fn(&str) -> Result<SharedTranscriber, TranscribeError> + Send + Sync;

/// Upper bound on how often the sweeper wakes up
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

struct CachedModel {
    name: String,
    transcriber: SharedTranscriber,
    load_time: Duration,
    last_used: Instant,
}

/// One loaded model, for status output
#[derive(Debug, Clone, Serialize)]
pub struct CachedModelInfo {
    pub name: String,
    pub load_secs: f64,
    pub idle_secs: f64,
}

pub struct ModelCache {
    capacity: usize,
    idle_timeout: Option<Duration>,
    loader: Box<ModelLoader>,
    /// Least recently used first
    models: Mutex<Vec<CachedModel>>,
    /// Held for the whole of a load so the same model is never loaded twice
    loading: Mutex<()>,
}

impl ModelCache {
    pub fn new(capacity: usize, idle_timeout: Option<Duration>, loader: Box<ModelLoader>) -> Self {
        Self {
            capacity: capacity.max(1),
            idle_timeout,
            loader,
            models: Mutex::new(Vec::new()),
            loading: Mutex::new(()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// The named model, loading it (and evicting the LRU model) if needed
    pub fn get(&self, name: &str) -> Result<SharedTranscriber, TranscribeError> {
        if let Some(hit) = self.touch(name) {
            return Ok(hit);
        }

        let _loading = self.loading.lock().unwrap_or_else(|p| p.into_inner());
        // Someone else may have loaded it while we waited
        if let Some(hit) = self.touch(name) {
            return Ok(hit);
        }

        let start = Instant::now();
        let transcriber = (self.loader)(name)?;
        let load_time = start.elapsed();

        let mut models = self.models();
        while models.len() >= self.capacity {
            let evicted = models.remove(0);
            tracing::info!(
                "Evicted whisper model '{}' from the cache (idle {:.0}s)",
                evicted.name,
                evicted.last_used.elapsed().as_secs_f64()
            );
        }
        models.push(CachedModel {
            name: name.to_string(),
            transcriber: transcriber.clone(),
            load_time,
            last_used: Instant::now(),
        });
        tracing::debug!("Whisper model cache holds {}/{}", models.len(), self.capacity);
        Ok(transcriber)
    }

    /// Mark `name` as just used and return it if loaded
    fn touch(&self, name: &str) -> Option<SharedTranscriber> {
        let mut models = self.models();
        let index = models.iter().position(|m| m.name == name)?;
        let mut entry = models.remove(index);
        entry.last_used = Instant::now();
        let transcriber = entry.transcriber.clone();
        models.push(entry);
        Some(transcriber)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models().iter().any(|m| m.name == name)
    }

    /// Drop one model; false if it was not loaded
    pub fn unload(&self, name: &str) -> bool {
        let mut models = self.models();
        let before = models.len();
        models.retain(|m| m.name != name);
        before != models.len()
    }

    pub fn evict_idle(&self) -> Vec<String> {
        self.evict_idle_at(Instant::now())
    }

    /// Unload models last used more than the idle timeout before `now`
    pub fn evict_idle_at(&self, now: Instant) -> Vec<String> {
        let Some(timeout) = self.idle_timeout else {
            return Vec::new();
        };

        let mut evicted = Vec::new();
        self.models().retain(|m| {
            let idle = now.saturating_duration_since(m.last_used) >= timeout;
            if idle {
                evicted.push(m.name.clone());
            }
            !idle
        });
        for name in &evicted {
            tracing::info!("Unloaded whisper model '{}' after {:?} unused", name, timeout);
        }
        evicted
    }

    /// Loaded models, least recently used first
    pub fn loaded(&self) -> Vec<CachedModelInfo> {
        self.models()
            .iter()
            .map(|m| CachedModelInfo {
                name: m.name.clone(),
                load_secs: m.load_time.as_secs_f64(),
                idle_secs: m.last_used.elapsed().as_secs_f64(),
            })
            .collect()
    }

    fn models(&self) -> MutexGuard<'_, Vec<CachedModel>> {
        self.models.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Periodically unload idle models until the cache is dropped
///
/// Returns None when the cache never unloads idle models.
pub fn spawn_idle_sweeper(cache: &Arc<ModelCache>) -> Option<JoinHandle<()>> {
    let timeout = cache.idle_timeout()?;
    let period = (timeout / 2).clamp(Duration::from_secs(1), MAX_SWEEP_INTERVAL);
    let cache: Weak<ModelCache> = Arc::downgrade(cache);

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(cache) = cache.upgrade() else {
                break;
            };
            cache.evict_idle();
        }
    }))
}

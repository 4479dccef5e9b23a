//! Host-wide arbitration of the dictation hotkey
//!
//! Several server instances can listen for the same global hotkey. On each
//! press every instance tries to take the lock for that hotkey name without
//! blocking; exactly one wins and handles the press, the others forfeit it.
//!
//! Backends implement [`CrossProcessLock`]:
//! - [`file::FileLock`]: a marker file created atomically in a shared directory
//! - [`semaphore::SemaphoreLock`]: a System V semaphore, used when the file
//!   backend cannot be opened
//!
//! [`HotkeyLock`] picks a backend from configuration, counts contention and
//! hands out [`LockGuard`]s that release on drop.

pub mod file;
pub mod semaphore;

use crate::config::HotkeyLockConfig;
use crate::error::LockError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use uuid::Uuid;

/// Identity of one lock contender: this process plus a per-instance token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HolderId {
    pub pid: u32,
    pub token: Uuid,
}

impl HolderId {
    pub fn for_this_process() -> Self {
        Self {
            pid: std::process::id(),
            token: Uuid::new_v4(),
        }
    }
}

/// Short human form of a [`HolderId`] for logs
pub struct HolderDisplay<'a>(&'a HolderId);

impl HolderId {
    pub fn display(&self) -> HolderDisplay<'_> {
        HolderDisplay(self)
    }
}

impl std::fmt::Display for HolderDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = self.0.token.simple().to_string();
        write!(f, "pid {} ({})", self.0.pid, &token[..8])
    }
}

/// Persisted content of a lock marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub resource: String,
    pub holder: HolderId,
    pub acquired_at: DateTime<Utc>,
    /// Last time the holder showed it was still making progress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renewed_at: Option<DateTime<Utc>>,
}

impl LockRecord {
    pub fn new(resource: &str, holder: &HolderId) -> Self {
        Self {
            resource: resource.to_string(),
            holder: holder.clone(),
            acquired_at: Utc::now(),
            renewed_at: None,
        }
    }

    /// Time since acquisition or the last renewal (zero if the clock went backwards)
    pub fn age(&self) -> Duration {
        let since = self.renewed_at.unwrap_or(self.acquired_at);
        (Utc::now() - since).to_std().unwrap_or_default()
    }
}

/// Which mechanism granted a lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockBacking {
    FileLock,
    Semaphore,
}

impl std::fmt::Display for LockBacking {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockBacking::FileLock => write!(f, "file lock"),
            LockBacking::Semaphore => write!(f, "semaphore"),
        }
    }
}

/// Result of a non-blocking acquisition attempt
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    /// We own the resource now; `reclaimed` is the stale record we replaced
    Held {
        record: LockRecord,
        reclaimed: Option<LockRecord>,
    },
    /// Someone else owns it (holder known when the backend can tell)
    Denied { holder: Option<LockRecord> },
}

/// When a marker may be taken over from its recorded holder
#[derive(Debug, Clone, Copy)]
pub struct StalenessPolicy {
    /// Grace period before a dead holder's marker can be reclaimed
    pub stale_after: Duration,
    /// Age after which a marker is reclaimed even if the holder looks alive
    pub max_hold: Duration,
}

impl StalenessPolicy {
    pub fn from_config(config: &HotkeyLockConfig) -> Self {
        Self {
            stale_after: config.stale_after(),
            max_hold: config.max_hold(),
        }
    }

    pub fn is_stale(&self, age: Duration, holder_alive: bool) -> bool {
        (!holder_alive && age >= self.stale_after) || age >= self.max_hold
    }
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self::from_config(&HotkeyLockConfig::default())
    }
}

/// A named mutual-exclusion primitive shared by cooperating processes
pub trait CrossProcessLock: Send + Sync {
    fn backing(&self) -> LockBacking;

    /// Where the lock lives (marker path or semaphore key), for diagnostics
    fn location(&self) -> String;

    /// Try to take the lock once; never waits for the current holder
    fn try_acquire(&self, holder: &HolderId) -> Result<AcquireOutcome, LockError>;

    /// Give the lock back if `holder` still owns it
    fn release(&self, holder: &HolderId) -> Result<(), LockError>;

    /// Restart the max-hold clock if `holder` still owns the lock; false if it was lost
    fn renew(&self, holder: &HolderId) -> Result<bool, LockError> {
        Ok(self
            .current_holder()
            .is_some_and(|record| &record.holder == holder))
    }

    /// Whether `record` may be reclaimed by another contender
    fn is_stale(&self, record: &LockRecord) -> bool;

    /// The current owner, as far as this backend can see
    fn current_holder(&self) -> Option<LockRecord>;
}

/// Whether a process with this PID exists on this host
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    // Signal 0 only checks for existence; EPERM means the process exists under another user
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Whether a process with this PID exists on this host
#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    // No cheap liveness check; rely on the max-hold age alone
    true
}

/// File name fragment for a hotkey name: "ctrl+alt+s" -> "ctrl-alt-s"
pub fn resource_slug(resource: &str) -> String {
    resource
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            '+' => '-',
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' => c,
            _ => '_',
        })
        .collect()
}

/// This process's successful acquisition
#[derive(Debug, Clone, Serialize)]
pub struct LockHandle {
    pub resource_name: String,
    pub holder_id: HolderId,
    pub acquired_at: DateTime<Utc>,
    pub backing: LockBacking,
}

/// Outcome of [`HotkeyLock::try_acquire`]
pub enum LockAttempt {
    Held(LockGuard),
    Denied(Option<LockRecord>),
    /// No backend is usable; the caller proceeds without arbitration
    Unguarded,
}

#[derive(Default)]
struct LockStats {
    acquired: AtomicU64,
    denied: AtomicU64,
    reclaimed: AtomicU64,
    released: AtomicU64,
    errors: AtomicU64,
}

/// Counters for status reports
#[derive(Debug, Clone, Serialize)]
pub struct LockStatsSnapshot {
    pub acquired: u64,
    pub denied: u64,
    pub reclaimed: u64,
    pub released: u64,
    pub errors: u64,
}

/// Ownership and contention picture for one hotkey name
#[derive(Debug, Clone, Serialize)]
pub struct LockStatus {
    pub resource: String,
    /// False when no backend is usable and presses are handled unguarded
    pub guarded: bool,
    pub backing: Option<LockBacking>,
    pub location: Option<String>,
    pub holder_id: HolderId,
    /// Our handle, while a session holds the lock
    pub held: Option<LockHandle>,
    /// Whoever the backend currently reports as owner
    pub current_holder: Option<LockRecord>,
    pub current_holder_stale: bool,
    pub stats: LockStatsSnapshot,
}

/// What a press does when the chosen backend fails after startup
enum Degrade {
    /// Report the error; the press is forfeited
    Forfeit,
    /// Open the semaphore backend on first need and use it instead
    Semaphore(OnceLock<Option<Box<dyn CrossProcessLock>>>),
    /// Handle the press without arbitration
    Unguarded,
}

/// Arbiter for one hotkey name
pub struct HotkeyLock {
    resource: String,
    holder: HolderId,
    backend: Option<Box<dyn CrossProcessLock>>,
    degrade: Degrade,
    held: Mutex<Option<LockHandle>>,
    stats: LockStats,
}

impl HotkeyLock {
    /// Pick a backend per configuration: file lock, then semaphore, then none
    pub fn from_config(resource: &str, config: &HotkeyLockConfig) -> Self {
        let backend = select_backend(resource, config);
        let degrade = match backend.as_ref().map(|b| b.backing()) {
            None => {
                tracing::error!(
                    "No hotkey lock backend available for '{}': presses are handled WITHOUT \
                     cross-instance arbitration. Run a single voice-mcp instance or fix the lock directory.",
                    resource
                );
                Degrade::Forfeit
            }
            Some(LockBacking::FileLock) if config.semaphore_fallback => {
                Degrade::Semaphore(OnceLock::new())
            }
            Some(LockBacking::FileLock) => Degrade::Unguarded,
            Some(LockBacking::Semaphore) => Degrade::Forfeit,
        };

        let mut lock = Self::with_backend(resource, backend);
        lock.degrade = degrade;
        lock
    }

    pub fn with_backend(resource: &str, backend: Option<Box<dyn CrossProcessLock>>) -> Self {
        Self {
            resource: resource.to_string(),
            holder: HolderId::for_this_process(),
            backend,
            degrade: Degrade::Forfeit,
            held: Mutex::new(None),
            stats: LockStats::default(),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn holder_id(&self) -> &HolderId {
        &self.holder
    }

    pub fn is_guarded(&self) -> bool {
        self.backend.is_some()
    }

    pub fn backing(&self) -> Option<LockBacking> {
        self.backend.as_ref().map(|b| b.backing())
    }

    /// One non-blocking attempt to own the hotkey for a session
    pub fn try_acquire(self: &Arc<Self>) -> Result<LockAttempt, LockError> {
        let Some(backend) = self.backend.as_deref() else {
            return Ok(LockAttempt::Unguarded);
        };

        match backend.try_acquire(&self.holder) {
            Ok(outcome) => Ok(self.settle(backend, outcome)),
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.fall_back(e)
            }
        }
    }

    /// The configured backend failed; fall back instead of losing the press
    fn fall_back(self: &Arc<Self>, cause: LockError) -> Result<LockAttempt, LockError> {
        let slot = match &self.degrade {
            Degrade::Forfeit => return Err(cause),
            Degrade::Unguarded => {
                tracing::error!(
                    "Hotkey lock '{}' failed ({}); handling this press WITHOUT cross-instance arbitration",
                    self.resource,
                    cause
                );
                return Ok(LockAttempt::Unguarded);
            }
            Degrade::Semaphore(slot) => slot,
        };

        let fallback = slot.get_or_init(|| match semaphore::SemaphoreLock::open(&self.resource) {
            Ok(lock) => Some(Box::new(lock) as Box<dyn CrossProcessLock>),
            Err(e) => {
                tracing::warn!("Semaphore lock backend unavailable: {}", e);
                None
            }
        });
        let Some(fallback) = fallback.as_deref() else {
            tracing::error!(
                "Hotkey lock '{}' failed ({}) and no fallback is usable; handling this press \
                 WITHOUT cross-instance arbitration",
                self.resource,
                cause
            );
            return Ok(LockAttempt::Unguarded);
        };

        tracing::warn!(
            "Hotkey lock '{}' failed ({}); using {} for this press",
            self.resource,
            cause,
            fallback.location()
        );
        let outcome = fallback.try_acquire(&self.holder).inspect_err(|_| {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
        })?;
        Ok(self.settle(fallback, outcome))
    }

    fn settle(self: &Arc<Self>, backend: &dyn CrossProcessLock, outcome: AcquireOutcome) -> LockAttempt {
        match outcome {
            AcquireOutcome::Held { record, reclaimed } => {
                self.stats.acquired.fetch_add(1, Ordering::Relaxed);
                if let Some(stale) = reclaimed {
                    self.stats.reclaimed.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(
                        "Reclaimed stale hotkey lock '{}' from {} (held since {})",
                        self.resource,
                        stale.holder.display(),
                        stale.acquired_at
                    );
                }

                let handle = LockHandle {
                    resource_name: self.resource.clone(),
                    holder_id: self.holder.clone(),
                    acquired_at: record.acquired_at,
                    backing: backend.backing(),
                };
                *self.held_slot() = Some(handle.clone());
                tracing::debug!("Acquired hotkey lock '{}' via {}", self.resource, handle.backing);

                LockAttempt::Held(LockGuard {
                    lock: Arc::clone(self),
                    handle,
                    released: false,
                })
            }
            AcquireOutcome::Denied { holder } => {
                self.stats.denied.fetch_add(1, Ordering::Relaxed);
                match &holder {
                    Some(h) => tracing::debug!(
                        "Hotkey '{}' is handled by {}; forfeiting this press",
                        self.resource,
                        h.holder.display()
                    ),
                    None => tracing::debug!(
                        "Hotkey '{}' is held by another instance; forfeiting this press",
                        self.resource
                    ),
                }
                LockAttempt::Denied(holder)
            }
        }
    }

    /// The backend that granted `backing`, configured or fallback
    fn backend_for(&self, backing: LockBacking) -> Option<&dyn CrossProcessLock> {
        let fallback = match &self.degrade {
            Degrade::Semaphore(slot) => slot.get().and_then(|f| f.as_deref()),
            _ => None,
        };
        self.backend
            .as_deref()
            .into_iter()
            .chain(fallback)
            .find(|b| b.backing() == backing)
    }

    /// Show the other instances that the session holding `handle` is still alive
    ///
    /// Returns false when the lock was taken over in the meantime.
    pub fn renew(&self, handle: &LockHandle) -> Result<bool, LockError> {
        let Some(backend) = self.backend_for(handle.backing) else {
            return Ok(true);
        };
        backend.renew(&handle.holder_id).inspect_err(|_| {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
        })
    }

    fn release_handle(&self, handle: &LockHandle) -> Result<(), LockError> {
        let result = match self.backend_for(handle.backing) {
            Some(backend) => backend.release(&handle.holder_id),
            None => Ok(()),
        };
        *self.held_slot() = None;

        match &result {
            Ok(()) => {
                self.stats.released.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Released hotkey lock '{}'", self.resource);
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Failed to release hotkey lock '{}': {}", self.resource, e);
            }
        }
        result
    }

    pub fn status(&self) -> LockStatus {
        let current_holder = self.backend.as_ref().and_then(|b| b.current_holder());
        let current_holder_stale = match (&self.backend, &current_holder) {
            (Some(b), Some(record)) => b.is_stale(record),
            _ => false,
        };

        LockStatus {
            resource: self.resource.clone(),
            guarded: self.is_guarded(),
            backing: self.backing(),
            location: self.backend.as_ref().map(|b| b.location()),
            holder_id: self.holder.clone(),
            held: self.held_slot().clone(),
            current_holder,
            current_holder_stale,
            stats: LockStatsSnapshot {
                acquired: self.stats.acquired.load(Ordering::Relaxed),
                denied: self.stats.denied.load(Ordering::Relaxed),
                reclaimed: self.stats.reclaimed.load(Ordering::Relaxed),
                released: self.stats.released.load(Ordering::Relaxed),
                errors: self.stats.errors.load(Ordering::Relaxed),
            },
        }
    }

    fn held_slot(&self) -> std::sync::MutexGuard<'_, Option<LockHandle>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn select_backend(resource: &str, config: &HotkeyLockConfig) -> Option<Box<dyn CrossProcessLock>> {
    if !config.enabled {
        tracing::warn!("Hotkey locking is disabled in configuration");
        return None;
    }

    let dir = config.resolve_directory();
    match file::FileLock::open(&dir, resource, StalenessPolicy::from_config(config)) {
        Ok(lock) => {
            tracing::debug!("Hotkey lock marker: {}", lock.marker_path().display());
            return Some(Box::new(lock));
        }
        Err(e) => tracing::warn!("File lock backend unavailable: {}", e),
    }

    if !config.semaphore_fallback {
        return None;
    }

    match semaphore::SemaphoreLock::open(resource) {
        Ok(lock) => {
            tracing::warn!("Falling back to semaphore lock ({})", lock.location());
            Some(Box::new(lock))
        }
        Err(e) => {
            tracing::warn!("Semaphore lock backend unavailable: {}", e);
            None
        }
    }
}

/// Scoped ownership of the hotkey; released on drop
pub struct LockGuard {
    lock: Arc<HotkeyLock>,
    handle: LockHandle,
    released: bool,
}

impl LockGuard {
    pub fn handle(&self) -> &LockHandle {
        &self.handle
    }

    /// Release now and report the result
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        self.lock.release_handle(&self.handle)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.lock.release_handle(&self.handle);
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("handle", &self.handle)
            .field("released", &self.released)
            .finish()
    }
}

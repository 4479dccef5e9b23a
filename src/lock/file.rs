//! Marker-file lock backend
//!
//! Ownership of a hotkey is the existence of `hotkey-<name>.lock` in the lock
//! directory. The marker is created with `create_new`, so exactly one
//! contender can create it. Reading and replacing a stale marker happens
//! while holding an exclusive `flock` on a sibling `hotkey-<name>.guard`
//! file, which keeps the check-then-reclaim step atomic across processes.

use super::{
    process_alive, resource_slug, AcquireOutcome, CrossProcessLock, HolderId, LockBacking,
    LockRecord, StalenessPolicy,
};
use crate::error::LockError;
use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// How long a contender retries a busy guard before forfeiting
const GUARD_RETRY_ATTEMPTS: u32 = 5;
const GUARD_RETRY_DELAY: Duration = Duration::from_millis(2);

/// What the marker file currently says
#[derive(Debug)]
enum Marker {
    Absent,
    Present(LockRecord),
    /// Exists but cannot be parsed (holder died mid-write, or foreign content)
    Unreadable { age: Duration },
}

pub struct FileLock {
    resource: String,
    dir: PathBuf,
    marker_path: PathBuf,
    guard_path: PathBuf,
    policy: StalenessPolicy,
}

impl FileLock {
    /// Prepare the lock directory; fails if it cannot be created or written
    pub fn open(dir: &Path, resource: &str, policy: StalenessPolicy) -> Result<Self, LockError> {
        let dir_err = |e| LockError::Directory {
            path: dir.display().to_string(),
            source: e,
        };
        let slug = resource_slug(resource);
        let lock = Self {
            resource: resource.to_string(),
            dir: dir.to_path_buf(),
            marker_path: dir.join(format!("hotkey-{}.lock", slug)),
            guard_path: dir.join(format!("hotkey-{}.guard", slug)),
            policy,
        };
        lock.prepare().map_err(dir_err)?;
        Ok(lock)
    }

    /// Create the directory and the guard file if they are missing
    fn prepare(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.guard_path)
            .map(drop)
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker_path
    }

    fn marker_error(&self, source: std::io::Error) -> LockError {
        LockError::Marker {
            path: self.marker_path.display().to_string(),
            source,
        }
    }

    fn read_marker(&self) -> Result<Marker, LockError> {
        let contents = match fs::read(&self.marker_path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Marker::Absent),
            Err(e) => return Err(self.marker_error(e)),
        };

        match serde_json::from_slice::<LockRecord>(&contents) {
            Ok(record) => Ok(Marker::Present(record)),
            Err(e) => {
                let age = fs::metadata(&self.marker_path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| SystemTime::now().duration_since(t).ok())
                    .unwrap_or_default();
                tracing::debug!("Unreadable lock marker {:?}: {}", self.marker_path, e);
                Ok(Marker::Unreadable { age })
            }
        }
    }

    /// Atomically create the marker; `None` if it already exists
    fn create_marker(&self, holder: &HolderId) -> Result<Option<LockRecord>, LockError> {
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.marker_path)
        {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(self.marker_error(e)),
        };

        let record = LockRecord::new(&self.resource, holder);
        let body = serde_json::to_vec_pretty(&record)
            .map_err(|e| self.marker_error(std::io::Error::new(ErrorKind::InvalidData, e)))?;
        if let Err(e) = file.write_all(&body) {
            let _ = fs::remove_file(&self.marker_path);
            return Err(self.marker_error(e));
        }
        Ok(Some(record))
    }

    /// Replace the marker's content in one rename, so readers never see a partial record
    fn rewrite_marker(&self, record: &LockRecord) -> Result<(), LockError> {
        let staging = self.marker_path.with_extension("lock.new");
        let body = serde_json::to_vec_pretty(record)
            .map_err(|e| self.marker_error(std::io::Error::new(ErrorKind::InvalidData, e)))?;
        fs::write(&staging, body)
            .and_then(|()| fs::rename(&staging, &self.marker_path))
            .map_err(|e| {
                let _ = fs::remove_file(&staging);
                self.marker_error(e)
            })
    }

    fn remove_marker(&self) -> Result<(), LockError> {
        match fs::remove_file(&self.marker_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.marker_error(e)),
        }
    }

    fn take_over(
        &self,
        holder: &HolderId,
        previous: Option<LockRecord>,
    ) -> Result<AcquireOutcome, LockError> {
        self.remove_marker()?;
        match self.create_marker(holder)? {
            Some(record) => Ok(AcquireOutcome::Held {
                record,
                reclaimed: previous,
            }),
            // A contender outside the guard protocol got there first
            None => Ok(AcquireOutcome::Denied { holder: None }),
        }
    }

    /// One pass of the acquisition protocol under the guard
    fn attempt(&self, holder: &HolderId) -> Result<AcquireOutcome, LockError> {
        let Some(_guard) = GuardFile::try_lock(&self.guard_path)? else {
            tracing::debug!("Lock guard {:?} is busy", self.guard_path);
            return Ok(AcquireOutcome::Denied { holder: None });
        };

        if let Some(record) = self.create_marker(holder)? {
            return Ok(AcquireOutcome::Held {
                record,
                reclaimed: None,
            });
        }

        match self.read_marker()? {
            Marker::Absent => self.take_over(holder, None),
            Marker::Present(existing) => {
                if self.is_stale(&existing) {
                    self.take_over(holder, Some(existing))
                } else {
                    Ok(AcquireOutcome::Denied {
                        holder: Some(existing),
                    })
                }
            }
            Marker::Unreadable { age } => {
                if age >= self.policy.stale_after {
                    self.take_over(holder, None)
                } else {
                    Ok(AcquireOutcome::Denied { holder: None })
                }
            }
        }
    }
}

impl CrossProcessLock for FileLock {
    fn backing(&self) -> LockBacking {
        LockBacking::FileLock
    }

    fn location(&self) -> String {
        self.marker_path.display().to_string()
    }

    fn try_acquire(&self, holder: &HolderId) -> Result<AcquireOutcome, LockError> {
        match self.attempt(holder) {
            Err(e) if is_not_found(&e) => {
                // Directory removed under us (tmp cleaner, runtime dir reset)
                tracing::warn!("Lock directory {:?} disappeared; recreating it", self.dir);
                self.prepare().map_err(|source| LockError::Directory {
                    path: self.dir.display().to_string(),
                    source,
                })?;
                self.attempt(holder)
            }
            other => other,
        }
    }

    fn release(&self, holder: &HolderId) -> Result<(), LockError> {
        let _guard = GuardFile::lock(&self.guard_path)?;

        match self.read_marker()? {
            Marker::Present(record) if &record.holder == holder => self.remove_marker(),
            Marker::Present(record) => {
                tracing::warn!(
                    "Hotkey lock '{}' was reclaimed by {} before we released it",
                    self.resource,
                    record.holder.display()
                );
                Ok(())
            }
            Marker::Absent => {
                tracing::warn!("Hotkey lock marker {:?} vanished before release", self.marker_path);
                Ok(())
            }
            Marker::Unreadable { .. } => {
                tracing::warn!("Leaving unreadable lock marker {:?} in place", self.marker_path);
                Ok(())
            }
        }
    }

    fn renew(&self, holder: &HolderId) -> Result<bool, LockError> {
        let _guard = GuardFile::lock(&self.guard_path)?;

        match self.read_marker()? {
            Marker::Present(mut record) if &record.holder == holder => {
                record.renewed_at = Some(Utc::now());
                self.rewrite_marker(&record)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn is_stale(&self, record: &LockRecord) -> bool {
        self.policy
            .is_stale(record.age(), process_alive(record.holder.pid))
    }

    fn current_holder(&self) -> Option<LockRecord> {
        match self.read_marker() {
            Ok(Marker::Present(record)) => Some(record),
            _ => None,
        }
    }
}

/// Exclusive advisory lock on the guard file, released on drop
struct GuardFile {
    #[cfg(unix)]
    _lock: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

/// Result of one flock call on the guard file
enum Flocked {
    Held(GuardFile),
    /// Another contender holds it; the file comes back for a retry
    Busy(File),
}

impl GuardFile {
    fn open(path: &Path) -> Result<File, LockError> {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| guard_error(path, e))
    }

    /// Take the guard, retrying briefly; `None` if it stays busy
    fn try_lock(path: &Path) -> Result<Option<Self>, LockError> {
        let mut file = Self::open(path)?;
        for attempt in 0..GUARD_RETRY_ATTEMPTS {
            match flock(file, true).map_err(|e| guard_error(path, e))? {
                Flocked::Held(guard) => return Ok(Some(guard)),
                Flocked::Busy(returned) => file = returned,
            }
            if attempt + 1 < GUARD_RETRY_ATTEMPTS {
                std::thread::sleep(GUARD_RETRY_DELAY);
            }
        }
        Ok(None)
    }

    /// Take the guard, waiting for it; guard holds last microseconds
    fn lock(path: &Path) -> Result<Self, LockError> {
        let file = Self::open(path)?;
        match flock(file, false).map_err(|e| guard_error(path, e))? {
            Flocked::Held(guard) => Ok(guard),
            Flocked::Busy(_) => Err(guard_error(
                path,
                std::io::Error::from(ErrorKind::WouldBlock),
            )),
        }
    }
}

fn guard_error(path: &Path, source: std::io::Error) -> LockError {
    LockError::Marker {
        path: path.display().to_string(),
        source,
    }
}

/// Exclusive flock, unlocked when the returned guard drops
#[cfg(unix)]
fn flock(mut file: File, nonblocking: bool) -> std::io::Result<Flocked> {
    use nix::errno::Errno;
    use nix::fcntl::{Flock, FlockArg};

    let arg = if nonblocking {
        FlockArg::LockExclusiveNonblock
    } else {
        FlockArg::LockExclusive
    };
    loop {
        match Flock::lock(file, arg) {
            Ok(lock) => return Ok(Flocked::Held(GuardFile { _lock: lock })),
            Err((returned, Errno::EINTR)) => file = returned,
            Err((returned, Errno::EAGAIN)) if nonblocking => return Ok(Flocked::Busy(returned)),
            Err((_, errno)) => return Err(errno.into()),
        }
    }
}

/// Without flock the marker's create_new is the only arbitration
#[cfg(not(unix))]
fn flock(file: File, _nonblocking: bool) -> std::io::Result<Flocked> {
    Ok(Flocked::Held(GuardFile { _file: file }))
}

/// The directory or guard file is gone
fn is_not_found(err: &LockError) -> bool {
    match err {
        LockError::Marker { source, .. } | LockError::Directory { source, .. } => {
            source.kind() == ErrorKind::NotFound
        }
        _ => false,
    }
}

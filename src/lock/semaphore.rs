//! System V semaphore lock backend
//!
//! Used when the lock directory is unusable. The semaphore for a hotkey name
//! is keyed by a hash of the name and starts at 1. Acquiring decrements it
//! with `IPC_NOWAIT | SEM_UNDO`: contention fails immediately with EAGAIN,
//! and the kernel gives the token back if the holder process dies, so a
//! dead holder never leaves the hotkey stuck.

use super::{AcquireOutcome, CrossProcessLock, HolderId, LockBacking, LockRecord};
use crate::error::LockError;
use std::sync::Mutex;

/// Semaphore key for a hotkey name (FNV-1a, never IPC_PRIVATE)
pub fn semaphore_key(resource: &str) -> i32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in format!("voice-mcp/hotkey/{}", super::resource_slug(resource)).bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    match hash as i32 {
        0 => 1,
        key => key,
    }
}

pub struct SemaphoreLock {
    resource: String,
    key: i32,
    id: i32,
    /// The kernel does not record who holds a semaphore; we track our own hold
    held_by: Mutex<Option<LockRecord>>,
}

impl SemaphoreLock {
    pub fn open(resource: &str) -> Result<Self, LockError> {
        let key = semaphore_key(resource);
        let id = sys::open(key)?;
        Ok(Self {
            resource: resource.to_string(),
            key,
            id,
            held_by: Mutex::new(None),
        })
    }

    fn held(&self) -> std::sync::MutexGuard<'_, Option<LockRecord>> {
        self.held_by
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Delete the semaphore from the host
    #[cfg(test)]
    fn remove(&self) {
        sys::remove(self.id);
    }
}

impl CrossProcessLock for SemaphoreLock {
    fn backing(&self) -> LockBacking {
        LockBacking::Semaphore
    }

    fn location(&self) -> String {
        format!("System V semaphore key 0x{:08x}", self.key)
    }

    fn try_acquire(&self, holder: &HolderId) -> Result<AcquireOutcome, LockError> {
        let mut held = self.held();
        if let Some(existing) = held.as_ref() {
            return Ok(AcquireOutcome::Denied {
                holder: Some(existing.clone()),
            });
        }

        if !sys::try_take(self.id)? {
            return Ok(AcquireOutcome::Denied { holder: None });
        }

        let record = LockRecord::new(&self.resource, holder);
        *held = Some(record.clone());
        Ok(AcquireOutcome::Held {
            record,
            reclaimed: None,
        })
    }

    fn release(&self, holder: &HolderId) -> Result<(), LockError> {
        let mut held = self.held();
        match held.as_ref() {
            Some(record) if &record.holder == holder => {
                sys::give(self.id)?;
                *held = None;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn is_stale(&self, _record: &LockRecord) -> bool {
        // SEM_UNDO returns a dead holder's token; a visible hold is always live
        false
    }

    fn current_holder(&self) -> Option<LockRecord> {
        self.held().clone()
    }
}

#[cfg(target_os = "linux")]
mod sys {
    use crate::error::LockError;
    use std::io;

    fn last_error() -> LockError {
        LockError::Semaphore(io::Error::last_os_error())
    }

    fn semop(id: i32, delta: i16, flags: i32) -> io::Result<()> {
        let mut op = libc::sembuf {
            sem_num: 0,
            sem_op: delta,
            sem_flg: flags as libc::c_short,
        };
        loop {
            let rc = unsafe { libc::semop(id, &mut op, 1) };
            if rc == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(err);
            }
        }
    }

    /// Open the semaphore, creating and initializing it to 1 if needed
    pub fn open(key: i32) -> Result<i32, LockError> {
        let id = unsafe { libc::semget(key, 1, libc::IPC_CREAT | libc::IPC_EXCL | 0o600) };
        if id >= 0 {
            // Creator seeds the single token; this must not be undone on exit
            semop(id, 1, 0).map_err(LockError::Semaphore)?;
            return Ok(id);
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EEXIST) {
            return Err(LockError::Semaphore(err));
        }
        let id = unsafe { libc::semget(key, 1, 0o600) };
        if id < 0 {
            return Err(last_error());
        }
        Ok(id)
    }

    /// Take the token without waiting; false if another process has it
    pub fn try_take(id: i32) -> Result<bool, LockError> {
        match semop(id, -1, libc::IPC_NOWAIT | libc::SEM_UNDO) {
            Ok(()) => Ok(true),
            Err(e) if e.raw_os_error() == Some(libc::EAGAIN) => Ok(false),
            Err(e) => Err(LockError::Semaphore(e)),
        }
    }

    pub fn give(id: i32) -> Result<(), LockError> {
        semop(id, 1, libc::SEM_UNDO).map_err(LockError::Semaphore)
    }

    #[cfg(test)]
    pub fn remove(id: i32) {
        unsafe {
            libc::semctl(id, 0, libc::IPC_RMID);
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod sys {
    use crate::error::LockError;

    pub fn open(_key: i32) -> Result<i32, LockError> {
        Err(LockError::Unavailable(
            "semaphore locking is only implemented on Linux".to_string(),
        ))
    }

    pub fn try_take(_id: i32) -> Result<bool, LockError> {
        Err(LockError::Unavailable("no semaphore".to_string()))
    }

    pub fn give(_id: i32) -> Result<(), LockError> {
        Ok(())
    }

    #[cfg(test)]
    pub fn remove(_id: i32) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_stable_and_not_private() {
        assert_eq!(semaphore_key("menu"), semaphore_key("MENU"));
        assert_ne!(semaphore_key("menu"), semaphore_key("f12"));
        assert_ne!(semaphore_key("menu"), 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_contention_and_release() {
        let resource = format!("test-{}", uuid::Uuid::new_v4());
        let opened = (SemaphoreLock::open(&resource), SemaphoreLock::open(&resource));
        let (first, second) = match opened {
            (Ok(a), Ok(b)) => (a, b),
            // SysV IPC can be blocked in sandboxes; nothing to test then
            _ => return,
        };
        let a = HolderId::for_this_process();
        let b = HolderId::for_this_process();

        assert!(matches!(first.try_acquire(&a).unwrap(), AcquireOutcome::Held { .. }));
        assert!(matches!(
            second.try_acquire(&b).unwrap(),
            AcquireOutcome::Denied { holder: None }
        ));

        first.release(&a).unwrap();
        assert!(first.current_holder().is_none());
        assert!(matches!(second.try_acquire(&b).unwrap(), AcquireOutcome::Held { .. }));
        second.release(&b).unwrap();

        first.remove();
    }
}

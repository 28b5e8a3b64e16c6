//! The single-writer lock guarding transactions.
//!
//! A repository on disk is locked by creating `transaction.lock` with
//! `O_EXCL`; the file records the owner's pid. An in-memory repository uses
//! a shared flag instead. Either way, a second `acquire` fails immediately
//! rather than waiting.
//!
//! A lock left behind by a dead process is never taken over automatically;
//! the error names the dead pid so an operator can remove the file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{RepoError, RepoResult};

/// Contents of a lock file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMeta {
    pub pid: u32,
    pub acquired_at: i64,
}

impl LockMeta {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            acquired_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Where a repository's writer lock lives.
#[derive(Clone, Debug)]
pub(crate) enum WriterSlot {
    File(PathBuf),
    Memory(Arc<AtomicBool>),
}

impl WriterSlot {
    pub(crate) fn memory() -> Self {
        Self::Memory(Arc::new(AtomicBool::new(false)))
    }

    /// Take the lock or fail with [`RepoError::Transaction`].
    pub(crate) fn acquire(&self) -> RepoResult<WriterLock> {
        match self {
            Self::Memory(flag) => {
                if flag
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    return Err(RepoError::transaction(
                        "another transaction is in progress",
                    ));
                }
                Ok(WriterLock {
                    held: Held::Memory(Arc::clone(flag)),
                    released: false,
                })
            }
            Self::File(path) => acquire_file(path),
        }
    }
}

#[derive(Debug)]
enum Held {
    File(PathBuf),
    Memory(Arc<AtomicBool>),
}

/// Proof of exclusive write access. Released on drop.
#[derive(Debug)]
pub struct WriterLock {
    held: Held,
    released: bool,
}

impl WriterLock {
    /// Release the lock, reporting a failure to remove the lock file.
    pub fn release(mut self) -> RepoResult<()> {
        self.released = true;
        match &self.held {
            Held::Memory(flag) => {
                flag.store(false, Ordering::Release);
                Ok(())
            }
            Held::File(path) => fs::remove_file(path).map_err(|e| {
                RepoError::transaction_with(
                    format!("cannot remove lock file {}", path.display()),
                    e,
                )
            }),
        }
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match &self.held {
            Held::Memory(flag) => flag.store(false, Ordering::Release),
            Held::File(path) => {
                let _ = fs::remove_file(path);
            }
        }
    }
}

fn acquire_file(path: &Path) -> RepoResult<WriterLock> {
    match create_lock_file(path) {
        Ok(lock) => Ok(lock),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            let meta = read_meta(path);
            let owner_gone = meta
                .as_ref()
                .is_some_and(|meta| process_alive(meta.pid) == Some(false));
            if owner_gone {
                warn!(path = %path.display(), "transaction lock owner is not running");
            }
            Err(held(path, meta.as_ref(), owner_gone))
        }
        Err(e) => Err(RepoError::transaction_with(
            format!("cannot lock {}", path.display()),
            e,
        )),
    }
}

fn create_lock_file(path: &Path) -> io::Result<WriterLock> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    let lock = WriterLock {
        held: Held::File(path.to_path_buf()),
        released: false,
    };
    let meta = serde_json::to_vec(&LockMeta::current()).map_err(io::Error::other)?;
    file.write_all(&meta)?;
    file.sync_all()?;
    debug!(path = %path.display(), "transaction lock acquired");
    Ok(lock)
}

/// Read the owner recorded in a lock file, if it can be parsed.
pub fn read_meta(path: &Path) -> Option<LockMeta> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn held(path: &Path, meta: Option<&LockMeta>, owner_gone: bool) -> RepoError {
    let Some(meta) = meta else {
        return RepoError::transaction(format!(
            "repository is locked ({} exists)",
            path.display()
        ));
    };
    if owner_gone {
        return RepoError::transaction(format!(
            "repository is locked by pid {}, which is not running; \
             remove {} if no other writer is active",
            meta.pid,
            path.display()
        ));
    }
    RepoError::transaction(format!(
        "repository is locked by pid {} ({} exists)",
        meta.pid,
        path.display()
    ))
}

/// `Some(alive)` where procfs can answer, `None` otherwise.
fn process_alive(pid: u32) -> Option<bool> {
    let proc = Path::new("/proc");
    if !proc.join("self").exists() {
        return None;
    }
    Some(proc.join(pid.to_string()).exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_lock_is_exclusive() {
        let slot = WriterSlot::memory();
        let lock = slot.acquire().unwrap();
        assert!(matches!(slot.acquire(), Err(RepoError::Transaction { .. })));
        drop(lock);
        slot.acquire().unwrap().release().unwrap();
        slot.acquire().unwrap();
    }

    #[test]
    fn file_lock_is_exclusive_and_removed_on_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transaction.lock");
        let slot = WriterSlot::File(path.clone());

        let lock = slot.acquire().unwrap();
        assert!(path.exists());
        assert_eq!(read_meta(&path).unwrap().pid, std::process::id());

        let err = slot.acquire().unwrap_err();
        assert!(err.to_string().contains("locked"));

        lock.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn file_lock_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transaction.lock");
        drop(WriterSlot::File(path.clone()).acquire().unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn unreadable_lock_counts_as_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transaction.lock");
        fs::write(&path, b"garbage").unwrap();
        assert!(WriterSlot::File(path.clone()).acquire().is_err());
        assert!(path.exists());
    }

    fn write_dead_owner(path: &Path) {
        // Above the kernel's pid_max, so never a live process.
        let stale = LockMeta {
            pid: u32::MAX - 1,
            acquired_at: 0,
        };
        fs::write(path, serde_json::to_vec(&stale).unwrap()).unwrap();
    }

    #[test]
    fn lock_left_by_dead_pid_stays_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transaction.lock");
        write_dead_owner(&path);

        let err = WriterSlot::File(path.clone()).acquire().unwrap_err();
        assert!(matches!(err, RepoError::Transaction { .. }));
        assert_eq!(read_meta(&path).unwrap().pid, u32::MAX - 1);
        if process_alive(std::process::id()) == Some(true) {
            assert!(err.to_string().contains("not running"));
        }

        fs::remove_file(&path).unwrap();
        WriterSlot::File(path.clone()).acquire().unwrap().release().unwrap();
    }

    #[test]
    fn contending_acquirers_on_dead_pid_lock_both_fail() {
        use std::sync::Barrier;
        use std::thread;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transaction.lock");
        for _ in 0..50 {
            write_dead_owner(&path);
            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let barrier = Arc::clone(&barrier);
                    let slot = WriterSlot::File(path.clone());
                    thread::spawn(move || {
                        barrier.wait();
                        slot.acquire().is_ok()
                    })
                })
                .collect();
            let acquired = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count();
            assert_eq!(acquired, 0);
            assert_eq!(read_meta(&path).unwrap().pid, u32::MAX - 1);
        }
    }

    #[test]
    fn contending_acquirers_on_free_lock_exactly_one_wins() {
        use std::sync::{Barrier, Mutex};
        use std::thread;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transaction.lock");
        for _ in 0..50 {
            let barrier = Arc::new(Barrier::new(4));
            let winners = Arc::new(Mutex::new(Vec::new()));
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let barrier = Arc::clone(&barrier);
                    let winners = Arc::clone(&winners);
                    let slot = WriterSlot::File(path.clone());
                    thread::spawn(move || {
                        barrier.wait();
                        if let Ok(lock) = slot.acquire() {
                            winners.lock().unwrap().push(lock);
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
            let winners = std::mem::take(&mut *winners.lock().unwrap());
            assert_eq!(winners.len(), 1);
            for lock in winners {
                lock.release().unwrap();
            }
            assert!(!path.exists());
        }
    }
}

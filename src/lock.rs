//! File-based locking for one snapshot root shared by several processes.
//!
//! Cross-platform (fs2) advisory locks on <root>/.cowsnap.lock:
//! - Exclusive: structural operations (do_snapshot / restore_snapshot / import_diff).
//! - Shared: diff/export and queries.
//!
//! The lock file is created at store construction. Each acquisition opens its own
//! handle: flock state belongs to the open file description, so two readers in one
//! process must not share a handle (the first unlock would release both).
//! Lock is released on Drop.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::{Result, SnapshotError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Lock-файл корня.
#[derive(Debug, Clone)]
pub struct RootLock {
    path: PathBuf,
}

impl RootLock {
    /// Создать (при необходимости) lock-файл.
    pub fn create(path: &Path) -> Result<Self> {
        open_lock_file(path, true)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire in the requested mode. Blocks until acquired.
    pub fn acquire(&self, mode: LockMode) -> Result<LockGuard> {
        let file = open_lock_file(&self.path, false)?;
        let res = match mode {
            LockMode::Shared => file.lock_shared(),
            LockMode::Exclusive => file.lock_exclusive(),
        };
        res.map_err(|e| SnapshotError::cannot_create(&self.path, e))?;
        Ok(LockGuard { file, mode })
    }
}

fn open_lock_file(path: &Path, create: bool) -> Result<File> {
    OpenOptions::new()
        .create(create)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| SnapshotError::cannot_create(path, e))
}

pub struct LockGuard {
    file: File,
    mode: LockMode,
}

impl LockGuard {
    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // fs2 unlock errors on drop are ignored deliberately.
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_guards_coexist_and_exclusive_follows() {
        let dir = tempfile::tempdir().unwrap();
        let lock = RootLock::create(&dir.path().join("LOCK")).unwrap();

        let a = lock.acquire(LockMode::Shared).unwrap();
        let b = lock.acquire(LockMode::Shared).unwrap();
        assert_eq!(a.mode(), LockMode::Shared);
        drop(a);
        drop(b);

        let x = lock.acquire(LockMode::Exclusive).unwrap();
        assert_eq!(x.mode(), LockMode::Exclusive);
    }

    #[test]
    fn missing_lock_file_is_cannot_create() {
        let dir = tempfile::tempdir().unwrap();
        let lock = RootLock::create(&dir.path().join("LOCK")).unwrap();
        std::fs::remove_file(lock.path()).unwrap();
        match lock.acquire(LockMode::Exclusive) {
            Err(SnapshotError::CannotCreate { path, .. }) => assert_eq!(path, lock.path()),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("lock on a removed file must fail"),
        }
    }
}

//! Advisory file locks guarding shared fleet state
//!
//! Each shared artifact (the environment and its fingerprint, the
//! orchestration file and port scan) has a lock file under `.locks/`.
//! The lock is released when the guard is dropped.

use crate::error::EnvError;
use crate::Result;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Held advisory lock; unlocks on drop
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    /// Take an exclusive lock, failing fast with [`EnvError::Locked`] if
    /// another process holds it.
    pub fn exclusive(path: impl AsRef<Path>) -> Result<Self> {
        Self::acquire(path.as_ref(), true)
    }

    /// Take a shared lock, failing fast if an exclusive holder exists.
    pub fn shared(path: impl AsRef<Path>) -> Result<Self> {
        Self::acquire(path.as_ref(), false)
    }

    fn acquire(path: &Path, exclusive: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let attempt = if exclusive {
            FileExt::try_lock_exclusive(&file)
        } else {
            FileExt::try_lock_shared(&file)
        };
        match attempt {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                return Err(EnvError::Locked(path.to_path_buf()))
            }
            // fs2 reports contention as a raw OS error on some platforms
            Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                return Err(EnvError::Locked(path.to_path_buf()))
            }
            Err(err) => return Err(EnvError::Io(err)),
        }

        debug!(lock = %path.display(), exclusive, "lock acquired");
        Ok(LockGuard {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_exclusive_lock_blocks_second_holder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".locks/environment.lock");

        let _guard = LockGuard::exclusive(&path).unwrap();
        let err = LockGuard::exclusive(&path).unwrap_err();
        assert!(matches!(err, EnvError::Locked(_)));
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.lock");

        {
            let _guard = LockGuard::exclusive(&path).unwrap();
        }
        assert!(LockGuard::exclusive(&path).is_ok());
    }

    #[test]
    fn test_shared_locks_coexist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("environment.lock");

        let _a = LockGuard::shared(&path).unwrap();
        let _b = LockGuard::shared(&path).unwrap();
        assert!(matches!(
            LockGuard::exclusive(&path).unwrap_err(),
            EnvError::Locked(_)
        ));
    }
}

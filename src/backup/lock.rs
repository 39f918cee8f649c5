use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{DeployError, DeployResult};

/// Exclusive marker for a running backup, holding the owner's PID.
/// Removed on drop.
#[derive(Debug)]
pub struct BackupLock {
    path: PathBuf,
}

impl BackupLock {
    /// Take the lock. A lock whose PID no longer exists is stale and
    /// gets replaced.
    pub fn acquire(path: &Path) -> DeployResult<Self> {
        if let Some(lock) = Self::try_create(path)? {
            return Ok(lock);
        }

        if holder_alive(path) {
            return Err(DeployError::BackupInProgress(path.to_path_buf()));
        }

        tracing::warn!(path = %path.display(), "removing stale backup lock");
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        // Lost a race against another run that cleaned up first.
        Self::try_create(path)?.ok_or_else(|| DeployError::BackupInProgress(path.to_path_buf()))
    }

    fn try_create(path: &Path) -> DeployResult<Option<Self>> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                Ok(Some(Self {
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for BackupLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// An unreadable or half-written lock counts as held.
fn holder_alive(path: &Path) -> bool {
    let Ok(content) = fs::read_to_string(path) else {
        return true;
    };
    let Ok(pid) = content.trim().parse::<u32>() else {
        return true;
    };
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.lock");

        let _held = BackupLock::acquire(&path).unwrap();
        let err = BackupLock::acquire(&path).unwrap_err();

        assert!(matches!(err, DeployError::BackupInProgress(_)));
    }

    #[test]
    fn released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.lock");

        drop(BackupLock::acquire(&path).unwrap());

        assert!(!path.exists());
        assert!(BackupLock::acquire(&path).is_ok());
    }

    #[test]
    fn stale_lock_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.lock");
        // Above the kernel's pid_max, so never a live process.
        fs::write(&path, "999999999\n").unwrap();

        let lock = BackupLock::acquire(&path).unwrap();

        let owner = fs::read_to_string(&path).unwrap();
        assert_eq!(owner.trim(), std::process::id().to_string());
        drop(lock);
    }

    #[test]
    fn garbage_lock_counts_as_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.lock");
        fs::write(&path, "").unwrap();

        assert!(BackupLock::acquire(&path).is_err());
    }
}

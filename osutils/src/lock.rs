use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};

use log::debug;
use nix::{
    errno::Errno,
    fcntl::{Flock, FlockArg},
};

use autodisk_api::error::{AutodiskError, InitializationError, ReportError};

use crate::files;

/// Exclusive, advisory lock held for the whole provisioning run.
///
/// The mount table and the disks themselves are modified without any finer
/// grained locking, so at most one provisioning run may be active on a host.
/// Operations that require this guarantee take a `&ProvisionLock`. The lock is
/// released when the value is dropped or the process exits.
#[derive(Debug)]
pub struct ProvisionLock {
    path: PathBuf,
    _lock: Flock<File>,
}

impl ProvisionLock {
    /// Takes the lock on `path`, creating the file and its parent directories
    /// if needed. Fails immediately if another process holds the lock.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, AutodiskError> {
        let path = path.as_ref();
        let acquire_error = || InitializationError::AcquireLock {
            path: path.to_string_lossy().to_string(),
        };

        if let Some(parent) = path.parent() {
            files::create_dirs(parent).structured(acquire_error())?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .structured(acquire_error())?;

        let lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => lock,
            Err((_, Errno::EWOULDBLOCK)) => {
                return Err(AutodiskError::new(InitializationError::AlreadyRunning))
            }
            Err((_, errno)) => return Err(errno).structured(acquire_error()),
        };

        debug!("Acquired lock '{}'", path.display());

        Ok(Self {
            path: path.to_owned(),
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use autodisk_api::error::ErrorKind;

    #[test]
    fn test_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("autodisk.lock");

        let lock = ProvisionLock::acquire(&path).unwrap();
        assert!(path.exists());
        assert_eq!(lock.path(), path);

        // A second holder is rejected while the first is alive
        let error = ProvisionLock::acquire(&path).unwrap_err();
        assert_eq!(
            error.kind(),
            &ErrorKind::Initialization(InitializationError::AlreadyRunning)
        );

        // Released on drop
        drop(lock);
        ProvisionLock::acquire(&path).unwrap();
    }

    #[test]
    fn test_acquire_bad_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, "").unwrap();

        // The parent of the lock path is a regular file
        let error = ProvisionLock::acquire(file.join("autodisk.lock")).unwrap_err();
        assert_eq!(error.category(), "initialization");
    }
}

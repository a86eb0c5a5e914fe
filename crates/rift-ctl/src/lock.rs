//! Advisory file locks serializing controllers that share a pidfile.
//!
//! The lock is released when the guard is dropped or the process exits. Lock
//! files are left on disk: removing them would let a waiter and a newcomer
//! lock two different inodes.

use std::fs::{File, OpenOptions, TryLockError};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{CtlError, Result};

/// Exclusive advisory lock on a file, held until dropped.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    _file: File,
}

impl InstanceLock {
    /// Take the lock without waiting. Fails with `Locked` if another process
    /// (or another guard in this process) holds it.
    pub fn try_acquire(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;
        match file.try_lock() {
            Ok(()) => {
                debug!("Acquired lock {}", path.display());
                Ok(Self {
                    path: path.to_path_buf(),
                    _file: file,
                })
            }
            Err(TryLockError::WouldBlock) => Err(CtlError::Locked(path.to_path_buf())),
            Err(TryLockError::Error(source)) => Err(lock_error(path, source)),
        }
    }

    /// Take the lock, waiting for the current holder to release it.
    pub async fn acquire(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;
        let owned = path.to_path_buf();
        let file = tokio::task::spawn_blocking(move || file.lock().map(|()| file))
            .await
            .map_err(|e| lock_error(&owned, io::Error::other(e)))?
            .map_err(|e| lock_error(&owned, e))?;
        debug!("Acquired lock {}", owned.display());
        Ok(Self {
            path: owned,
            _file: file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| lock_error(path, e))?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|e| lock_error(path, e))
}

fn lock_error(path: &Path, source: io::Error) -> CtlError {
    CtlError::PidFile {
        path: path.to_path_buf(),
        source,
    }
}

//! Pidfile tracking the supervised server instance.
//!
//! The file holds a single process id as text. It is written by the
//! supervisor only once the server is bound and configured, and removed by
//! the supervisor's shutdown hook as its last act. Its disappearance is the
//! only "fully stopped" signal a `stop` invocation waits for.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Handle to a pidfile path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the recorded pid. Fails with `NotFound` when the file is absent.
    pub fn read(&self) -> io::Result<u32> {
        let content = fs::read_to_string(&self.path)?;
        parse_pid(&content)
    }

    /// Write `pid` via temp file + rename so readers never see a partial file.
    pub fn write(&self, pid: u32) -> io::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let mut temp = self.path.as_os_str().to_owned();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        fs::write(&temp, pid.to_string())?;
        fs::rename(&temp, &self.path)
    }

    /// Delete the file (idempotent - no error if missing).
    pub fn remove(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn parse_pid(content: &str) -> io::Result<u32> {
    content
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|pid| *pid > 0)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing or invalid PID"))
}

/// Check whether a process exists using the null signal.
///
/// Nothing is delivered to the target. `EPERM` means the process exists but
/// belongs to someone else, so it counts as live.
#[cfg(unix)]
pub fn is_live(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match signal::kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Without a null-signal probe, assume the process is alive and let the
/// stop timeout clean up.
#[cfg(not(unix))]
pub fn is_live(_pid: u32) -> bool {
    true
}

/// Ask a process to terminate (SIGTERM).
///
/// A process that is already gone counts as terminated.
#[cfg(unix)]
pub fn terminate(pid: u32) -> io::Result<()> {
    let raw = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    match signal::kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(io::Error::other(e)),
    }
}

#[cfg(not(unix))]
pub fn terminate(pid: u32) -> io::Result<()> {
    tracing::warn!(
        "Cannot deliver a termination signal to process {} on this platform",
        pid
    );
    Ok(())
}

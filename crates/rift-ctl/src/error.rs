//! Error types for controller operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::client::ClientError;
use crate::render::TemplateError;

/// Errors that end a controller operation.
///
/// Every variant is terminal for the invoking command: nothing here is
/// retried. A stop that runs out of time is not an error at all, it falls
/// back to removing the pidfile locally.
#[derive(Error, Debug)]
pub enum CtlError {
    #[error("No such file: {}", .0.display())]
    ConfigFileMissing(PathBuf),
    #[error("Failed to read {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid JSON in {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("Server already running (pid {pid}) for pidfile {}", pidfile.display())]
    AlreadyRunning { pidfile: PathBuf, pid: u32 },
    #[error("Another controller holds the lock on {}", .0.display())]
    Locked(PathBuf),
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to wait for server process: {0}")]
    Wait(#[source] io::Error),
    #[error("Interrupted by {0} before the server was ready")]
    Interrupted(&'static str),
    #[error("Server exited unexpectedly ({0})")]
    ServerExited(String),
    #[error("Pidfile {}: {source}", path.display())]
    PidFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write {}: {source}", path.display())]
    SaveFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to install signal handlers: {0}")]
    SignalHandler(#[source] io::Error),
    #[error("Failed to signal process {pid}: {message}")]
    Signal { pid: u32, message: String },
}

impl CtlError {
    /// True for the "nothing is listening" case, reported with its own message.
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, CtlError::Client(ClientError::ConnectionRefused { .. }))
    }
}

pub type Result<T, E = CtlError> = std::result::Result<T, E>;

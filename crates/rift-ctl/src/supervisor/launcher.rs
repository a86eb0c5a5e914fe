//! Launching the managed server process.

use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::error::{CtlError, Result};
use crate::options::LaunchOptions;

/// How a managed server ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerExit {
    /// Exit code, `None` when killed by a signal or not a real process
    pub code: Option<i32>,
}

impl fmt::Display for ServerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => write!(f, "terminated"),
        }
    }
}

/// A launched server owned by the supervisor.
#[async_trait]
pub trait ServerHandle: Send {
    /// OS process id, if the server is a separate process.
    fn id(&self) -> Option<u32>;

    /// Non-blocking exit check.
    fn try_exit(&mut self) -> Result<Option<ServerExit>>;

    /// Wait for the server to exit on its own.
    async fn wait(&mut self) -> Result<ServerExit>;

    /// Close the server and wait for it to finish.
    async fn terminate(&mut self) -> Result<ServerExit>;
}

/// Starts managed servers.
#[async_trait]
pub trait ServerLauncher: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn ServerHandle>>;
}

/// Runs `options.server_bin` with flags derived from the launch options.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandLauncher;

#[async_trait]
impl ServerLauncher for CommandLauncher {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn ServerHandle>> {
        let args = options.server_args();
        debug!("Launching {} {}", options.server_bin, args.join(" "));

        let child = Command::new(&options.server_bin)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CtlError::Spawn {
                program: options.server_bin.clone(),
                source,
            })?;

        info!(
            "Spawned {} (pid {})",
            options.server_bin,
            child.id().map_or_else(|| "?".to_string(), |p| p.to_string())
        );
        Ok(Box::new(ChildServer { child }))
    }
}

struct ChildServer {
    child: Child,
}

fn exit_of(status: std::process::ExitStatus) -> ServerExit {
    ServerExit {
        code: status.code(),
    }
}

#[async_trait]
impl ServerHandle for ChildServer {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_exit(&mut self) -> Result<Option<ServerExit>> {
        self.child
            .try_wait()
            .map(|status| status.map(exit_of))
            .map_err(CtlError::Wait)
    }

    async fn wait(&mut self) -> Result<ServerExit> {
        self.child.wait().await.map(exit_of).map_err(CtlError::Wait)
    }

    async fn terminate(&mut self) -> Result<ServerExit> {
        if let Some(exit) = self.try_exit()? {
            return Ok(exit);
        }

        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                crate::pidfile::terminate(pid).map_err(|e| CtlError::Signal {
                    pid,
                    message: e.to_string(),
                })?;
            }
        }

        #[cfg(not(unix))]
        {
            self.child.start_kill().map_err(CtlError::Wait)?;
        }

        self.wait().await
    }
}

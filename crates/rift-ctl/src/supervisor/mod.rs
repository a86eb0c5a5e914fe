//! Start/stop/restart state machine for the managed server.
//!
//! The pidfile protocol between a `start`ed supervisor and a later `stop`
//! invocation:
//!
//! 1. `start` installs SIGTERM/SIGINT handlers, spawns the server, waits
//!    until it accepts connections, loads the config file, and only then
//!    writes its own pid to the pidfile. Anything watching for the pidfile
//!    never sees a server that is bound but not yet configured. A signal
//!    arriving before that point terminates the server and fails the start.
//! 2. On a termination signal the supervisor closes the server, removes the
//!    pidfile, and returns so the process can exit.
//! 3. `stop` signals the recorded pid and polls for the pidfile to vanish,
//!    giving up after `STOP_TIMEOUT` and removing the file itself.
//!
//! The supervisor's own pid (not the server's) goes in the pidfile because
//! it is the process that honours step 2.

mod launcher;
mod signal;

pub use launcher::{CommandLauncher, ServerExit, ServerHandle, ServerLauncher};
pub use signal::{ShutdownSignal, ShutdownTrigger};

use parking_lot::Mutex;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::client::{ClientError, ConfigClient};
use crate::error::{CtlError, Result};
use crate::lock::InstanceLock;
use crate::options::LaunchOptions;
use crate::pidfile::{self, PidFile};
use crate::render::ConfigRenderer;

/// How long `stop` waits for the pidfile to disappear.
pub const STOP_TIMEOUT: Duration = Duration::from_millis(1000);
/// Poll interval for both readiness and stop.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// What `stop` found and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No pidfile: nothing to do
    NotRunning,
    /// The pidfile named a dead process (or held garbage) and was removed
    StaleRemoved { pid: Option<u32> },
    /// The process removed its pidfile within the timeout
    Stopped { pid: u32 },
    /// Timed out; the pidfile was removed locally
    ForcedCleanup { pid: u32 },
}

#[derive(Debug, Clone)]
struct SharedState(Arc<Mutex<SupervisorState>>);

impl SharedState {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(SupervisorState::Stopped)))
    }

    fn get(&self) -> SupervisorState {
        *self.0.lock()
    }

    fn set(&self, next: SupervisorState) {
        let mut state = self.0.lock();
        if *state != next {
            debug!("Supervisor state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }
}

/// Owns the lifecycle of one server instance.
pub struct Supervisor {
    options: LaunchOptions,
    launcher: Arc<dyn ServerLauncher>,
    renderer: ConfigRenderer,
    client: ConfigClient,
    state: SharedState,
}

impl Supervisor {
    /// Supervisor that launches `options.server_bin` as a child process.
    pub fn new(options: LaunchOptions) -> Result<Self> {
        Self::with_launcher(options, Arc::new(CommandLauncher))
    }

    pub fn with_launcher(options: LaunchOptions, launcher: Arc<dyn ServerLauncher>) -> Result<Self> {
        let client = ConfigClient::from_options(&options)?;
        Ok(Self {
            renderer: ConfigRenderer::from_options(&options),
            options,
            launcher,
            client,
            state: SharedState::new(),
        })
    }

    pub fn options(&self) -> &LaunchOptions {
        &self.options
    }

    pub fn state(&self) -> SupervisorState {
        self.state.get()
    }

    fn pidfile(&self) -> PidFile {
        PidFile::new(&self.options.pidfile)
    }

    /// Start the server, shutting down on SIGTERM/SIGINT.
    pub async fn start(&self) -> Result<RunningServer> {
        self.start_inner(None).await
    }

    /// Start the server, shutting down when `shutdown` fires.
    pub async fn start_with_shutdown(&self, shutdown: ShutdownSignal) -> Result<RunningServer> {
        self.start_inner(Some(shutdown)).await
    }

    async fn start_inner(&self, shutdown: Option<ShutdownSignal>) -> Result<RunningServer> {
        let lock = self.acquire_instance()?;
        self.state.set(SupervisorState::Starting);

        match self.launch_and_configure(shutdown).await {
            Ok((handle, signal)) => {
                let pid = std::process::id();
                let pidfile = self.pidfile();
                if let Err(source) = pidfile.write(pid) {
                    self.state.set(SupervisorState::Stopped);
                    return Err(CtlError::PidFile {
                        path: pidfile.path().to_path_buf(),
                        source,
                    });
                }

                self.state.set(SupervisorState::Running);
                info!(
                    "{} now running on {} (pid {})",
                    self.options.server_bin,
                    self.options.admin_url(),
                    pid
                );
                Ok(RunningServer {
                    handle,
                    signal,
                    pidfile,
                    state: self.state.clone(),
                    _lock: lock,
                })
            }
            Err(e) => {
                self.state.set(SupervisorState::Stopped);
                Err(e)
            }
        }
    }

    /// Take the instance lock, refusing to start over a live instance.
    fn acquire_instance(&self) -> Result<InstanceLock> {
        let pidfile = self.pidfile();
        let lock = match InstanceLock::try_acquire(&self.options.instance_lock_path()) {
            Ok(lock) => lock,
            Err(CtlError::Locked(path)) => {
                return Err(match pidfile.read() {
                    Ok(pid) => CtlError::AlreadyRunning {
                        pidfile: pidfile.path().to_path_buf(),
                        pid,
                    },
                    Err(_) => CtlError::Locked(path),
                });
            }
            Err(e) => return Err(e),
        };

        // A pidfile left by a controller that did not take the lock
        if let Ok(pid) = pidfile.read() {
            if pid != std::process::id() && pidfile::is_live(pid) {
                return Err(CtlError::AlreadyRunning {
                    pidfile: pidfile.path().to_path_buf(),
                    pid,
                });
            }
            warn!("Removing stale pidfile {} (pid {})", pidfile.path().display(), pid);
            remove_pidfile(&pidfile)?;
        }

        Ok(lock)
    }

    async fn launch_and_configure(
        &self,
        shutdown: Option<ShutdownSignal>,
    ) -> Result<(Box<dyn ServerHandle>, ShutdownSignal)> {
        // Handlers go in before the spawn: a signal during startup must still
        // terminate the server
        let mut signal = match shutdown {
            Some(signal) => signal,
            None => ShutdownSignal::install().map_err(CtlError::SignalHandler)?,
        };

        let mut handle = self.launcher.launch(&self.options).await?;

        let configured = tokio::select! {
            res = self.ready_and_configured(handle.as_mut()) => res,
            name = signal.recv() => Err(CtlError::Interrupted(name)),
        };

        // Terminate explicitly so the port is free before the error surfaces
        if let Err(e) = configured {
            warn!("Startup failed, stopping {}: {}", self.options.server_bin, e);
            let _ = handle.terminate().await;
            return Err(e);
        }

        Ok((handle, signal))
    }

    async fn ready_and_configured(&self, handle: &mut dyn ServerHandle) -> Result<()> {
        self.wait_until_ready(handle).await?;
        if let Some(ref configfile) = self.options.configfile {
            self.load_config(configfile).await?;
        }
        Ok(())
    }

    /// Wait until the server accepts connections on its admin port.
    async fn wait_until_ready(&self, handle: &mut dyn ServerHandle) -> Result<()> {
        let host = self.options.admin_host();
        let port = self.options.port;
        loop {
            if let Some(exit) = handle.try_exit()? {
                return Err(CtlError::ServerExited(exit.to_string()));
            }
            match TcpStream::connect((host, port)).await {
                Ok(_) => {
                    debug!("Server accepting connections on {}:{}", host, port);
                    return Ok(());
                }
                Err(e) => debug!("Waiting for {}:{}: {}", host, port, e),
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Render the config file and replace the server's imposters with it.
    async fn load_config(&self, configfile: &Path) -> Result<()> {
        let set = self.renderer.render(configfile)?;
        let resp = self.client.replace(&set).await?;
        if !resp.status.is_success() {
            return Err(ClientError::UnexpectedStatus {
                status: resp.status.as_u16(),
                body: resp.body.to_string(),
            }
            .into());
        }
        info!(
            "Loaded {} imposter(s) from {}",
            set.len(),
            configfile.display()
        );
        Ok(())
    }

    /// Stop the instance recorded in the pidfile.
    pub async fn stop(&self) -> Result<StopOutcome> {
        let pidfile = self.pidfile();
        if !pidfile.exists() {
            debug!("No pidfile at {}", pidfile.path().display());
            return Ok(StopOutcome::NotRunning);
        }

        let _guard = InstanceLock::acquire(&self.options.stop_lock_path()).await?;

        let pid = match pidfile.read() {
            Ok(pid) => pid,
            // Removed while we waited for the lock
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StopOutcome::NotRunning),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!("Removing unreadable pidfile {}", pidfile.path().display());
                remove_pidfile(&pidfile)?;
                return Ok(StopOutcome::StaleRemoved { pid: None });
            }
            Err(source) => {
                return Err(CtlError::PidFile {
                    path: pidfile.path().to_path_buf(),
                    source,
                })
            }
        };

        if !pidfile::is_live(pid) {
            info!("Removing stale pidfile (pid {} is not running)", pid);
            remove_pidfile(&pidfile)?;
            return Ok(StopOutcome::StaleRemoved { pid: Some(pid) });
        }

        self.state.set(SupervisorState::Stopping);
        if let Err(e) = pidfile::terminate(pid) {
            self.state.set(SupervisorState::Stopped);
            return Err(CtlError::Signal {
                pid,
                message: e.to_string(),
            });
        }

        let deadline = Instant::now() + STOP_TIMEOUT;
        let outcome = loop {
            if !pidfile.exists() {
                info!("Process {} stopped", pid);
                break StopOutcome::Stopped { pid };
            }
            if Instant::now() >= deadline {
                // Signal handlers may never run (e.g. no signal support on the
                // platform); reconcile the pidfile anyway.
                warn!(
                    "Process {} did not remove {} within {:?}; removing it",
                    pid,
                    pidfile.path().display(),
                    STOP_TIMEOUT
                );
                if let Err(e) = pidfile.remove() {
                    debug!("Forced pidfile removal failed: {}", e);
                }
                break StopOutcome::ForcedCleanup { pid };
            }
            sleep(POLL_INTERVAL).await;
        };

        self.state.set(SupervisorState::Stopped);
        Ok(outcome)
    }

    /// `stop` then `start`. A failing stop aborts before anything is launched.
    pub async fn restart(&self) -> Result<RunningServer> {
        self.stop().await?;
        self.start().await
    }

    /// `restart` with a manual shutdown signal.
    pub async fn restart_with_shutdown(&self, shutdown: ShutdownSignal) -> Result<RunningServer> {
        self.stop().await?;
        self.start_with_shutdown(shutdown).await
    }
}

fn remove_pidfile(pidfile: &PidFile) -> Result<()> {
    pidfile.remove().map_err(|source| CtlError::PidFile {
        path: pidfile.path().to_path_buf(),
        source,
    })
}

enum Wake {
    Signal(&'static str),
    Exited(Result<ServerExit>),
}

/// A configured server whose pidfile has been written.
///
/// Holds the instance lock until dropped.
pub struct RunningServer {
    handle: Box<dyn ServerHandle>,
    signal: ShutdownSignal,
    pidfile: PidFile,
    state: SharedState,
    _lock: InstanceLock,
}

impl std::fmt::Debug for RunningServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningServer")
            .field("server_pid", &self.handle.id())
            .field("pidfile", &self.pidfile.path())
            .finish()
    }
}

impl RunningServer {
    /// Pid of the server process, if it is a separate process.
    pub fn server_pid(&self) -> Option<u32> {
        self.handle.id()
    }

    pub fn pidfile(&self) -> &PidFile {
        &self.pidfile
    }

    /// Block until a termination signal arrives, then run the shutdown hook.
    ///
    /// If the server exits on its own first, the pidfile is removed and
    /// `ServerExited` is returned.
    pub async fn wait_for_shutdown(mut self) -> Result<()> {
        let wake = tokio::select! {
            name = self.signal.recv() => Wake::Signal(name),
            exit = self.handle.wait() => Wake::Exited(exit),
        };

        match wake {
            Wake::Signal(name) => {
                info!("Received {}, shutting down", name);
                self.shutdown().await
            }
            Wake::Exited(exit) => {
                self.state.set(SupervisorState::Stopped);
                if let Err(e) = self.pidfile.remove() {
                    warn!("Failed to remove {}: {}", self.pidfile.path().display(), e);
                }
                let exit = exit?;
                Err(CtlError::ServerExited(exit.to_string()))
            }
        }
    }

    /// Shutdown hook: close the server, then remove the pidfile.
    ///
    /// The pidfile goes last so a polling `stop` only sees it vanish once the
    /// server is really down.
    pub async fn shutdown(mut self) -> Result<()> {
        self.state.set(SupervisorState::Stopping);
        let closed = self.handle.terminate().await;
        match &closed {
            Ok(exit) => debug!("Server closed ({})", exit),
            Err(e) => warn!("Failed to close server: {}", e),
        }
        if let Err(e) = self.pidfile.remove() {
            warn!("Failed to remove {}: {}", self.pidfile.path().display(), e);
        }
        self.state.set(SupervisorState::Stopped);
        closed.map(|_| ())
    }
}

//! Lifecycle controller for Mountebank-compatible servers.
//!
//! Starts a server process, loads its imposters from a (templated) config
//! file, tracks it with a pidfile, and stops it again. Also pulls the live
//! configuration back out (`save`) and re-loads it with proxies stripped
//! (`replay`).
//!
//! # Example
//!
//! ```no_run
//! use rift_ctl::{Commands, LaunchOptions};
//! use std::path::PathBuf;
//!
//! # async fn example() -> Result<(), rift_ctl::CtlError> {
//! let options = LaunchOptions {
//!     configfile: Some(PathBuf::from("imposters.ejs")),
//!     ..Default::default()
//! };
//! let commands = Commands::new(options)?;
//! let running = commands.start().await?;
//! running.wait_for_shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod client;
pub mod commands;
pub mod error;
pub mod imposter;
pub mod lock;
pub mod options;
pub mod pidfile;
pub mod render;
pub mod supervisor;

pub use builder::{ImposterBuilder, StubBuilder};
pub use client::{ClientError, ConfigClient, FetchResponse, ReplaceResponse};
pub use commands::Commands;
pub use error::{CtlError, Result};
pub use imposter::ImposterSet;
pub use options::LaunchOptions;
pub use pidfile::PidFile;
pub use render::{ConfigRenderer, RenderContext, TemplateError};
pub use supervisor::{
    RunningServer, ServerExit, ServerHandle, ServerLauncher, ShutdownSignal, ShutdownTrigger,
    StopOutcome, Supervisor, SupervisorState,
};

//! Launch options for one managed server instance.

use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 2525;
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PIDFILE: &str = "mb.pid";
pub const DEFAULT_SAVEFILE: &str = "mb.json";
pub const DEFAULT_SERVER_BIN: &str = "mb";

/// Immutable configuration for one server instance.
///
/// Two instances must not share a port or a pidfile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Admin port of the managed server
    pub port: u16,
    /// Bind host; `None` means the server's default, reached via `localhost`
    pub host: Option<String>,
    pub pidfile: PathBuf,
    /// Imposters loaded right after the server binds
    pub configfile: Option<PathBuf>,
    pub savefile: PathBuf,
    /// Load the config file as plain JSON, skipping template expansion
    pub no_parse: bool,
    pub datadir: Option<PathBuf>,
    pub logfile: PathBuf,
    pub loglevel: String,
    pub nologfile: bool,
    pub allow_injection: bool,
    pub local_only: bool,
    pub ip_whitelist: Vec<String>,
    pub mock: bool,
    pub debug: bool,
    pub protofile: PathBuf,
    /// Executable started by `start`
    pub server_bin: String,
    /// Passed through to the server untouched
    pub extra_args: Vec<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: None,
            pidfile: PathBuf::from(DEFAULT_PIDFILE),
            configfile: None,
            savefile: PathBuf::from(DEFAULT_SAVEFILE),
            no_parse: false,
            datadir: None,
            logfile: PathBuf::from("mb.log"),
            loglevel: "info".to_string(),
            nologfile: false,
            allow_injection: false,
            local_only: false,
            ip_whitelist: vec!["*".to_string()],
            mock: false,
            debug: false,
            protofile: PathBuf::from("protocols.json"),
            server_bin: DEFAULT_SERVER_BIN.to_string(),
            extra_args: Vec::new(),
        }
    }
}

impl LaunchOptions {
    /// Host the controller talks to.
    pub fn admin_host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_HOST)
    }

    /// Base URL of the server's imposters API.
    pub fn admin_url(&self) -> String {
        format!("http://{}:{}", self.admin_host(), self.port)
    }

    /// Path of the advisory lock held while a supervisor is running.
    pub fn instance_lock_path(&self) -> PathBuf {
        sibling_with_suffix(&self.pidfile, ".lock")
    }

    /// Path of the advisory lock serializing concurrent stops.
    pub fn stop_lock_path(&self) -> PathBuf {
        sibling_with_suffix(&self.pidfile, ".stop.lock")
    }

    /// Command-line flags for the managed server.
    ///
    /// The config file and pidfile are never passed: the controller
    /// loads the configuration itself and owns the pidfile.
    pub fn server_args(&self) -> Vec<String> {
        let mut args = vec!["--port".to_string(), self.port.to_string()];

        if let Some(ref host) = self.host {
            args.push("--host".to_string());
            args.push(host.clone());
        }
        if let Some(ref datadir) = self.datadir {
            args.push("--datadir".to_string());
            args.push(datadir.display().to_string());
        }
        if self.nologfile {
            args.push("--nologfile".to_string());
        } else {
            args.push("--logfile".to_string());
            args.push(self.logfile.display().to_string());
        }
        args.push("--loglevel".to_string());
        args.push(self.loglevel.clone());
        if self.allow_injection {
            args.push("--allowInjection".to_string());
        }
        if self.local_only {
            args.push("--localOnly".to_string());
        }
        if !self.ip_whitelist.is_empty() && self.ip_whitelist != ["*"] {
            args.push("--ipWhitelist".to_string());
            args.push(self.ip_whitelist.join("|"));
        }
        if self.mock {
            args.push("--mock".to_string());
        }
        if self.debug {
            args.push("--debug".to_string());
        }
        args.push("--protofile".to_string());
        args.push(self.protofile.display().to_string());

        args.extend(self.extra_args.iter().cloned());
        args
    }
}

fn sibling_with_suffix(path: &std::path::Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

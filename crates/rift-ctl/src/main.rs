//! rift-ctl - start, stop and snapshot a Mountebank-compatible server
//!
//! # Usage
//!
//! ```bash
//! # Start mb on port 2525 and load imposters from a template
//! rift-ctl start --configfile imposters.ejs
//!
//! # From another shell (or a build plugin)
//! rift-ctl save --savefile snapshot.json
//! rift-ctl replay
//! rift-ctl stop
//!
//! # Supervise Rift instead of mb, forwarding extra flags
//! rift-ctl start --server-bin rift-http-proxy -- --allow-injection
//! ```

use anyhow::anyhow;
use clap::{Args, Parser, Subcommand, ValueEnum};
use rift_ctl::options::{DEFAULT_PIDFILE, DEFAULT_SAVEFILE, DEFAULT_SERVER_BIN};
use rift_ctl::{Commands, LaunchOptions, StopOutcome};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rift-ctl")]
#[command(author, version, about = "Lifecycle controller for Mountebank-compatible servers")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text", env = "RIFT_CTL_LOG_FORMAT")]
    log_format: LogFormat,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch the server, load the config file, write the pidfile, and wait
    /// for SIGINT/SIGTERM
    Start(LaunchArgs),
    /// Stop the server recorded in the pidfile
    Stop(LaunchArgs),
    /// Stop, then start
    Restart(LaunchArgs),
    /// Write the running server's imposters to the save file
    Save(LaunchArgs),
    /// Reload the running server's imposters with proxies removed
    Replay(LaunchArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Args, Debug, Clone)]
struct LaunchArgs {
    /// Admin port of the server
    #[arg(long, default_value = "2525", env = "RIFT_CTL_PORT")]
    port: u16,

    /// Hostname to bind and to connect to (default: localhost)
    #[arg(long)]
    host: Option<String>,

    /// Imposters file to load on start (JSON, optionally templated)
    #[arg(long = "configfile")]
    configfile: Option<PathBuf>,

    /// Data directory handed to the server
    #[arg(long)]
    datadir: Option<PathBuf>,

    /// Load the config file without template expansion
    #[arg(long = "noParse")]
    no_parse: bool,

    #[arg(long, default_value = DEFAULT_PIDFILE)]
    pidfile: PathBuf,

    /// Target of `save`
    #[arg(long, default_value = DEFAULT_SAVEFILE)]
    savefile: PathBuf,

    #[arg(long, default_value = "mb.log")]
    logfile: PathBuf,

    #[arg(long, default_value = "info")]
    loglevel: String,

    #[arg(long)]
    nologfile: bool,

    #[arg(long = "allowInjection")]
    allow_injection: bool,

    #[arg(long = "localOnly")]
    local_only: bool,

    /// Pipe-delimited list of allowed client addresses
    #[arg(long = "ipWhitelist", default_value = "*")]
    ip_whitelist: String,

    #[arg(long)]
    mock: bool,

    #[arg(long)]
    debug: bool,

    #[arg(long, default_value = "protocols.json")]
    protofile: PathBuf,

    /// Server executable to launch
    #[arg(long, default_value = DEFAULT_SERVER_BIN, env = "RIFT_CTL_SERVER_BIN")]
    server_bin: String,

    /// Extra arguments passed to the server after `--`
    #[arg(last = true)]
    server_args: Vec<String>,
}

impl From<LaunchArgs> for LaunchOptions {
    fn from(args: LaunchArgs) -> Self {
        LaunchOptions {
            port: args.port,
            host: args.host,
            pidfile: args.pidfile,
            configfile: args.configfile,
            savefile: args.savefile,
            no_parse: args.no_parse,
            datadir: args.datadir,
            logfile: args.logfile,
            loglevel: args.loglevel,
            nologfile: args.nologfile,
            allow_injection: args.allow_injection,
            local_only: args.local_only,
            ip_whitelist: args
                .ip_whitelist
                .split('|')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            mock: args.mock,
            debug: args.debug,
            protofile: args.protofile,
            server_bin: args.server_bin,
            extra_args: args.server_args,
        }
    }
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rift_ctl=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| anyhow!(e))
}

async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Start(args) => {
            let commands = Commands::new(args.into())?;
            let running = commands.start().await?;
            running.wait_for_shutdown().await?;
        }
        Command::Stop(args) => {
            let commands = Commands::new(args.into())?;
            match commands.stop().await? {
                StopOutcome::NotRunning => info!("Nothing to stop"),
                StopOutcome::StaleRemoved { .. } => info!("Removed stale pidfile"),
                StopOutcome::Stopped { pid } | StopOutcome::ForcedCleanup { pid } => {
                    info!("Stopped process {}", pid)
                }
            }
        }
        Command::Restart(args) => {
            let commands = Commands::new(args.into())?;
            let running = commands.restart().await?;
            running.wait_for_shutdown().await?;
        }
        Command::Save(args) => {
            let commands = Commands::new(args.into())?;
            commands.save().await?;
        }
        Command::Replay(args) => {
            let commands = Commands::new(args.into())?;
            commands.replay().await?;
        }
    }
    Ok(())
}

// One flow per invocation; the server itself runs in its own process.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_format) {
        eprintln!("Failed to initialize logging: {e}");
    }

    if let Err(e) = run(cli.command).await {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

//! Termination signals that trigger the supervisor's shutdown hook.

use std::io;
use tokio::sync::oneshot;

#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Source of the "shut down now" request for a running supervisor.
pub struct ShutdownSignal {
    source: Source,
}

enum Source {
    #[cfg(unix)]
    Os { term: Signal, int: Signal },
    #[cfg(not(unix))]
    CtrlC,
    Manual(oneshot::Receiver<()>),
}

/// Fires a manual `ShutdownSignal`.
#[derive(Debug)]
pub struct ShutdownTrigger(oneshot::Sender<()>);

impl ShutdownTrigger {
    pub fn trigger(self) {
        let _ = self.0.send(());
    }
}

impl ShutdownSignal {
    /// Install SIGTERM and SIGINT handlers for this process.
    ///
    /// Once installed, these signals no longer kill the process; they are
    /// only observed through `recv`.
    #[cfg(unix)]
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            source: Source::Os {
                term: signal(SignalKind::terminate())?,
                int: signal(SignalKind::interrupt())?,
            },
        })
    }

    #[cfg(not(unix))]
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            source: Source::CtrlC,
        })
    }

    /// A signal fired by hand, for embedding and tests.
    pub fn manual() -> (Self, ShutdownTrigger) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                source: Source::Manual(rx),
            },
            ShutdownTrigger(tx),
        )
    }

    /// Wait for the next shutdown request; returns its name for logging.
    pub async fn recv(&mut self) -> &'static str {
        match &mut self.source {
            #[cfg(unix)]
            Source::Os { term, int } => tokio::select! {
                _ = term.recv() => "SIGTERM",
                _ = int.recv() => "SIGINT",
            },
            #[cfg(not(unix))]
            Source::CtrlC => {
                let _ = tokio::signal::ctrl_c().await;
                "Ctrl-C"
            }
            Source::Manual(rx) => {
                if rx.await.is_err() {
                    // Trigger dropped without firing: never shut down
                    std::future::pending::<()>().await;
                }
                "shutdown request"
            }
        }
    }
}

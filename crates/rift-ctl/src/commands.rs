//! The user-facing operations: start, stop, restart, save, replay.

use reqwest::StatusCode;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::client::{ClientError, ConfigClient, ReplaceResponse};
use crate::error::{CtlError, Result};
use crate::options::LaunchOptions;
use crate::supervisor::{
    CommandLauncher, RunningServer, ServerLauncher, ShutdownSignal, StopOutcome, Supervisor,
};

/// Entry point for every command against one server instance.
pub struct Commands {
    supervisor: Supervisor,
    client: ConfigClient,
}

impl Commands {
    pub fn new(options: LaunchOptions) -> Result<Self> {
        Self::with_launcher(options, Arc::new(CommandLauncher))
    }

    pub fn with_launcher(options: LaunchOptions, launcher: Arc<dyn ServerLauncher>) -> Result<Self> {
        let client = ConfigClient::from_options(&options)?;
        Ok(Self {
            supervisor: Supervisor::with_launcher(options, launcher)?,
            client,
        })
    }

    pub fn options(&self) -> &LaunchOptions {
        self.supervisor.options()
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn client(&self) -> &ConfigClient {
        &self.client
    }

    pub async fn start(&self) -> Result<RunningServer> {
        self.supervisor.start().await
    }

    pub async fn start_with_shutdown(&self, shutdown: ShutdownSignal) -> Result<RunningServer> {
        self.supervisor.start_with_shutdown(shutdown).await
    }

    pub async fn stop(&self) -> Result<StopOutcome> {
        self.supervisor.stop().await
    }

    pub async fn restart(&self) -> Result<RunningServer> {
        self.supervisor.restart().await
    }

    /// Write the server's replayable config to the save file, verbatim.
    pub async fn save(&self) -> Result<PathBuf> {
        let resp = self.client.fetch(false).await?;
        let path = self.options().savefile.clone();
        fs::write(&path, &resp.body).map_err(|source| CtlError::SaveFile {
            path: path.clone(),
            source,
        })?;
        info!(
            "Saved imposters from {} to {}",
            self.client.base_url(),
            path.display()
        );
        Ok(path)
    }

    /// Re-load the server's own config with proxies stripped, so recorded
    /// responses are served without calling the real upstream again.
    ///
    /// Nothing is sent back unless the fetch returned exactly 200.
    pub async fn replay(&self) -> Result<ReplaceResponse> {
        let fetched = self.client.fetch(true).await?;
        if fetched.status != StatusCode::OK {
            return Err(ClientError::UnexpectedStatus {
                status: fetched.status.as_u16(),
                body: fetched.body,
            }
            .into());
        }

        let resp = self.client.replace_raw(fetched.body).await?;
        if !resp.status.is_success() {
            return Err(ClientError::UnexpectedStatus {
                status: resp.status.as_u16(),
                body: resp.body.to_string(),
            }
            .into());
        }
        info!("Replayed imposters on {}", self.client.base_url());
        Ok(resp)
    }
}

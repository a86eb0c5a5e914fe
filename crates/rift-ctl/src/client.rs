//! HTTP client for the server's imposters API.
//!
//! Every call opens its own connection (`Connection: close`, no idle pool)
//! and reads the whole body before returning. No client-side timeout is set.

use reqwest::header::{CONNECTION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::imposter::ImposterSet;
use crate::options::LaunchOptions;

/// Errors that can occur when talking to the imposters API
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("No mb process running on http://{host}:{port}")]
    ConnectionRefused { host: String, port: u16 },
    #[error("Received status code {status}\n{body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("HTTP request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("Failed to parse response: {0}")]
    Parse(String),
}

/// Raw result of `GET /imposters`.
///
/// Non-2xx statuses are data here, not errors; callers decide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub body: String,
}

impl FetchResponse {
    /// Parse the body as an imposters document.
    pub fn imposters(&self) -> Result<ImposterSet, ClientError> {
        serde_json::from_str(&self.body).map_err(|e| ClientError::Parse(e.to_string()))
    }
}

/// Result of `PUT /imposters`, body already parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaceResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Client bound to one server's admin port.
#[derive(Debug, Clone)]
pub struct ConfigClient {
    client: Client,
    host: String,
    port: u16,
}

impl ConfigClient {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, ClientError> {
        let client = Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .map_err(ClientError::Transport)?;
        Ok(Self {
            client,
            host: host.into(),
            port,
        })
    }

    pub fn from_options(options: &LaunchOptions) -> Result<Self, ClientError> {
        Self::new(options.admin_host(), options.port)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// `GET /imposters?replayable=true[&removeProxies=true]`
    ///
    /// `replayable` strips runtime data (recorded requests, counters) so the
    /// result can be loaded again as is. `remove_proxies` drops proxy
    /// responses so a replay never reaches the real upstream.
    pub async fn fetch(&self, remove_proxies: bool) -> Result<FetchResponse, ClientError> {
        let mut url = format!("{}/imposters?replayable=true", self.base_url());
        if remove_proxies {
            url.push_str("&removeProxies=true");
        }

        let resp = self.send(self.request(Method::GET, &url)).await?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.transport(e))?;
        debug!("GET {} -> {} ({} bytes)", url, status, body.len());

        Ok(FetchResponse { status, body })
    }

    /// `PUT /imposters` with an already serialized document.
    pub async fn replace_raw(&self, body: String) -> Result<ReplaceResponse, ClientError> {
        let url = format!("{}/imposters", self.base_url());
        let resp = self
            .send(self.request(Method::PUT, &url).body(body))
            .await?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| self.transport(e))?;
        debug!("PUT {} -> {}", url, status);

        Ok(ReplaceResponse {
            status,
            body: parse_body(&text)?,
        })
    }

    /// `PUT /imposters`, replacing every imposter on the server.
    pub async fn replace(&self, set: &ImposterSet) -> Result<ReplaceResponse, ClientError> {
        let body = serde_json::to_string(set).map_err(|e| ClientError::Parse(e.to_string()))?;
        self.replace_raw(body).await
    }

    /// `POST /imposters` - create a single imposter.
    pub async fn create(&self, imposter: &Value) -> Result<Value, ClientError> {
        let url = format!("{}/imposters", self.base_url());
        let resp = self
            .send(self.request(Method::POST, &url).body(imposter.to_string()))
            .await?;
        self.expect_success(resp).await
    }

    /// `DELETE /imposters/:port`
    pub async fn delete(&self, port: u16) -> Result<Value, ClientError> {
        let url = format!("{}/imposters/{}", self.base_url(), port);
        let resp = self.send(self.request(Method::DELETE, &url)).await?;
        self.expect_success(resp).await
    }

    /// `DELETE /imposters`
    pub async fn delete_all(&self) -> Result<Value, ClientError> {
        let url = format!("{}/imposters", self.base_url());
        let resp = self.send(self.request(Method::DELETE, &url)).await?;
        self.expect_success(resp).await
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(CONTENT_TYPE, "application/json")
            .header(CONNECTION, "close")
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, ClientError> {
        request.send().await.map_err(|e| self.transport(e))
    }

    async fn expect_success(&self, resp: reqwest::Response) -> Result<Value, ClientError> {
        let status = resp.status();
        let text = resp.text().await.map_err(|e| self.transport(e))?;
        if !status.is_success() {
            return Err(ClientError::UnexpectedStatus {
                status: status.as_u16(),
                body: text,
            });
        }
        parse_body(&text)
    }

    /// Map a reqwest error, singling out "nothing listening".
    fn transport(&self, err: reqwest::Error) -> ClientError {
        if err.is_connect() && is_refused(&err) {
            ClientError::ConnectionRefused {
                host: self.host.clone(),
                port: self.port,
            }
        } else {
            ClientError::Transport(err)
        }
    }
}

/// True when the error chain bottoms out in ECONNREFUSED. Other connect
/// errors (DNS, unreachable host) stay transport failures.
fn is_refused(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        source = e.source();
    }
    false
}

fn parse_body(text: &str) -> Result<Value, ClientError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text).map_err(|e| ClientError::Parse(e.to_string()))
}

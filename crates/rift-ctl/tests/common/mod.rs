//! In-process stand-in for a Mountebank imposters API.
//!
//! `FakeApi` answers GET/PUT/POST/DELETE on `/imposters` from memory and
//! records every request. `FakeLauncher` plugs it into the supervisor in
//! place of a real server process.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use rift_ctl::{CtlError, LaunchOptions, ServerExit, ServerHandle, ServerLauncher};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

pub const HOST: &str = "127.0.0.1";

/// Exit code the fake server reports after `FakeApi::crash`.
pub const CRASH_CODE: i32 = 70;

/// Grab a port nothing is listening on.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind((HOST, 0)).expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}

/// Launch options pointing at `HOST:port` with all files under `dir`.
pub fn options(dir: &Path, port: u16) -> LaunchOptions {
    LaunchOptions {
        port,
        host: Some(HOST.to_string()),
        pidfile: dir.join("mb.pid"),
        savefile: dir.join("mb.json"),
        nologfile: true,
        ..Default::default()
    }
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    /// Path plus query string
    pub uri: String,
    pub connection: Option<String>,
    pub body: String,
}

#[derive(Default)]
struct FakeState {
    imposters: Vec<Value>,
    requests: Vec<Recorded>,
    get_status: Option<u16>,
    get_body: Option<String>,
    put_status: Option<u16>,
}

#[derive(Default)]
pub struct FakeApi {
    state: Mutex<FakeState>,
    crash: Notify,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_imposters(imposters: Vec<Value>) -> Arc<Self> {
        let api = Self::new();
        api.state.lock().imposters = imposters;
        api
    }

    pub fn imposters(&self) -> Vec<Value> {
        self.state.lock().imposters.clone()
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.lock().requests.clone()
    }

    pub fn requests_with(&self, method: Method) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method)
            .collect()
    }

    /// Answer every GET with `status` and an error document.
    pub fn fail_get(&self, status: u16) {
        self.state.lock().get_status = Some(status);
    }

    /// Answer every GET with exactly `body`.
    pub fn serve_body(&self, body: impl Into<String>) {
        self.state.lock().get_body = Some(body.into());
    }

    /// Reject every PUT with `status`.
    pub fn fail_put(&self, status: u16) {
        self.state.lock().put_status = Some(status);
    }

    /// Make the serving task exit with `CRASH_CODE`.
    pub fn crash(&self) {
        self.crash.notify_one();
    }

    fn handle(&self, method: Method, path: &str, query: &str, body: String) -> (u16, String) {
        let mut state = self.state.lock();

        match (method, path) {
            (Method::GET, "/imposters") => {
                if let Some(status) = state.get_status {
                    let errors = json!({"errors": [{"code": "fake failure"}]});
                    return (status, errors.to_string());
                }
                if let Some(ref body) = state.get_body {
                    return (200, body.clone());
                }
                let remove_proxies = query.split('&').any(|p| p == "removeProxies=true");
                let imposters: Vec<Value> = if remove_proxies {
                    state.imposters.iter().map(without_proxies).collect()
                } else {
                    state.imposters.clone()
                };
                (200, json!({ "imposters": imposters }).to_string())
            }
            (Method::PUT, "/imposters") => {
                if let Some(status) = state.put_status {
                    let errors = json!({"errors": [{"code": "bad data"}]});
                    return (status, errors.to_string());
                }
                let doc: Value = match serde_json::from_str(&body) {
                    Ok(doc) => doc,
                    Err(e) => return (400, json!({"errors": [e.to_string()]}).to_string()),
                };
                let imposters = doc
                    .get("imposters")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                state.imposters = imposters.clone();
                (200, json!({ "imposters": imposters }).to_string())
            }
            (Method::POST, "/imposters") => {
                let mut imposter: Value = match serde_json::from_str(&body) {
                    Ok(doc) => doc,
                    Err(e) => return (400, json!({"errors": [e.to_string()]}).to_string()),
                };
                if imposter.get("port").is_none() {
                    imposter["port"] = json!(4545 + state.imposters.len() as u64);
                }
                state.imposters.push(imposter.clone());
                (201, imposter.to_string())
            }
            (Method::DELETE, "/imposters") => {
                let removed = std::mem::take(&mut state.imposters);
                (200, json!({ "imposters": removed }).to_string())
            }
            (Method::DELETE, p) if p.starts_with("/imposters/") => {
                let port: Option<u64> = p["/imposters/".len()..].parse().ok();
                let idx = state
                    .imposters
                    .iter()
                    .position(|i| i.get("port").and_then(Value::as_u64) == port);
                match idx {
                    Some(idx) => (200, state.imposters.remove(idx).to_string()),
                    None => (200, "{}".to_string()),
                }
            }
            _ => (404, json!({"errors": [{"code": "no such resource"}]}).to_string()),
        }
    }
}

/// Drop proxy responses, and stubs left with none.
fn without_proxies(imposter: &Value) -> Value {
    let mut imposter = imposter.clone();
    if let Some(stubs) = imposter.get_mut("stubs").and_then(Value::as_array_mut) {
        for stub in stubs.iter_mut() {
            if let Some(responses) = stub.get_mut("responses").and_then(Value::as_array_mut) {
                responses.retain(|r| r.get("proxy").is_none());
            }
        }
        stubs.retain(|stub| {
            stub.get("responses")
                .and_then(Value::as_array)
                .is_some_and(|r| !r.is_empty())
        });
    }
    imposter
}

async fn route(
    api: Arc<FakeApi>,
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let uri = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_default();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or_default().to_string();
    let connection = req
        .headers()
        .get(hyper::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body = match req.into_body().collect().await {
        Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).into_owned(),
        Err(_) => String::new(),
    };

    api.state.lock().requests.push(Recorded {
        method: method.clone(),
        uri,
        connection,
        body: body.clone(),
    });

    let (status, text) = api.handle(method, &path, &query, body);
    let response = Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(text)))
        .expect("valid response");
    Ok(response)
}

/// Bind `host:port` and serve `api` until crashed or aborted.
///
/// The returned task yields the exit code the fake server "exited" with.
pub async fn serve(api: Arc<FakeApi>, host: &str, port: u16) -> std::io::Result<JoinHandle<i32>> {
    let listener = TcpListener::bind((host, port)).await?;

    Ok(tokio::spawn(async move {
        loop {
            let (stream, _) = tokio::select! {
                _ = api.crash.notified() => return CRASH_CODE,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(_) => return 1,
                },
            };
            let io = TokioIo::new(stream);
            let api = Arc::clone(&api);

            tokio::spawn(async move {
                let service = service_fn(move |req| route(Arc::clone(&api), req));
                let _ = http1::Builder::new().serve_connection(io, service).await;
            });
        }
    }))
}

/// How a `FakeLauncher`'s server behaves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Behaviour {
    /// Bind the admin port and serve the fake API
    Serve,
    /// Exit with code 2 before binding anything
    ExitImmediately,
    /// Stay alive without ever binding the admin port
    NeverReady,
}

/// Launches `FakeApi` servers inside the test process.
pub struct FakeLauncher {
    api: Arc<FakeApi>,
    behaviour: Behaviour,
    launches: AtomicUsize,
}

impl FakeLauncher {
    pub fn new(api: Arc<FakeApi>) -> Arc<Self> {
        Arc::new(Self {
            api,
            behaviour: Behaviour::Serve,
            launches: AtomicUsize::new(0),
        })
    }

    pub fn exiting() -> Arc<Self> {
        Self::with_behaviour(Behaviour::ExitImmediately)
    }

    pub fn never_ready() -> Arc<Self> {
        Self::with_behaviour(Behaviour::NeverReady)
    }

    fn with_behaviour(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            api: FakeApi::new(),
            behaviour,
            launches: AtomicUsize::new(0),
        })
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServerLauncher for FakeLauncher {
    async fn launch(&self, options: &LaunchOptions) -> rift_ctl::Result<Box<dyn ServerHandle>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let task = match self.behaviour {
            Behaviour::Serve => serve(Arc::clone(&self.api), options.admin_host(), options.port)
                .await
                .map_err(|source| CtlError::Spawn {
                    program: "fake".to_string(),
                    source,
                })?,
            Behaviour::ExitImmediately => tokio::spawn(async { 2 }),
            Behaviour::NeverReady => tokio::spawn(std::future::pending::<i32>()),
        };
        Ok(Box::new(FakeHandle { task }))
    }
}

pub struct FakeHandle {
    task: JoinHandle<i32>,
}

#[async_trait]
impl ServerHandle for FakeHandle {
    fn id(&self) -> Option<u32> {
        None
    }

    fn try_exit(&mut self) -> rift_ctl::Result<Option<ServerExit>> {
        Ok(self.task.is_finished().then_some(ServerExit { code: None }))
    }

    async fn wait(&mut self) -> rift_ctl::Result<ServerExit> {
        let code = (&mut self.task).await.ok();
        Ok(ServerExit { code })
    }

    async fn terminate(&mut self) -> rift_ctl::Result<ServerExit> {
        self.task.abort();
        let _ = (&mut self.task).await;
        Ok(ServerExit { code: None })
    }
}

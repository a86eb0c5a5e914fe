//! save, replay and the imposter builder against the fake imposters API.

mod common;

use common::{free_port, options, serve, FakeApi, FakeLauncher, HOST};
use hyper::Method;
use rift_ctl::{ClientError, Commands, ConfigClient, CtlError, ImposterBuilder, ShutdownSignal};
use serde_json::{json, Value};
use std::fs;
use tempfile::TempDir;

fn recording_imposter() -> Value {
    json!({
        "port": 4545,
        "protocol": "http",
        "stubs": [
            {
                "predicates": [{"equals": {"path": "/orders"}}],
                "responses": [{"is": {"statusCode": 200, "body": "recorded"}}]
            },
            {
                "responses": [{"proxy": {"to": "http://upstream.example", "mode": "proxyOnce"}}]
            }
        ]
    })
}

#[tokio::test]
async fn test_save_writes_response_body_verbatim() {
    let dir = TempDir::new().unwrap();
    let port = free_port();
    let api = FakeApi::new();
    let body = "{\n    \"imposters\": [\n        {\"port\": 4545, \"protocol\": \"tcp\"}\n    ]\n}";
    api.serve_body(body);
    let server = serve(api.clone(), HOST, port).await.unwrap();

    let commands = Commands::new(options(dir.path(), port)).unwrap();
    let path = commands.save().await.unwrap();

    assert_eq!(path, dir.path().join("mb.json"));
    assert_eq!(fs::read_to_string(&path).unwrap(), body);
    let gets = api.requests_with(Method::GET);
    assert_eq!(gets.len(), 1);
    assert_eq!(gets[0].uri, "/imposters?replayable=true");
    assert_eq!(gets[0].connection.as_deref(), Some("close"));

    server.abort();
}

#[tokio::test]
async fn test_save_without_server_reports_connection_refused() {
    let dir = TempDir::new().unwrap();
    let port = free_port();

    let commands = Commands::new(options(dir.path(), port)).unwrap();
    let err = commands.save().await.unwrap_err();

    assert!(err.is_connection_refused(), "got {err:?}");
    assert_eq!(
        err.to_string(),
        format!("No mb process running on http://{HOST}:{port}")
    );
    assert!(!dir.path().join("mb.json").exists());
}

#[tokio::test]
async fn test_replay_without_server_reports_connection_refused() {
    let dir = TempDir::new().unwrap();
    let commands = Commands::new(options(dir.path(), free_port())).unwrap();

    let err = commands.replay().await.unwrap_err();
    assert!(err.is_connection_refused(), "got {err:?}");
}

#[tokio::test]
async fn test_replay_sends_nothing_when_fetch_fails() {
    let dir = TempDir::new().unwrap();
    let port = free_port();
    let api = FakeApi::with_imposters(vec![recording_imposter()]);
    api.fail_get(500);
    let server = serve(api.clone(), HOST, port).await.unwrap();

    let commands = Commands::new(options(dir.path(), port)).unwrap();
    let err = commands.replay().await.unwrap_err();

    match &err {
        CtlError::Client(ClientError::UnexpectedStatus { status, body }) => {
            assert_eq!(*status, 500);
            assert!(body.contains("fake failure"));
        }
        other => panic!("expected UnexpectedStatus, got {other:?}"),
    }
    assert!(err.to_string().starts_with("Received status code 500"));
    assert!(api.requests_with(Method::PUT).is_empty());
    assert_eq!(api.imposters(), vec![recording_imposter()]);

    server.abort();
}

#[tokio::test]
async fn test_replay_reloads_config_without_proxies() {
    let dir = TempDir::new().unwrap();
    let port = free_port();
    let api = FakeApi::with_imposters(vec![recording_imposter()]);
    let server = serve(api.clone(), HOST, port).await.unwrap();

    let commands = Commands::new(options(dir.path(), port)).unwrap();
    let resp = commands.replay().await.unwrap();
    assert!(resp.status.is_success());

    let gets = api.requests_with(Method::GET);
    assert_eq!(gets[0].uri, "/imposters?replayable=true&removeProxies=true");
    let puts = api.requests_with(Method::PUT);
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].uri, "/imposters");

    // The fetched document goes back untouched
    let sent: Value = serde_json::from_str(&puts[0].body).unwrap();
    let fetched = json!({
        "imposters": [{
            "port": 4545,
            "protocol": "http",
            "stubs": [{
                "predicates": [{"equals": {"path": "/orders"}}],
                "responses": [{"is": {"statusCode": 200, "body": "recorded"}}]
            }]
        }]
    });
    assert_eq!(sent, fetched);
    assert_eq!(api.imposters(), fetched["imposters"].as_array().unwrap().clone());

    server.abort();
}

#[tokio::test]
async fn test_saved_config_starts_an_identical_server() {
    let dir = TempDir::new().unwrap();
    let port = free_port();
    let original = vec![
        recording_imposter(),
        json!({"port": 4546, "protocol": "tcp", "stubs": []}),
    ];
    let api = FakeApi::with_imposters(original.clone());
    let server = serve(api, HOST, port).await.unwrap();

    let commands = Commands::new(options(dir.path(), port)).unwrap();
    let saved = commands.save().await.unwrap();
    server.abort();
    let _ = server.await;

    let mut opts = options(dir.path(), free_port());
    opts.configfile = Some(saved);
    let fresh = FakeApi::new();
    let commands = Commands::with_launcher(opts, FakeLauncher::new(fresh.clone())).unwrap();
    let (signal, _trigger) = ShutdownSignal::manual();
    let running = commands.start_with_shutdown(signal).await.unwrap();

    assert_eq!(fresh.imposters(), original);

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_builder_creates_and_destroys_imposter() {
    let port = free_port();
    let api = FakeApi::new();
    let server = serve(api.clone(), HOST, port).await.unwrap();
    let client = ConfigClient::new(HOST, port).unwrap();

    let mut imposter = ImposterBuilder::new(json!({"protocol": "http", "name": "orders"}))
        .with_stub()
        .matching_request(json!({"equals": {"method": "GET", "path": "/orders"}}))
        .responding_with(json!({"statusCode": 200, "body": []}))
        .build();
    assert_eq!(imposter.port(), None);

    let created = imposter.create(&client).await.unwrap();
    assert_eq!(created["name"], "orders");
    assert_eq!(imposter.port(), Some(4545));
    assert_eq!(api.imposters().len(), 1);
    assert_eq!(
        api.imposters()[0]["stubs"][0]["responses"][0]["is"]["statusCode"],
        200
    );

    let removed = imposter.destroy(&client).await.unwrap().unwrap();
    assert_eq!(removed["port"], 4545);
    assert!(api.imposters().is_empty());

    server.abort();
}

#[tokio::test]
async fn test_builder_destroy_all_clears_every_imposter() {
    let port = free_port();
    let api = FakeApi::with_imposters(vec![recording_imposter()]);
    let server = serve(api.clone(), HOST, port).await.unwrap();
    let client = ConfigClient::new(HOST, port).unwrap();

    let imposter = ImposterBuilder::new(json!({"port": 4546, "protocol": "tcp"}))
        .with_stub()
        .responding_with(json!({"data": "pong"}))
        .create(&client)
        .await
        .unwrap();
    assert_eq!(api.imposters().len(), 2);

    let removed = imposter.destroy_all(&client).await.unwrap();

    assert_eq!(removed["imposters"].as_array().unwrap().len(), 2);
    assert!(api.imposters().is_empty());

    server.abort();
}

#[tokio::test]
async fn test_delete_all_clears_server() {
    let port = free_port();
    let api = FakeApi::with_imposters(vec![recording_imposter()]);
    let server = serve(api.clone(), HOST, port).await.unwrap();
    let client = ConfigClient::new(HOST, port).unwrap();

    let removed = client.delete_all().await.unwrap();

    assert_eq!(removed["imposters"][0]["port"], 4545);
    assert!(api.imposters().is_empty());

    server.abort();
}

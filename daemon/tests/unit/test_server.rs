//! Dashboard API tests

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tower::ServiceExt;

use plugsync::app::state::{AppState, RuntimeOptions};
use plugsync::deploy::git::Vcs;
use plugsync::server::serve::router;
use plugsync::server::state::ServerState;
use plugsync::storage::config_file::ConfigFile;

use crate::fixtures::Fixture;
use crate::mock_vcs::MockVcs;

struct Dashboard {
    fx: Fixture,
    app: Arc<AppState>,
    router: Router,
}

fn dashboard() -> Dashboard {
    let fx = Fixture::new();
    let app = Arc::new(AppState::new(
        fx.settings(json!({})),
        ConfigFile::new(fx.root().join("plugsync.json")),
        Arc::new(MockVcs::new("aaa", "aaa")) as Arc<dyn Vcs>,
        None,
        RuntimeOptions::default(),
    ));
    let (shutdown_tx, _) = broadcast::channel(1);
    let router = router(Arc::new(ServerState::new(app.clone(), shutdown_tx)));
    Dashboard { fx, app, router }
}

impl Dashboard {
    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.send(request).await
    }

    async fn post(&self, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }
}

#[tokio::test]
async fn test_health() {
    let d = dashboard();
    let (status, body) = d.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "plugsync");
}

#[tokio::test]
async fn test_status_reflects_controller() {
    let d = dashboard();

    let (status, body) = d.get("/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["paused"], false);
    assert_eq!(body["dry_run"], false);
    assert_eq!(body["servers"][0]["name"], "main");
    assert_eq!(body["servers"][0]["last_status"], "UNKNOWN");
    assert!(body["config_path"].as_str().unwrap().ends_with("plugsync.json"));

    let (_, body) = d.post("/api/pause", "").await;
    assert_eq!(body["ok"], true);
    assert_eq!(d.get("/api/status").await.1["paused"], true);

    d.post("/api/resume", "").await;
    assert_eq!(d.get("/api/status").await.1["paused"], false);
}

#[tokio::test]
async fn test_run_once_sets_request() {
    let d = dashboard();
    let (status, body) = d.post("/api/run-once", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));
    assert!(d.app.controller().run_once_pending());
}

#[tokio::test]
async fn test_dry_run_toggle() {
    let d = dashboard();

    let (status, body) = d.post("/api/dry-run", r#"{"enabled": true}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true, "dry_run": true }));
    assert!(d.app.controller().dry_run());

    let (_, body) = d.post("/api/dry-run", "{}").await;
    assert_eq!(body["dry_run"], false);
    assert!(!d.app.controller().dry_run());

    let (status, body) = d.post("/api/dry-run", "not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], false);
}

#[tokio::test]
async fn test_validate() {
    let d = dashboard();

    let valid = d.fx.document(json!({})).to_string();
    let (status, body) = d.post("/api/validate", &valid).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true, "errors": [] }));

    let (status, body) = d.post("/api/validate", r#"{"IntervalSeconds": 0}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], false);
    assert!(body["errors"].as_array().unwrap().len() >= 3);

    let (status, body) = d.post("/api/validate", "{").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], false);
}

#[tokio::test]
async fn test_config_save_rejects_invalid_document() {
    let d = dashboard();
    let (status, body) = d.post("/api/config/save", r#"{"Servers": []}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], false);
    assert!(!body["errors"].as_array().unwrap().is_empty());
    assert!(!d.app.config_file().exists().await);
}

#[tokio::test]
async fn test_config_save_restarts_with_flags() {
    let d = dashboard();
    d.app.start().await;
    d.post("/api/pause", "").await;
    d.post("/api/dry-run", r#"{"enabled": true}"#).await;

    let document = d.fx.document(json!({ "IntervalSeconds": 30 }));
    let (status, body) = d.post("/api/config/save", &document.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));

    let (_, stored) = d.get("/api/config").await;
    assert_eq!(stored, document);
    assert_eq!(d.app.settings().interval_seconds, 30);

    let (_, status_body) = d.get("/api/status").await;
    assert_eq!(status_body["paused"], true);
    assert_eq!(status_body["dry_run"], true);
    d.app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_history_starts_empty() {
    let d = dashboard();
    let (status, body) = d.get("/api/history").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "items": [] }));
}

#[tokio::test]
async fn test_logs_are_filtered() {
    let d = dashboard();
    let log_path = d.fx.log_path();
    fs::create_dir_all(log_path.parent().unwrap()).unwrap();
    fs::write(
        &log_path,
        "t1  INFO plugsync: [main] No commit diff, verifying hashes\n\
         t2 ERROR plugsync: [main] ERROR code=2 git fetch failed\n\
         t3 ERROR plugsync: [other] ERROR code=1 missing paths\n\
         t4  INFO plugsync: [other] Deployed commit bbb\n",
    )
    .unwrap();

    let (status, body) = d.get("/api/logs?level=error&server=main").await;
    assert_eq!(status, StatusCode::OK);
    let lines = body["lines"].as_array().unwrap();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].as_str().unwrap().starts_with("t2"));

    let (_, body) = d.get("/api/logs?tail=2").await;
    let lines = body["lines"].as_array().unwrap();
    assert_eq!(lines.len(), 2);
    assert!(lines[1].as_str().unwrap().starts_with("t4"));
}

#[tokio::test]
async fn test_logs_missing_file_is_empty() {
    let d = dashboard();
    let (status, body) = d.get("/api/logs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "lines": [] }));
}

#[tokio::test]
async fn test_log_stream_follows_appended_lines() {
    let d = dashboard();
    let log_path = d.fx.log_path();
    fs::create_dir_all(log_path.parent().unwrap()).unwrap();
    fs::write(&log_path, "t1  INFO plugsync: [main] first\n").unwrap();

    let request = Request::builder()
        .uri("/api/logs/stream?server=main")
        .body(Body::empty())
        .unwrap();
    let response = d.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let mut events = response.into_body().into_data_stream();

    let first = events.next().await.unwrap().unwrap();
    assert!(String::from_utf8_lossy(&first).contains("[main] first"));

    let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
    writeln!(file, "t2  INFO plugsync: [other] not for this stream").unwrap();
    writeln!(file, "t3  INFO plugsync: [main] second").unwrap();

    let next = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let next = String::from_utf8_lossy(&next);
    assert!(next.contains("[main] second"));
    assert!(!next.contains("[other]"));
}

//! Engine generation and hot restart tests

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use plugsync::app::state::{AppState, RuntimeOptions};
use plugsync::deploy::git::Vcs;
use plugsync::errors::DaemonError;
use plugsync::logs::{build_subscriber, LogOptions};
use plugsync::storage::config_file::ConfigFile;

use crate::fixtures::Fixture;
use crate::mock_vcs::MockVcs;

fn app_state(fx: &Fixture, vcs: Arc<MockVcs>, options: RuntimeOptions) -> AppState {
    AppState::new(
        fx.settings(json!({})),
        ConfigFile::new(fx.root().join("plugsync.json")),
        vcs as Arc<dyn Vcs>,
        None,
        options,
    )
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_restart_carries_pause_and_dry_run() {
    let fx = Fixture::new();
    let vcs = Arc::new(MockVcs::new("aaa", "aaa"));
    let app = app_state(&fx, vcs, RuntimeOptions::default());
    app.start().await;
    assert!(app.is_running());

    let old_controller = app.controller();
    old_controller.pause();
    old_controller.set_dry_run(true);

    let new_settings = fx.settings(json!({
        "IntervalSeconds": 300,
        "Servers": [fx.server("main"), fx.server("second")],
    }));
    assert_ok!(app.restart(new_settings).await);

    let controller = app.controller();
    assert!(!Arc::ptr_eq(&controller, &old_controller));
    assert!(controller.is_paused());
    assert!(controller.dry_run());
    assert!(!controller.run_once_pending());

    assert_eq!(app.settings().interval_seconds, 300);
    assert_eq!(app.snapshot().servers.len(), 2);
    assert!(app.is_running());

    assert_ok!(app.shutdown().await);
    assert!(!app.is_running());
}

#[tokio::test]
async fn test_forced_dry_run_survives_restart() {
    let fx = Fixture::new();
    let options = RuntimeOptions {
        force_dry_run: true,
        ..Default::default()
    };
    let app = app_state(&fx, Arc::new(MockVcs::new("aaa", "aaa")), options);
    assert!(app.settings().dry_run);

    app.restart(fx.settings(json!({ "DryRun": false }))).await.unwrap();
    assert!(app.settings().dry_run);
    assert_ok!(app.shutdown().await);
}

#[tokio::test]
async fn test_restart_aborts_a_stuck_loop() {
    let fx = Fixture::new();
    let vcs = Arc::new(MockVcs::new("aaa", "aaa").hanging_fetches());
    let options = RuntimeOptions {
        restart_join_timeout: Duration::from_millis(200),
        ..Default::default()
    };
    let app = app_state(&fx, vcs.clone(), options);
    app.start().await;

    // Startup delay is one second, then the first fetch never returns
    wait_for(|| vcs.in_flight() == 1).await;

    app.restart(fx.settings(json!({}))).await.unwrap();
    assert_eq!(vcs.in_flight(), 0);

    wait_for(|| vcs.count("fetch") == 2).await;
    assert_eq!(vcs.in_flight(), 1);
}

#[tokio::test]
async fn test_pause_and_dry_run_set_while_joining_are_kept() {
    let fx = Fixture::new();
    let vcs = Arc::new(MockVcs::new("aaa", "aaa").hanging_fetches());
    let options = RuntimeOptions {
        restart_join_timeout: Duration::from_secs(1),
        ..Default::default()
    };
    let app = Arc::new(app_state(&fx, vcs.clone(), options));
    app.start().await;
    wait_for(|| vcs.in_flight() == 1).await;

    let restarting = tokio::spawn({
        let app = app.clone();
        let settings = fx.settings(json!({}));
        async move { app.restart(settings).await }
    });

    // The old loop is still being joined
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!restarting.is_finished());
    app.controller().pause();
    app.controller().set_dry_run(true);

    assert_ok!(restarting.await.unwrap());
    let controller = app.controller();
    assert!(controller.is_paused());
    assert!(controller.dry_run());
    assert_ok!(app.shutdown().await);
}

#[tokio::test]
async fn test_unusable_log_path_keeps_the_loop_running() {
    let fx = Fixture::new();
    let (_subscriber, logs) = build_subscriber(&LogOptions {
        stdout: false,
        ..Default::default()
    });
    let logs = Arc::new(logs);
    logs.redirect(&fx.log_path()).unwrap();

    let app = AppState::new(
        fx.settings(json!({})),
        ConfigFile::new(fx.root().join("plugsync.json")),
        Arc::new(MockVcs::new("aaa", "aaa")) as Arc<dyn Vcs>,
        Some(logs.clone()),
        RuntimeOptions::default(),
    );
    app.start().await;

    let blocker = fx.root().join("blocker");
    fs::write(&blocker, "a file, not a directory").unwrap();
    let settings = fx.settings(json!({
        "LogPath": blocker.join("deploy.log"),
        "IntervalSeconds": 60,
    }));

    assert_ok!(app.restart(settings).await);
    assert!(app.is_running());
    assert_eq!(app.settings().interval_seconds, 60);
    assert_eq!(logs.log_path(), Some(fx.log_path()));
    assert_ok!(app.shutdown().await);
}

#[tokio::test]
async fn test_apply_config_persists_then_restarts() {
    let fx = Fixture::new();
    let app = app_state(&fx, Arc::new(MockVcs::new("aaa", "aaa")), RuntimeOptions::default());
    app.start().await;

    let document = fx.document(json!({ "IntervalSeconds": 45 }));
    app.apply_config(&document).await.unwrap();

    assert_eq!(app.config_file().read_value().await.unwrap(), document);
    assert_eq!(app.settings().interval_seconds, 45);
    assert_ok!(app.shutdown().await);
}

#[tokio::test]
async fn test_apply_invalid_config_changes_nothing() {
    let fx = Fixture::new();
    let app = app_state(&fx, Arc::new(MockVcs::new("aaa", "aaa")), RuntimeOptions::default());

    let err = assert_err!(app.apply_config(&json!({ "Servers": [] })).await);
    assert!(matches!(err, DaemonError::ConfigError(ref errors) if errors.len() == 2));
    assert!(!app.config_file().exists().await);
    assert_eq!(app.settings().interval_seconds, 120);
}

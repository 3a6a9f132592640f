//! HTTP request handlers

use std::collections::VecDeque;
use std::convert::Infallible;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::errors::DaemonError;
use crate::logs::{matches_filter, read_appended, tail_lines};
use crate::runtime::state::{DeploymentRecord, ServerStatus};
use crate::server::state::ServerState;
use crate::storage::settings::validate_config;
use crate::utils::version_info;

/// Lines returned when `tail` is not given
pub const DEFAULT_TAIL: usize = 200;

/// How often the log stream looks for new lines
pub const LOG_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "plugsync".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// `{ok: false, errors}` with the given status
fn rejected(status: StatusCode, errors: Vec<String>) -> Response {
    (status, Json(ValidateResponse { ok: false, errors })).into_response()
}

fn parse_body(body: &Bytes) -> Result<Value, Response> {
    serde_json::from_slice(body).map_err(|e| rejected(StatusCode::BAD_REQUEST, vec![e.to_string()]))
}

// ================================== STATUS ======================================= //

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub paused: bool,
    pub dry_run: bool,
    pub config_path: String,
    pub servers: Vec<ServerStatus>,
}

/// Controller flags and every server's last known status
pub async fn status_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let controller = state.app.controller();
    let snapshot = state.app.snapshot();
    Json(StatusResponse {
        paused: controller.is_paused(),
        dry_run: controller.dry_run(),
        config_path: state.app.config_file().path().display().to_string(),
        servers: snapshot.servers,
    })
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub items: Vec<DeploymentRecord>,
}

pub async fn history_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(HistoryResponse {
        items: state.app.snapshot().history,
    })
}

// ================================== CONTROL ====================================== //

pub async fn pause_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    state.app.controller().pause();
    info!("Paused from dashboard");
    Json(OkResponse { ok: true })
}

pub async fn resume_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    state.app.controller().resume();
    info!("Resumed from dashboard");
    Json(OkResponse { ok: true })
}

pub async fn run_once_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    state.app.controller().request_run_once();
    info!("Run-once requested from dashboard");
    Json(OkResponse { ok: true })
}

#[derive(Debug, Serialize)]
pub struct DryRunResponse {
    pub ok: bool,
    pub dry_run: bool,
}

/// Set the dry-run override from `{"enabled": bool}`; a missing flag disables it
pub async fn dry_run_handler(State(state): State<Arc<ServerState>>, body: Bytes) -> Response {
    let value = match parse_body(&body) {
        Ok(value) => value,
        Err(response) => return response,
    };
    let enabled = value.get("enabled").and_then(Value::as_bool).unwrap_or(false);
    state.app.controller().set_dry_run(enabled);
    info!("Dry-run override set to {}", enabled);
    Json(DryRunResponse {
        ok: true,
        dry_run: enabled,
    })
    .into_response()
}

// ================================== CONFIG ======================================= //

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub ok: bool,
    pub errors: Vec<String>,
}

/// The configuration file as stored on disk
pub async fn config_handler(State(state): State<Arc<ServerState>>) -> Response {
    match state.app.config_file().read_value().await {
        Ok(value) => Json(value).into_response(),
        Err(e) => rejected(StatusCode::INTERNAL_SERVER_ERROR, vec![e.to_string()]),
    }
}

pub async fn validate_handler(body: Bytes) -> Response {
    let value = match parse_body(&body) {
        Ok(value) => value,
        Err(response) => return response,
    };
    let errors = validate_config(&value);
    Json(ValidateResponse {
        ok: errors.is_empty(),
        errors,
    })
    .into_response()
}

/// Validate, persist and hot-restart on the submitted configuration
pub async fn save_config_handler(State(state): State<Arc<ServerState>>, body: Bytes) -> Response {
    let value = match parse_body(&body) {
        Ok(value) => value,
        Err(response) => return response,
    };
    let errors = validate_config(&value);
    if !errors.is_empty() {
        return rejected(StatusCode::BAD_REQUEST, errors);
    }

    match state.app.apply_config(&value).await {
        Ok(()) => Json(OkResponse { ok: true }).into_response(),
        Err(DaemonError::ConfigError(errors)) => rejected(StatusCode::BAD_REQUEST, errors),
        Err(e) => {
            warn!("Unable to apply configuration: {}", e);
            rejected(StatusCode::INTERNAL_SERVER_ERROR, vec![e.to_string()])
        }
    }
}

// =================================== LOGS ======================================== //

#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    pub level: Option<String>,
    pub server: Option<String>,
    pub tail: Option<usize>,
}

impl LogQuery {
    fn matches(&self, line: &str) -> bool {
        matches_filter(line, self.level.as_deref(), self.server.as_deref())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogsResponse {
    pub lines: Vec<String>,
}

async fn filtered_tail(log_path: PathBuf, query: &LogQuery) -> Result<Vec<String>, DaemonError> {
    let tail = query.tail.unwrap_or(DEFAULT_TAIL);
    let lines = tokio::task::spawn_blocking(move || tail_lines(&log_path, tail))
        .await
        .map_err(|e| DaemonError::Internal(e.to_string()))??;
    Ok(lines.into_iter().filter(|l| query.matches(l)).collect())
}

/// Last `tail` lines of the log file, filtered by level and server
pub async fn logs_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<LogQuery>,
) -> Response {
    let log_path = state.app.settings().log_path.clone();
    match filtered_tail(log_path, &query).await {
        Ok(lines) => Json(LogsResponse { lines }).into_response(),
        Err(e) => rejected(StatusCode::INTERNAL_SERVER_ERROR, vec![e.to_string()]),
    }
}

struct Follow {
    shutdown_rx: broadcast::Receiver<()>,
    path: PathBuf,
    offset: u64,
    pending: VecDeque<String>,
    query: LogQuery,
}

/// Server-sent events: the filtered tail, then lines as they are appended
pub async fn logs_stream_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<LogQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let path = state.app.settings().log_path.clone();
    let offset = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
    let pending = filtered_tail(path.clone(), &query).await.unwrap_or_else(|e| {
        warn!("Unable to read log tail: {}", e);
        Vec::new()
    });

    let follow = Follow {
        shutdown_rx: state.shutdown_tx.subscribe(),
        path,
        offset,
        pending: pending.into(),
        query,
    };

    let stream = futures::stream::unfold(follow, |mut follow| async move {
        loop {
            if let Some(line) = follow.pending.pop_front() {
                return Some((Ok::<Event, Infallible>(Event::default().data(line)), follow));
            }
            tokio::select! {
                _ = follow.shutdown_rx.recv() => return None,
                _ = tokio::time::sleep(LOG_POLL_INTERVAL) => {}
            }

            let (path, offset) = (follow.path.clone(), follow.offset);
            let appended = tokio::task::spawn_blocking(move || read_appended(&path, offset))
                .await
                .map_err(|e| io::Error::other(e.to_string()))
                .and_then(|r| r);
            match appended {
                Ok((lines, offset)) => {
                    follow.offset = offset;
                    let query = &follow.query;
                    let matched: Vec<String> = lines.into_iter().filter(|l| query.matches(l)).collect();
                    follow.pending.extend(matched);
                }
                Err(e) => {
                    warn!("Log stream stopped: {}", e);
                    return None;
                }
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::DaemonError;
use crate::server::handlers::{
    config_handler, dry_run_handler, health_handler, history_handler, logs_handler,
    logs_stream_handler, pause_handler, resume_handler, run_once_handler, save_config_handler,
    status_handler, validate_handler, version_handler,
};
use crate::server::state::ServerState;

/// Dashboard API routes
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Status
        .route("/api/status", get(status_handler))
        .route("/api/history", get(history_handler))
        // Control
        .route("/api/pause", post(pause_handler))
        .route("/api/resume", post(resume_handler))
        .route("/api/run-once", post(run_once_handler))
        .route("/api/dry-run", post(dry_run_handler))
        // Configuration
        .route("/api/config", get(config_handler))
        .route("/api/validate", post(validate_handler))
        .route("/api/config/save", post(save_config_handler))
        // Logs
        .route("/api/logs", get(logs_handler))
        .route("/api/logs/stream", get(logs_stream_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), DaemonError>>, DaemonError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting dashboard on http://{}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| DaemonError::ServerError(format!("unable to bind {addr}: {e}")))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| DaemonError::ServerError(e.to_string()))
    });

    Ok(handle)
}

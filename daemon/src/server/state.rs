//! Server state

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::app::state::AppState;

/// Server state shared across handlers
pub struct ServerState {
    pub app: Arc<AppState>,

    /// Ends long-lived responses such as the log stream
    pub shutdown_tx: broadcast::Sender<()>,
}

impl ServerState {
    pub fn new(app: Arc<AppState>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self { app, shutdown_tx }
    }
}

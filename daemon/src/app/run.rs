//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::{AppState, RuntimeOptions};
use crate::deploy::git::Vcs;
use crate::errors::DaemonError;
use crate::logs::LogHandle;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::storage::config_file::ConfigFile;
use crate::storage::settings::Settings;

/// Run the daemon until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    settings: Settings,
    vcs: Arc<dyn Vcs>,
    logs: Option<Arc<LogHandle>>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), DaemonError> {
    info!(
        "Initializing sync daemon ({} server(s), web={})...",
        settings.servers.len(),
        options.enable_web
    );

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, settings, vcs, logs, &shutdown_tx, &mut shutdown_manager).await {
        error!("Failed to start daemon: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    settings: Settings,
    vcs: Arc<dyn Vcs>,
    logs: Option<Arc<LogHandle>>,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), DaemonError> {
    let runtime_options = RuntimeOptions {
        restart_join_timeout: options.lifecycle.restart_join_timeout,
        force_dry_run: options.force_dry_run,
        ..Default::default()
    };
    let app_state = Arc::new(AppState::new(
        settings,
        ConfigFile::new(&options.config_path),
        vcs,
        logs,
        runtime_options,
    ));
    app_state.start().await;
    shutdown_manager.with_app_state(app_state.clone())?;

    if options.enable_web {
        init_dashboard(options, app_state, shutdown_manager, shutdown_tx.clone()).await?;
    }
    Ok(())
}

async fn init_dashboard(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    info!("Initializing dashboard server...");

    let mut shutdown_rx = shutdown_tx.subscribe();
    let server_state = Arc::new(ServerState::new(app_state, shutdown_tx));
    let server_handle = serve(&options.server, server_state, async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_dashboard_handle(server_handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    dashboard_handle: Option<JoinHandle<Result<(), DaemonError>>>,
}

impl ShutdownManager {
    fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            dashboard_handle: None,
        }
    }

    fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), DaemonError> {
        if self.app_state.is_some() {
            return Err(DaemonError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    fn with_dashboard_handle(
        &mut self,
        handle: JoinHandle<Result<(), DaemonError>>,
    ) -> Result<(), DaemonError> {
        if self.dashboard_handle.is_some() {
            return Err(DaemonError::ShutdownError("dashboard_handle already set".to_string()));
        }
        self.dashboard_handle = Some(handle);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), DaemonError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), DaemonError> {
        info!("Shutting down sync daemon...");

        // 1. Dashboard, so no restart can start a new loop
        if let Some(handle) = self.dashboard_handle.take() {
            handle
                .await
                .map_err(|e| DaemonError::ShutdownError(e.to_string()))??;
        }

        // 2. Scheduler loop; an in-flight cycle finishes first
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}

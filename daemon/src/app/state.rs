//! Application state: the running engine generation and its hot restart

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::deploy::engine::Engine;
use crate::deploy::git::Vcs;
use crate::errors::DaemonError;
use crate::logs::LogHandle;
use crate::runtime::controller::{Controller, ControllerFlags};
use crate::runtime::state::{RuntimeState, Snapshot};
use crate::storage::config_file::ConfigFile;
use crate::storage::settings::Settings;
use crate::workers::scheduler;

/// Knobs for building and replacing generations
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// How long a restart waits for the previous loop before aborting it
    pub restart_join_timeout: Duration,

    /// Scheduler timings that do not come from the settings file
    pub pause_poll: Duration,
    pub after_run_once: Duration,

    /// Dry-run forced from the command line, kept across restarts
    pub force_dry_run: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        let scheduler = scheduler::Options::default();
        Self {
            restart_join_timeout: Duration::from_secs(5),
            pause_poll: scheduler.pause_poll,
            after_run_once: scheduler.after_run_once,
            force_dry_run: false,
        }
    }
}

/// Settings, state and controller of one scheduler loop
struct Generation {
    settings: Arc<Settings>,
    state: Arc<RuntimeState>,
    controller: Arc<Controller>,
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Generation {
    fn new(settings: Settings, flags: ControllerFlags) -> Self {
        let state = RuntimeState::new(&settings.server_names());
        Self {
            settings: Arc::new(settings),
            state: Arc::new(state),
            controller: Arc::new(Controller::with_flags(flags)),
            stop_tx: None,
            handle: None,
        }
    }
}

/// Owns the current engine generation. Handlers read it through short
/// lock-guarded accessors; restarts are serialised by `restart_lock`.
pub struct AppState {
    config_file: ConfigFile,
    vcs: Arc<dyn Vcs>,
    logs: Option<Arc<LogHandle>>,
    options: RuntimeOptions,
    current: RwLock<Generation>,
    restart_lock: Mutex<()>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        config_file: ConfigFile,
        vcs: Arc<dyn Vcs>,
        logs: Option<Arc<LogHandle>>,
        options: RuntimeOptions,
    ) -> Self {
        let settings = apply_overrides(settings, &options);
        Self {
            config_file,
            vcs,
            logs,
            options,
            current: RwLock::new(Generation::new(settings, ControllerFlags::default())),
            restart_lock: Mutex::new(()),
        }
    }

    /// Start the scheduler loop of the current generation
    pub async fn start(&self) {
        let _guard = self.restart_lock.lock().await;
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        if current.handle.is_some() {
            return;
        }
        let (stop_tx, handle) = self.spawn(&current);
        current.stop_tx = Some(stop_tx);
        current.handle = Some(handle);
    }

    pub fn config_file(&self) -> &ConfigFile {
        &self.config_file
    }

    pub fn snapshot(&self) -> Snapshot {
        self.read(|g| g.state.snapshot())
    }

    pub fn controller(&self) -> Arc<Controller> {
        self.read(|g| g.controller.clone())
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.read(|g| g.settings.clone())
    }

    /// Validate `value`, persist it, then restart on the new settings
    pub async fn apply_config(&self, value: &Value) -> Result<(), DaemonError> {
        let settings = Settings::from_value(value)?;
        self.config_file.save(value).await?;
        info!("Configuration saved to {}", self.config_file.path().display());
        self.restart(settings).await
    }

    /// Replace the running generation. Pause and dry-run flags carry over;
    /// the old loop is gone before the new one starts.
    pub async fn restart(&self, new_settings: Settings) -> Result<(), DaemonError> {
        let _guard = self.restart_lock.lock().await;
        info!("Restarting engine with new settings...");

        let (stop_tx, handle) = {
            let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
            (current.stop_tx.take(), current.handle.take())
        };
        self.join_previous(stop_tx, handle).await;

        let new_settings = apply_overrides(new_settings, &self.options);
        if let Some(logs) = &self.logs {
            if logs.log_path().as_deref() != Some(new_settings.log_path.as_path()) {
                if let Err(e) = logs.redirect(&new_settings.log_path) {
                    error!(
                        "Unable to log to {}, keeping the previous log file: {}",
                        new_settings.log_path.display(),
                        e
                    );
                }
            }
        }

        // Handlers keep reaching the old controller until the swap, so its
        // flags are read under the same write lock
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        let flags = current.controller.flags();
        let mut generation = Generation::new(new_settings, flags);
        let (stop_tx, handle) = self.spawn(&generation);
        generation.stop_tx = Some(stop_tx);
        generation.handle = Some(handle);
        *current = generation;
        drop(current);

        info!("Engine restarted (paused={}, dry_run={})", flags.paused, flags.dry_run);
        Ok(())
    }

    /// Stop the scheduler loop and wait for it
    pub async fn shutdown(&self) -> Result<(), DaemonError> {
        let _guard = self.restart_lock.lock().await;
        info!("Shutting down engine...");
        let (stop_tx, handle) = {
            let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
            (current.stop_tx.take(), current.handle.take())
        };
        if let Some(tx) = stop_tx {
            let _ = tx.send(());
        }
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| DaemonError::ShutdownError(e.to_string()))?;
        }
        Ok(())
    }

    /// Whether a scheduler loop is currently attached
    pub fn is_running(&self) -> bool {
        self.read(|g| g.handle.as_ref().is_some_and(|h| !h.is_finished()))
    }

    fn read<T>(&self, f: impl FnOnce(&Generation) -> T) -> T {
        let current = self.current.read().unwrap_or_else(|e| e.into_inner());
        f(&current)
    }

    fn spawn(&self, generation: &Generation) -> (oneshot::Sender<()>, JoinHandle<()>) {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let engine = Engine::new(
            generation.settings.clone(),
            generation.state.clone(),
            generation.controller.clone(),
            self.vcs.clone(),
        );
        let controller = generation.controller.clone();
        let options = scheduler::Options {
            pause_poll: self.options.pause_poll,
            after_run_once: self.options.after_run_once,
            ..scheduler::Options::from_settings(&generation.settings)
        };

        let handle = tokio::spawn(async move {
            info!("START");
            scheduler::run(
                &options,
                &engine,
                controller.as_ref(),
                tokio::time::sleep,
                Box::pin(async move {
                    let _ = stop_rx.await;
                }),
            )
            .await;
        });
        (stop_tx, handle)
    }

    async fn join_previous(&self, stop_tx: Option<oneshot::Sender<()>>, handle: Option<JoinHandle<()>>) {
        if let Some(tx) = stop_tx {
            let _ = tx.send(());
        }
        let Some(mut handle) = handle else {
            return;
        };

        let timeout = self.options.restart_join_timeout;
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Previous scheduler loop failed: {}", e),
            Err(_) => {
                warn!(
                    "Previous scheduler loop still running after {:?}, aborting it",
                    timeout
                );
                handle.abort();
                let _ = handle.await;
            }
        }
    }
}

fn apply_overrides(settings: Settings, options: &RuntimeOptions) -> Settings {
    if options.force_dry_run {
        settings.with_dry_run()
    } else {
        settings
    }
}

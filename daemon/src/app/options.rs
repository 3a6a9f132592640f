//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Configuration file the daemon was started from
    pub config_path: PathBuf,

    /// Serve the dashboard API alongside the scheduler
    pub enable_web: bool,

    /// Force dry-run regardless of the settings file
    pub force_dry_run: bool,

    /// Dashboard server configuration
    pub server: ServerOptions,

    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config.json"),
            enable_web: false,
            force_dry_run: false,
            server: ServerOptions::default(),
            lifecycle: LifecycleOptions::default(),
        }
    }
}

/// Lifecycle options for the daemon
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,

    /// How long a restart waits for the previous scheduler loop
    pub restart_join_timeout: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
            restart_join_timeout: Duration::from_secs(5),
        }
    }
}

/// Dashboard HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
        }
    }
}

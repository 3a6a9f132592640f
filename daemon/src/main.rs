//! plugsync - Entry Point
//!
//! Keeps game server plugin and config directories in sync with a git
//! repository, optionally serving a small dashboard API.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;
use tracing::{error, info};

use plugsync::app::options::{AppOptions, ServerOptions};
use plugsync::app::run::run;
use plugsync::deploy::git::GitCli;
use plugsync::errors::{DaemonError, EXIT_CONFIG, EXIT_ENV};
use plugsync::logs::{init_logging, LogOptions};
use plugsync::storage::config_file::ConfigFile;
use plugsync::utils::version_info;

const DEFAULT_CONFIG_PATH: &str = "plugsync.json";

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{json}"),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    // Load the configuration, writing a sample on first run
    let config_path = cli_args
        .get("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config_file = ConfigFile::new(&config_path);

    if !config_file.exists().await {
        if let Err(e) = config_file.write_sample().await {
            fatal(&format!("unable to write sample config: {e}"));
            std::process::exit(EXIT_ENV);
        }
        eprintln!(
            "{} {}",
            "Config not found.".yellow().bold(),
            format!(
                "A sample was written to {}; edit it and start again.",
                config_path.display()
            )
        );
        std::process::exit(EXIT_ENV);
    }

    let settings = match config_file.load_settings().await {
        Ok(settings) => settings,
        Err(e) => {
            report_config_error(&config_path, &e);
            let code = match e {
                DaemonError::IoError(_) => EXIT_ENV,
                _ => EXIT_CONFIG,
            };
            std::process::exit(code);
        }
    };

    if cli_args.contains_key("check-config") {
        println!(
            "{} {} ({} server(s))",
            "OK".green().bold(),
            config_path.display(),
            settings.servers.len()
        );
        return;
    }

    // The git executable is required before anything starts
    let git = GitCli::default();
    if let Err(e) = git.check_available().await {
        fatal(&e.to_string());
        std::process::exit(e.code());
    }

    // Initialize logging
    let log_options = LogOptions {
        log_path: Some(settings.log_path.clone()),
        ..Default::default()
    };
    let logs = match init_logging(log_options) {
        Ok(handle) => Some(Arc::new(handle)),
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let server = match server_options(&cli_args) {
        Ok(server) => server,
        Err(e) => {
            fatal(&e.to_string());
            std::process::exit(e.code());
        }
    };

    let options = AppOptions {
        config_path,
        enable_web: cli_args.contains_key("web"),
        force_dry_run: cli_args.contains_key("dry-run"),
        server,
        ..Default::default()
    };

    info!("Running plugsync {} with options: {:?}", version.version, options);
    let result = run(options, settings, Arc::new(git), logs, await_shutdown_signal()).await;
    if let Err(e) = result {
        error!("Failed to run the daemon: {e}");
        std::process::exit(e.code());
    }
}

fn server_options(cli_args: &HashMap<String, String>) -> Result<ServerOptions, DaemonError> {
    let mut server = ServerOptions::default();
    if let Some(host) = cli_args.get("web-host") {
        server.host = host.clone();
    }
    if let Some(port) = cli_args.get("web-port") {
        server.port = port
            .parse()
            .map_err(|_| DaemonError::ConfigError(vec![format!("invalid --web-port: {port}")]))?;
    }
    Ok(server)
}

fn fatal(message: &str) {
    eprintln!("{} {}", "error:".red().bold(), message);
}

fn report_config_error(path: &std::path::Path, err: &DaemonError) {
    match err {
        DaemonError::ConfigError(errors) => {
            fatal(&format!("invalid configuration in {}", path.display()));
            for message in errors {
                eprintln!("  - {message}");
            }
        }
        other => fatal(&format!("unable to load {}: {}", path.display(), other)),
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => (term, int),
            _ => {
                error!("Unable to install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}

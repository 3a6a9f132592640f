//! Per-server reconciliation cycle
//!
//! For every enabled server, in configuration order:
//! path check -> fetch (with retries) -> resolve HEAD and `origin/<branch>`
//! -> validate remote config JSON -> hard reset -> sync plugins tree ->
//! sync config tree -> record. Remote JSON is validated before the reset so a
//! corrupt commit never reaches the working copy. Nothing is rolled back when
//! a later step fails; the next cycle converges again.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, info, warn};

use crate::deploy::git::{CommitInfo, Vcs};
use crate::deploy::pattern::FileFilter;
use crate::deploy::tree::{sync_tree, TreeOptions, TreeReport};
use crate::errors::DaemonError;
use crate::runtime::controller::Controller;
use crate::runtime::state::{DeploymentRecord, RunStatus, RuntimeState};
use crate::storage::settings::{ServerConfig, Settings};

/// Repository subdirectory synced into `PluginsTarget`
pub const PLUGINS_DIR: &str = "plugins";
/// Repository subdirectory synced into `ConfigTarget`
pub const CONFIG_DIR: &str = "config";
/// Marker that the repository path is a working copy
pub const VCS_MARKER: &str = ".git";

/// What a completed cycle did for one server
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub commit: String,
    /// The remote commit differed from the local one before the cycle
    pub deployed: bool,
    pub dry_run: bool,
    pub plugins: TreeReport,
    pub config: TreeReport,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Disabled,
    Completed(CycleReport),
}

/// Runs reconciliation cycles for one settings generation
pub struct Engine {
    settings: Arc<Settings>,
    state: Arc<RuntimeState>,
    controller: Arc<Controller>,
    vcs: Arc<dyn Vcs>,
}

impl Engine {
    pub fn new(
        settings: Arc<Settings>,
        state: Arc<RuntimeState>,
        controller: Arc<Controller>,
        vcs: Arc<dyn Vcs>,
    ) -> Self {
        Self {
            settings,
            state,
            controller,
            vcs,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Global dry-run OR the operator override
    pub fn effective_dry_run(&self) -> bool {
        self.settings.dry_run || self.controller.dry_run()
    }

    /// One pass over every server, strictly one after another
    pub async fn run_cycle(&self) {
        for server in &self.settings.servers {
            let _ = self.run_server(server).await;
        }
    }

    /// Reconcile one server and record the outcome in the runtime state
    pub async fn run_server(&self, server: &ServerConfig) -> Result<CycleOutcome, DaemonError> {
        if !server.enabled {
            info!("[{}] Skipped (disabled)", server.name);
            return Ok(CycleOutcome::Disabled);
        }

        self.state
            .update_server(&server.name, |s| s.last_run_time = Some(Utc::now()));

        match self.reconcile(server).await {
            Ok(report) => {
                self.record(server, &report).await;
                Ok(CycleOutcome::Completed(report))
            }
            Err(e) => {
                error!("[{}] ERROR code={} {}", server.name, e.code(), e);
                let message = e.to_string();
                self.state.update_server(&server.name, |s| s.mark_error(message));
                Err(e)
            }
        }
    }

    async fn reconcile(&self, server: &ServerConfig) -> Result<CycleReport, DaemonError> {
        check_paths(server)?;
        self.fetch_with_retries(server).await?;

        let timeout = self.settings.git_timeout();
        let repo = server.repo_path.as_path();
        let remote_ref = format!("origin/{}", self.settings.effective_branch(server));

        let local = self.vcs.rev_parse(repo, "HEAD", timeout).await?;
        let remote = self.vcs.rev_parse(repo, &remote_ref, timeout).await?;

        let deployed = local != remote;
        if !deployed {
            info!("[{}] No commit diff, verifying hashes", server.name);
        }

        self.validate_remote_config(server, &remote).await?;
        self.vcs.reset_hard(repo, &remote, timeout).await?;

        // Read once so it cannot change between the two trees
        let dry_run = self.effective_dry_run();
        let started = Instant::now();

        let plugins = self
            .sync_subtree(server, PLUGINS_DIR, &server.plugins_target, &server.plugins_pattern, dry_run)
            .await?;
        let config = self
            .sync_subtree(server, CONFIG_DIR, &server.config_target, &server.config_pattern, dry_run)
            .await?;

        Ok(CycleReport {
            commit: remote,
            deployed,
            dry_run,
            plugins,
            config,
            duration: started.elapsed(),
        })
    }

    async fn fetch_with_retries(&self, server: &ServerConfig) -> Result<(), DaemonError> {
        let attempts = self.settings.git_retry_count.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self
                .vcs
                .fetch(&server.repo_path, self.settings.git_timeout())
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => {
                    error!(
                        "[{}] ERROR code={} git fetch failed (attempt {}/{}): {}",
                        server.name,
                        e.code(),
                        attempt,
                        attempts,
                        e
                    );
                    last_error = Some(e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.settings.git_retry_delay()).await;
            }
        }

        let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
        Err(DaemonError::git(
            "fetch",
            format!("gave up after {attempts} attempts: {reason}"),
        ))
    }

    /// Every tracked config file at `rev` must parse as JSON
    async fn validate_remote_config(&self, server: &ServerConfig, rev: &str) -> Result<(), DaemonError> {
        let timeout = self.settings.git_timeout();
        let repo = server.repo_path.as_path();
        let filter = FileFilter::new(&server.config_pattern, &server.exclude_patterns)?;
        let prefix = format!("{CONFIG_DIR}/");

        let listed = self.vcs.list_files(repo, rev, CONFIG_DIR, timeout).await?;
        for path in listed {
            let rel = path.strip_prefix(&prefix).unwrap_or(&path);
            if !filter.is_tracked(rel) {
                continue;
            }

            let content = self.vcs.show_file(repo, rev, &path, timeout).await?;
            if let Err(e) = serde_json::from_slice::<serde_json::Value>(&content) {
                return Err(DaemonError::InvalidJson {
                    path,
                    message: e.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn sync_subtree(
        &self,
        server: &ServerConfig,
        subdir: &str,
        target: &Path,
        patterns: &[String],
        dry_run: bool,
    ) -> Result<TreeReport, DaemonError> {
        let name = server.name.clone();
        let src = server.repo_path.join(subdir);
        let dest = target.to_path_buf();
        let filter = FileFilter::new(patterns, &server.exclude_patterns)?;
        let options = TreeOptions {
            delete_extraneous: server.delete_extraneous,
            dry_run,
        };

        tokio::task::spawn_blocking(move || sync_tree(&name, &src, &dest, &filter, options))
            .await
            .map_err(|e| DaemonError::Internal(format!("tree sync task failed: {e}")))?
    }

    async fn record(&self, server: &ServerConfig, report: &CycleReport) {
        let duration_seconds = report.duration.as_secs_f64();
        self.state
            .update_server(&server.name, |s| s.mark_ok(&report.commit, duration_seconds));

        if !report.deployed {
            return;
        }

        let info = match self
            .vcs
            .commit_info(&server.repo_path, &report.commit, self.settings.git_timeout())
            .await
        {
            Ok(info) => info,
            Err(e) => {
                warn!("[{}] Unable to read commit info: {}", server.name, e);
                CommitInfo {
                    author: "unknown".to_string(),
                    files: Vec::new(),
                }
            }
        };

        let now = Utc::now();
        self.state
            .update_server(&server.name, |s| s.last_deploy_time = Some(now));
        self.state.add_history(DeploymentRecord {
            server: server.name.clone(),
            commit: report.commit.clone(),
            author: info.author,
            files: info.files,
            duration_seconds,
            timestamp: now,
            status: RunStatus::Ok,
            dry_run: report.dry_run,
        });
        info!("[{}] Deployed commit {}", server.name, report.commit);
    }
}

/// Repository, its VCS marker and both targets must exist
fn check_paths(server: &ServerConfig) -> Result<(), DaemonError> {
    let mut missing = Vec::new();
    if !server.repo_path.exists() {
        missing.push(format!("RepoPath={}", server.repo_path.display()));
    }
    if !server.repo_path.join(VCS_MARKER).exists() {
        missing.push(format!("RepoPath missing {}={}", VCS_MARKER, server.repo_path.display()));
    }
    if !server.plugins_target.exists() {
        missing.push(format!("PluginsTarget={}", server.plugins_target.display()));
    }
    if !server.config_target.exists() {
        missing.push(format!("ConfigTarget={}", server.config_target.display()));
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(DaemonError::MissingPaths(missing.join("; ")))
    }
}

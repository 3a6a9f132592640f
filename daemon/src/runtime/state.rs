//! Per-server status and deployment history

use std::collections::VecDeque;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// History entries kept before the oldest are dropped
pub const MAX_HISTORY: usize = 200;

/// Outcome of a server's most recent cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    #[default]
    Unknown,
    Ok,
    Error,
}

/// Last known state of one server
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub last_deploy_time: Option<DateTime<Utc>>,
    pub last_commit: Option<String>,
    pub last_error: Option<String>,
    pub last_duration_seconds: Option<f64>,
    pub last_run_time: Option<DateTime<Utc>>,
    pub last_status: RunStatus,
}

impl ServerStatus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_deploy_time: None,
            last_commit: None,
            last_error: None,
            last_duration_seconds: None,
            last_run_time: None,
            last_status: RunStatus::Unknown,
        }
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.last_status = RunStatus::Error;
        self.last_error = Some(message.into());
    }

    pub fn mark_ok(&mut self, commit: &str, duration_seconds: f64) {
        self.last_status = RunStatus::Ok;
        self.last_error = None;
        self.last_commit = Some(commit.to_string());
        self.last_duration_seconds = Some(duration_seconds);
    }
}

/// A cycle that moved a server to a new commit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentRecord {
    pub server: String,
    pub commit: String,
    pub author: String,
    pub files: Vec<String>,
    pub duration_seconds: f64,
    pub timestamp: DateTime<Utc>,
    pub status: RunStatus,
    /// Files were compared but not written
    pub dry_run: bool,
}

/// Detached copy of the runtime state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub servers: Vec<ServerStatus>,
    pub history: Vec<DeploymentRecord>,
}

struct Inner {
    servers: Vec<ServerStatus>,
    history: VecDeque<DeploymentRecord>,
}

/// Status of every configured server plus a bounded deployment history
pub struct RuntimeState {
    inner: RwLock<Inner>,
    max_history: usize,
}

impl RuntimeState {
    /// One `UNKNOWN` status per server name, in configuration order
    pub fn new(server_names: &[String]) -> Self {
        Self::with_max_history(server_names, MAX_HISTORY)
    }

    pub fn with_max_history(server_names: &[String], max_history: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                servers: server_names.iter().map(ServerStatus::new).collect(),
                history: VecDeque::with_capacity(max_history.min(MAX_HISTORY)),
            }),
            max_history,
        }
    }

    /// Copy of all statuses and the history, oldest record first
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Snapshot {
            servers: inner.servers.clone(),
            history: inner.history.iter().cloned().collect(),
        }
    }

    /// Status of one server
    pub fn server(&self, name: &str) -> Option<ServerStatus> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.servers.iter().find(|s| s.name == name).cloned()
    }

    /// Apply `update` to the named server. Unknown names are ignored.
    pub fn update_server<F>(&self, name: &str, update: F) -> bool
    where
        F: FnOnce(&mut ServerStatus),
    {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match inner.servers.iter_mut().find(|s| s.name == name) {
            Some(status) => {
                update(status);
                true
            }
            None => false,
        }
    }

    /// Append a record, evicting the oldest beyond the limit
    pub fn add_history(&self, record: DeploymentRecord) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.history.push_back(record);
        while inner.history.len() > self.max_history {
            inner.history.pop_front();
        }
    }
}

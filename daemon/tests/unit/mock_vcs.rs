//! Call-recording stand-in for the git client

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use plugsync::deploy::git::{CommitInfo, Vcs};
use plugsync::errors::DaemonError;

/// Pretends to be a clone whose HEAD is `local` and whose remote branch
/// points at `remote`. Files are the content of the remote commit.
pub struct MockVcs {
    calls: Mutex<Vec<String>>,
    fetch_times: Mutex<Vec<Instant>>,
    local: Mutex<String>,
    remote: String,
    fetch_failures: Mutex<u32>,
    hang_fetch: bool,
    in_flight: Arc<AtomicUsize>,
    files: BTreeMap<String, Vec<u8>>,
    commit_info: Option<CommitInfo>,
}

impl MockVcs {
    pub fn new(local: &str, remote: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fetch_times: Mutex::new(Vec::new()),
            local: Mutex::new(local.to_string()),
            remote: remote.to_string(),
            fetch_failures: Mutex::new(0),
            hang_fetch: false,
            in_flight: Arc::new(AtomicUsize::new(0)),
            files: BTreeMap::new(),
            commit_info: Some(CommitInfo {
                author: "alice".to_string(),
                files: vec!["plugins/Kits.cs".to_string()],
            }),
        }
    }

    /// Fail the next `count` fetches
    pub fn failing_fetches(self, count: u32) -> Self {
        *self.fetch_failures.lock().unwrap() = count;
        self
    }

    /// Every fetch blocks until its future is dropped
    pub fn hanging_fetches(mut self) -> Self {
        self.hang_fetch = true;
        self
    }

    /// Fetches currently blocked
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn with_file(mut self, path: &str, contents: &[u8]) -> Self {
        self.files.insert(path.to_string(), contents.to_vec());
        self
    }

    pub fn without_commit_info(mut self) -> Self {
        self.commit_info = None;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose first word is `op`
    pub fn count(&self, op: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.split_whitespace().next() == Some(op))
            .count()
    }

    pub fn fetch_times(&self) -> Vec<Instant> {
        self.fetch_times.lock().unwrap().clone()
    }

    pub fn head(&self) -> String {
        self.local.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Vcs for MockVcs {
    async fn fetch(&self, _repo: &Path, _timeout: Duration) -> Result<(), DaemonError> {
        self.record("fetch".to_string());
        self.fetch_times.lock().unwrap().push(Instant::now());

        if self.hang_fetch {
            let _guard = InFlight::enter(self.in_flight.clone());
            std::future::pending::<()>().await;
        }

        let mut failures = self.fetch_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(DaemonError::git("fetch", "could not resolve host"));
        }
        Ok(())
    }

    async fn rev_parse(&self, _repo: &Path, rev: &str, _timeout: Duration) -> Result<String, DaemonError> {
        self.record(format!("rev-parse {rev}"));
        if rev == "HEAD" {
            Ok(self.head())
        } else {
            Ok(self.remote.clone())
        }
    }

    async fn reset_hard(&self, _repo: &Path, rev: &str, _timeout: Duration) -> Result<(), DaemonError> {
        self.record(format!("reset {rev}"));
        *self.local.lock().unwrap() = rev.to_string();
        Ok(())
    }

    async fn show_file(
        &self,
        _repo: &Path,
        rev: &str,
        path: &str,
        _timeout: Duration,
    ) -> Result<Vec<u8>, DaemonError> {
        self.record(format!("show {rev}:{path}"));
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| DaemonError::git(format!("show {rev}:{path}"), "path does not exist"))
    }

    async fn list_files(
        &self,
        _repo: &Path,
        rev: &str,
        subpath: &str,
        _timeout: Duration,
    ) -> Result<Vec<String>, DaemonError> {
        self.record(format!("ls-tree {rev} {subpath}"));
        let prefix = format!("{subpath}/");
        Ok(self
            .files
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn commit_info(&self, _repo: &Path, rev: &str, _timeout: Duration) -> Result<CommitInfo, DaemonError> {
        self.record(format!("commit-info {rev}"));
        self.commit_info
            .clone()
            .ok_or_else(|| DaemonError::git(format!("show {rev}"), "bad object"))
    }
}

/// Counts a blocked call until dropped
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

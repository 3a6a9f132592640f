//! Git client for the local working copies

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::errors::DaemonError;

/// Author and touched files of one commit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitInfo {
    pub author: String,
    pub files: Vec<String>,
}

/// Version-control operations the engine needs against a local clone.
/// Every call is bounded by `timeout`; retries are the caller's business.
#[async_trait]
pub trait Vcs: Send + Sync {
    /// `git fetch`
    async fn fetch(&self, repo: &Path, timeout: Duration) -> Result<(), DaemonError>;

    /// `git rev-parse {rev}`
    async fn rev_parse(&self, repo: &Path, rev: &str, timeout: Duration) -> Result<String, DaemonError>;

    /// `git reset --hard {rev}`
    async fn reset_hard(&self, repo: &Path, rev: &str, timeout: Duration) -> Result<(), DaemonError>;

    /// `git show {rev}:{path}`
    async fn show_file(
        &self,
        repo: &Path,
        rev: &str,
        path: &str,
        timeout: Duration,
    ) -> Result<Vec<u8>, DaemonError>;

    /// `git ls-tree -r --name-only {rev} {subpath}`
    async fn list_files(
        &self,
        repo: &Path,
        rev: &str,
        subpath: &str,
        timeout: Duration,
    ) -> Result<Vec<String>, DaemonError>;

    /// `git show --name-only --pretty=format:%an {rev}`
    async fn commit_info(&self, repo: &Path, rev: &str, timeout: Duration) -> Result<CommitInfo, DaemonError>;
}

/// Runs the `git` executable
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Fail when the executable cannot be run at all
    pub async fn check_available(&self) -> Result<(), DaemonError> {
        let status = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| DaemonError::EnvError(format!("{} not found in PATH: {}", self.program, e)))?;

        if !status.success() {
            return Err(DaemonError::EnvError(format!(
                "{} --version exited with {}",
                self.program, status
            )));
        }
        Ok(())
    }

    async fn run(
        &self,
        repo: &Path,
        op: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<Vec<u8>, DaemonError> {
        debug!("git {} (in {})", args.join(" "), repo.display());

        let child = Command::new(&self.program)
            .current_dir(repo)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DaemonError::git(op, e.to_string()))?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| DaemonError::git(op, e.to_string()))?,
            Err(_) => {
                return Err(DaemonError::git(
                    op,
                    format!("timeout after {}s", timeout.as_secs()),
                ))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("exited with {}", output.status)
            } else {
                stderr
            };
            return Err(DaemonError::git(op, message));
        }

        Ok(output.stdout)
    }

    async fn run_text(
        &self,
        repo: &Path,
        op: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<String, DaemonError> {
        let stdout = self.run(repo, op, args, timeout).await?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }
}

#[async_trait]
impl Vcs for GitCli {
    async fn fetch(&self, repo: &Path, timeout: Duration) -> Result<(), DaemonError> {
        self.run(repo, "fetch", &["fetch"], timeout).await?;
        Ok(())
    }

    async fn rev_parse(&self, repo: &Path, rev: &str, timeout: Duration) -> Result<String, DaemonError> {
        let op = format!("rev-parse {rev}");
        let out = self.run_text(repo, &op, &["rev-parse", rev], timeout).await?;
        if out.is_empty() {
            return Err(DaemonError::git(op, "empty output"));
        }
        Ok(out)
    }

    async fn reset_hard(&self, repo: &Path, rev: &str, timeout: Duration) -> Result<(), DaemonError> {
        let op = format!("reset --hard {rev}");
        self.run(repo, &op, &["reset", "--hard", rev], timeout).await?;
        Ok(())
    }

    async fn show_file(
        &self,
        repo: &Path,
        rev: &str,
        path: &str,
        timeout: Duration,
    ) -> Result<Vec<u8>, DaemonError> {
        let object = format!("{rev}:{path}");
        self.run(repo, &format!("show {object}"), &["show", &object], timeout)
            .await
    }

    async fn list_files(
        &self,
        repo: &Path,
        rev: &str,
        subpath: &str,
        timeout: Duration,
    ) -> Result<Vec<String>, DaemonError> {
        let op = format!("ls-tree {rev} {subpath}");
        let out = self
            .run_text(repo, &op, &["ls-tree", "-r", "--name-only", rev, subpath], timeout)
            .await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn commit_info(&self, repo: &Path, rev: &str, timeout: Duration) -> Result<CommitInfo, DaemonError> {
        let op = format!("show {rev}");
        let out = self
            .run_text(
                repo,
                &op,
                &["show", "--name-only", "--pretty=format:%an", rev],
                timeout,
            )
            .await?;
        Ok(parse_commit_info(&out))
    }
}

/// First non-blank line is the author, the rest are file paths
pub fn parse_commit_info(output: &str) -> CommitInfo {
    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
    let author = lines.next().unwrap_or("unknown").to_string();
    CommitInfo {
        author,
        files: lines.map(str::to_string).collect(),
    }
}

//! Settings file parsing and validation

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::deploy::pattern::check_glob;
use crate::errors::DaemonError;

pub const DEFAULT_INTERVAL_SECONDS: i64 = 120;
pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_GIT_RETRY_COUNT: i64 = 3;
pub const DEFAULT_GIT_RETRY_DELAY_SECONDS: i64 = 10;
pub const DEFAULT_GIT_TIMEOUT_SECONDS: i64 = 30;
pub const DEFAULT_STARTUP_DELAY_SECONDS: i64 = 1;

const DEFAULT_PLUGINS_PATTERN: &str = "*.cs";
const DEFAULT_CONFIG_PATTERN: &str = "*.json";

/// One managed game server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Unique name, used as the correlation key in logs and status
    pub name: String,

    /// Local clone of the plugins repository
    pub repo_path: PathBuf,

    pub server_root: PathBuf,

    /// Destination for `<repo>/plugins`
    pub plugins_target: PathBuf,

    /// Destination for `<repo>/config`
    pub config_target: PathBuf,

    /// Overrides the global branch when set
    pub branch: Option<String>,

    /// Never empty
    pub plugins_pattern: Vec<String>,

    /// Never empty
    pub config_pattern: Vec<String>,

    pub exclude_patterns: Vec<String>,

    /// Delete tracked destination files that are gone from the repository
    pub delete_extraneous: bool,

    pub enabled: bool,
}

/// Global daemon settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub log_path: PathBuf,
    pub interval_seconds: u64,
    pub branch: String,
    pub git_retry_count: u32,
    pub git_retry_delay_seconds: u64,
    pub git_timeout_seconds: u64,
    pub startup_delay_seconds: u64,
    pub dry_run: bool,
    pub servers: Vec<ServerConfig>,
}

impl Settings {
    /// Parse a configuration document from text. A leading UTF-8 BOM is ignored.
    pub fn from_json_str(contents: &str) -> Result<Self, DaemonError> {
        let contents = contents.strip_prefix('\u{feff}').unwrap_or(contents);
        let value: Value = serde_json::from_str(contents)?;
        Self::from_value(&value)
    }

    /// Build settings from a parsed document, reporting every problem found
    pub fn from_value(value: &Value) -> Result<Self, DaemonError> {
        if !value.is_object() {
            return Err(DaemonError::ConfigError(vec![
                "configuration must be a JSON object".to_string(),
            ]));
        }

        let raw: RawSettings = serde_json::from_value(value.clone())
            .map_err(|e| DaemonError::ConfigError(vec![e.to_string()]))?;

        raw.validate().map_err(DaemonError::ConfigError)
    }

    /// Check interval between reconciliation cycles
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_seconds)
    }

    pub fn git_retry_delay(&self) -> Duration {
        Duration::from_secs(self.git_retry_delay_seconds)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_seconds)
    }

    /// Branch a server tracks: its own override, else the global default
    pub fn effective_branch<'a>(&'a self, server: &'a ServerConfig) -> &'a str {
        server.branch.as_deref().unwrap_or(&self.branch)
    }

    pub fn server_names(&self) -> Vec<String> {
        self.servers.iter().map(|s| s.name.clone()).collect()
    }

    /// Copy of these settings with dry-run forced on
    pub fn with_dry_run(self) -> Self {
        Self {
            dry_run: true,
            ..self
        }
    }
}

/// Validate a configuration document. An empty list means it is valid.
pub fn validate_config(value: &Value) -> Vec<String> {
    match Settings::from_value(value) {
        Ok(_) => Vec::new(),
        Err(DaemonError::ConfigError(errors)) => errors,
        Err(e) => vec![e.to_string()],
    }
}

/// Configuration written when none exists yet
pub fn sample_config() -> Value {
    json!({
        "LogPath": "/var/log/plugsync/deploy.log",
        "IntervalSeconds": DEFAULT_INTERVAL_SECONDS,
        "Branch": DEFAULT_BRANCH,
        "GitRetryCount": DEFAULT_GIT_RETRY_COUNT,
        "GitRetryDelaySeconds": DEFAULT_GIT_RETRY_DELAY_SECONDS,
        "GitTimeoutSeconds": DEFAULT_GIT_TIMEOUT_SECONDS,
        "StartupDelaySeconds": DEFAULT_STARTUP_DELAY_SECONDS,
        "DryRun": false,
        "Servers": [
            {
                "Name": "main",
                "RepoPath": "/srv/plugsync/plugins-config",
                "ServerRoot": "/srv/rust/server",
                "PluginsTarget": "/srv/rust/server/oxide/plugins",
                "ConfigTarget": "/srv/rust/server/oxide/config",
                "Branch": DEFAULT_BRANCH,
                "PluginsPattern": [DEFAULT_PLUGINS_PATTERN],
                "ConfigPattern": [DEFAULT_CONFIG_PATTERN],
                "ExcludePatterns": [],
                "DeleteExtraneous": false,
                "Enabled": true
            }
        ]
    })
}

// ================================ RAW DOCUMENT ================================== //

/// A pattern field may be written as one string or a list of strings
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PatternList {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawSettings {
    log_path: Option<String>,
    interval_seconds: Option<i64>,
    branch: Option<String>,
    git_retry_count: Option<i64>,
    git_retry_delay_seconds: Option<i64>,
    git_timeout_seconds: Option<i64>,
    startup_delay_seconds: Option<i64>,
    dry_run: Option<bool>,
    servers: Option<Vec<RawServer>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawServer {
    name: Option<String>,
    repo_path: Option<String>,
    server_root: Option<String>,
    plugins_target: Option<String>,
    config_target: Option<String>,
    branch: Option<String>,
    plugins_pattern: Option<PatternList>,
    config_pattern: Option<PatternList>,
    exclude_patterns: Option<PatternList>,
    delete_extraneous: Option<bool>,
    enabled: Option<bool>,
}

impl RawSettings {
    fn validate(self) -> Result<Settings, Vec<String>> {
        let mut errors = Vec::new();

        let log_path = match self.log_path.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => PathBuf::from(p),
            _ => {
                errors.push("Missing config key: LogPath".to_string());
                PathBuf::new()
            }
        };

        let interval_seconds = positive(
            self.interval_seconds.unwrap_or(DEFAULT_INTERVAL_SECONDS),
            "IntervalSeconds",
            &mut errors,
        );
        let git_retry_count = positive(
            self.git_retry_count.unwrap_or(DEFAULT_GIT_RETRY_COUNT),
            "GitRetryCount",
            &mut errors,
        );
        let git_timeout_seconds = positive(
            self.git_timeout_seconds.unwrap_or(DEFAULT_GIT_TIMEOUT_SECONDS),
            "GitTimeoutSeconds",
            &mut errors,
        );
        let startup_delay_seconds = positive(
            self.startup_delay_seconds
                .unwrap_or(DEFAULT_STARTUP_DELAY_SECONDS),
            "StartupDelaySeconds",
            &mut errors,
        );

        let retry_delay = self
            .git_retry_delay_seconds
            .unwrap_or(DEFAULT_GIT_RETRY_DELAY_SECONDS);
        if retry_delay < 0 {
            errors.push(format!("GitRetryDelaySeconds must be >= 0 (got {retry_delay})"));
        }

        let branch = match self.branch.as_deref().map(str::trim) {
            Some(b) if !b.is_empty() => b.to_string(),
            Some(_) => {
                errors.push("Branch cannot be empty".to_string());
                String::new()
            }
            None => DEFAULT_BRANCH.to_string(),
        };

        let mut servers = Vec::new();
        match self.servers {
            None => errors.push("Missing config key: Servers".to_string()),
            Some(raw) if raw.is_empty() => {
                errors.push("Servers must be a non-empty list".to_string())
            }
            Some(raw) => {
                let mut seen = HashSet::new();
                for (index, server) in raw.into_iter().enumerate() {
                    if let Some(server) = server.validate(index, &mut errors) {
                        if !seen.insert(server.name.clone()) {
                            errors.push(format!("Duplicate server Name: {}", server.name));
                        }
                        servers.push(server);
                    }
                }
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(Settings {
            log_path,
            interval_seconds: interval_seconds as u64,
            branch,
            git_retry_count: git_retry_count.min(u32::MAX as i64) as u32,
            git_retry_delay_seconds: retry_delay as u64,
            git_timeout_seconds: git_timeout_seconds as u64,
            startup_delay_seconds: startup_delay_seconds as u64,
            dry_run: self.dry_run.unwrap_or(false),
            servers,
        })
    }
}

impl RawServer {
    fn validate(self, index: usize, errors: &mut Vec<String>) -> Option<ServerConfig> {
        let name = self.name.as_deref().map(str::trim).unwrap_or("").to_string();
        let label = if name.is_empty() {
            errors.push(format!("Servers[{index}]: Name is required"));
            format!("Servers[{index}]")
        } else {
            format!("Server '{name}'")
        };

        let repo_path = required_path(self.repo_path, &label, "RepoPath", errors);
        let server_root = required_path(self.server_root, &label, "ServerRoot", errors);

        let plugins_pattern = patterns(
            self.plugins_pattern,
            Some(DEFAULT_PLUGINS_PATTERN),
            &label,
            "PluginsPattern",
            errors,
        );
        let config_pattern = patterns(
            self.config_pattern,
            Some(DEFAULT_CONFIG_PATTERN),
            &label,
            "ConfigPattern",
            errors,
        );
        let exclude_patterns =
            patterns(self.exclude_patterns, None, &label, "ExcludePatterns", errors);

        let branch = match self.branch.as_deref().map(str::trim) {
            Some(b) if !b.is_empty() => Some(b.to_string()),
            _ => None,
        };

        let (repo_path, server_root) = (repo_path?, server_root?);
        if name.is_empty() {
            return None;
        }

        let plugins_target = non_blank(self.plugins_target)
            .map(PathBuf::from)
            .unwrap_or_else(|| server_root.join("oxide").join("plugins"));
        let config_target = non_blank(self.config_target)
            .map(PathBuf::from)
            .unwrap_or_else(|| server_root.join("oxide").join("config"));

        Some(ServerConfig {
            name,
            repo_path,
            server_root,
            plugins_target,
            config_target,
            branch,
            plugins_pattern,
            config_pattern,
            exclude_patterns,
            delete_extraneous: self.delete_extraneous.unwrap_or(false),
            enabled: self.enabled.unwrap_or(true),
        })
    }
}

fn positive(value: i64, key: &str, errors: &mut Vec<String>) -> i64 {
    if value <= 0 {
        errors.push(format!("{key} must be > 0 (got {value})"));
    }
    value
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required_path(
    value: Option<String>,
    label: &str,
    key: &str,
    errors: &mut Vec<String>,
) -> Option<PathBuf> {
    match non_blank(value) {
        Some(v) => Some(Path::new(&v).to_path_buf()),
        None => {
            errors.push(format!("{label}: missing config key: {key}"));
            None
        }
    }
}

/// Trim blank entries. Lists with a default may not end up empty.
fn patterns(
    value: Option<PatternList>,
    default: Option<&str>,
    label: &str,
    key: &str,
    errors: &mut Vec<String>,
) -> Vec<String> {
    let raw = match value {
        None => return default.map(|d| vec![d.to_string()]).unwrap_or_default(),
        Some(PatternList::One(p)) => vec![p],
        Some(PatternList::Many(list)) => list,
    };

    let cleaned: Vec<String> = raw
        .iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();

    if cleaned.is_empty() && (default.is_some() || !raw.is_empty()) {
        errors.push(format!("{label}: {key} list cannot be empty"));
    }
    for pattern in &cleaned {
        if let Err(e) = check_glob(pattern) {
            errors.push(format!("{label}: {key} has an {e}"));
        }
    }
    cleaned
}

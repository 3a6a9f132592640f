//! Logging configuration

use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{info, Subscriber};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    fmt::{self, format::DefaultFields, format::Format},
    layer::SubscriberExt,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

use crate::errors::DaemonError;

const TAIL_BLOCK_SIZE: u64 = 1024;

type FileLayer = fmt::Layer<Registry, DefaultFields, Format, NonBlocking>;
type FileHandle = reload::Handle<Option<FileLayer>, Registry>;

/// Logging options
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,

    /// Write logs to stdout
    pub stdout: bool,

    /// Log file, appended to
    pub log_path: Option<PathBuf>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            stdout: true,
            log_path: None,
        }
    }
}

/// Handle on the installed subscriber, used to move the file sink
pub struct LogHandle {
    file: FileHandle,
    guard: Mutex<Option<WorkerGuard>>,
    current: Mutex<Option<PathBuf>>,
}

impl LogHandle {
    /// Send file output to `log_path` from now on. The previous writer is
    /// flushed when its guard drops.
    pub fn redirect(&self, log_path: &Path) -> Result<(), DaemonError> {
        let (layer, guard) = file_layer(log_path)?;
        self.file
            .reload(Some(layer))
            .map_err(|e| DaemonError::Internal(format!("unable to reload log layer: {e}")))?;

        *self.guard.lock().unwrap_or_else(|e| e.into_inner()) = Some(guard);
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(log_path.to_path_buf());
        info!("Logging to {}", log_path.display());
        Ok(())
    }

    /// Path of the active log file, if any
    pub fn log_path(&self) -> Option<PathBuf> {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Install the global subscriber: stdout plus an optional file sink
pub fn init_logging(options: LogOptions) -> Result<LogHandle, DaemonError> {
    let (subscriber, handle) = build_subscriber(&options);
    subscriber
        .try_init()
        .map_err(|e| DaemonError::Internal(format!("unable to install log subscriber: {e}")))?;

    if let Some(path) = &options.log_path {
        handle.redirect(path)?;
    }
    Ok(handle)
}

/// Subscriber and its file handle, not yet installed. The handle can only
/// move the file sink while the subscriber is alive.
pub fn build_subscriber(options: &LogOptions) -> (impl Subscriber + Send + Sync + 'static, LogHandle) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&options.default_filter));

    let (file, file_handle) = reload::Layer::new(None::<FileLayer>);
    let stdout = options.stdout.then(fmt::layer);

    let subscriber = tracing_subscriber::registry().with(file).with(filter).with(stdout);
    let handle = LogHandle {
        file: file_handle,
        guard: Mutex::new(None),
        current: Mutex::new(None),
    };
    (subscriber, handle)
}

fn file_layer(log_path: &Path) -> Result<(FileLayer, WorkerGuard), DaemonError> {
    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(log_path)?;
    let (writer, guard) = tracing_appender::non_blocking(file);
    let layer = fmt::layer().with_ansi(false).with_writer(writer);
    Ok((layer, guard))
}

/// Last `max_lines` lines of `path`. A missing file has no lines.
pub fn tail_lines(path: &Path, max_lines: usize) -> io::Result<Vec<String>> {
    if max_lines == 0 {
        return Ok(Vec::new());
    }
    let mut file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut pos = file.seek(SeekFrom::End(0))?;
    let mut data: Vec<u8> = Vec::new();
    while pos > 0 && data.iter().filter(|b| **b == b'\n').count() <= max_lines {
        let step = TAIL_BLOCK_SIZE.min(pos);
        pos -= step;
        file.seek(SeekFrom::Start(pos))?;
        let mut block = vec![0u8; step as usize];
        file.read_exact(&mut block)?;
        block.extend_from_slice(&data);
        data = block;
    }

    let text = String::from_utf8_lossy(&data);
    let lines: Vec<&str> = text.lines().collect();
    let skip = lines.len().saturating_sub(max_lines);
    Ok(lines[skip..].iter().map(|l| l.to_string()).collect())
}

/// Complete lines appended after byte `offset`, and the offset to resume
/// from. A file that shrank is read again from the start.
pub fn read_appended(path: &Path, offset: u64) -> io::Result<(Vec<String>, u64)> {
    let mut file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let len = file.metadata()?.len();
    let start = if len < offset { 0 } else { offset };
    file.seek(SeekFrom::Start(start))?;

    let mut data = Vec::new();
    file.read_to_end(&mut data)?;

    // Leave a trailing partial line for the next read
    let complete = match data.iter().rposition(|b| *b == b'\n') {
        Some(idx) => idx + 1,
        None => return Ok((Vec::new(), start)),
    };
    let lines = String::from_utf8_lossy(&data[..complete])
        .lines()
        .map(str::to_string)
        .collect();
    Ok((lines, start + complete as u64))
}

/// Level name (e.g. "error") and `[server]` tag must both appear when given
pub fn matches_filter(line: &str, level: Option<&str>, server: Option<&str>) -> bool {
    if let Some(level) = level.filter(|l| !l.is_empty()) {
        if !line.contains(&level.to_uppercase()) {
            return false;
        }
    }
    if let Some(server) = server.filter(|s| !s.is_empty()) {
        if !line.contains(&format!("[{server}]")) {
            return false;
        }
    }
    true
}

//! Directory tree reconciliation
//!
//! Brings a destination tree in line with a source tree for the files a
//! [`FileFilter`] tracks. Content is compared by SHA256, so a destination
//! file with identical bytes is never rewritten. Failures abort the pass
//! and are reported; copies already made are not undone.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use serde::Serialize;
use tracing::{info, warn};

use crate::deploy::pattern::FileFilter;
use crate::errors::DaemonError;
use crate::utils::sha256_file;

/// How a tree pass may touch the destination
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeOptions {
    /// Delete tracked destination files missing from the source
    pub delete_extraneous: bool,

    /// Log what would change without touching the filesystem
    pub dry_run: bool,
}

/// Relative paths acted on (or, in dry-run, that would have been)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TreeReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
    pub dry_run: bool,
}

impl TreeReport {
    /// Number of create, update and delete actions
    pub fn changes(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }
}

/// Sync `dest_dir` from `src_dir`. `server` only prefixes log lines.
pub fn sync_tree(
    server: &str,
    src_dir: &Path,
    dest_dir: &Path,
    filter: &FileFilter,
    options: TreeOptions,
) -> Result<TreeReport, DaemonError> {
    let src_files = collect_files(src_dir, filter)?;
    let dest_files = collect_files(dest_dir, filter)?;
    let mut report = TreeReport {
        dry_run: options.dry_run,
        ..Default::default()
    };

    if !src_dir.exists() {
        warn!("[{}] Source tree {} does not exist", server, src_dir.display());
    }

    for (rel, src_file) in &src_files {
        let dest_path = join_rel(dest_dir, rel);
        let exists = dest_path.exists();

        if exists {
            let src_hash = sha256_file(src_file).map_err(|e| DaemonError::copy(src_file, e))?;
            let dest_hash = sha256_file(&dest_path).map_err(|e| DaemonError::copy(&dest_path, e))?;
            if src_hash == dest_hash {
                report.unchanged.push(rel.clone());
                continue;
            }
        }

        let action = if exists { "update" } else { "create" };
        if options.dry_run {
            info!(
                "[{}][DRY-RUN] Would {} {} (src={} dest={})",
                server,
                action,
                rel,
                src_file.display(),
                if exists { dest_path.display().to_string() } else { "new".to_string() }
            );
        } else {
            copy_preserving_mtime(src_file, &dest_path)?;
            info!("[{}] {} {}", server, action, rel);
        }

        if exists {
            report.updated.push(rel.clone());
        } else {
            report.created.push(rel.clone());
        }
    }

    if options.delete_extraneous {
        for (rel, dest_path) in &dest_files {
            if src_files.contains_key(rel) {
                continue;
            }
            if options.dry_run {
                info!("[{}][DRY-RUN] Would delete {}", server, dest_path.display());
            } else {
                fs::remove_file(dest_path).map_err(|e| DaemonError::copy(dest_path, e))?;
                info!("[{}] Deleted extraneous {}", server, dest_path.display());
            }
            report.deleted.push(rel.clone());
        }
    }

    Ok(report)
}

/// Tracked files under `base`, keyed by POSIX relative path
pub fn collect_files(
    base: &Path,
    filter: &FileFilter,
) -> Result<BTreeMap<String, PathBuf>, DaemonError> {
    let mut files = BTreeMap::new();
    if !base.is_dir() {
        return Ok(files);
    }

    let mut pending = vec![base.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|e| DaemonError::copy(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| DaemonError::copy(&dir, e))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| DaemonError::copy(&path, e))?;

            if file_type.is_dir() {
                pending.push(path);
                continue;
            }

            // Symlinks count when they resolve to a file; linked directories are not followed
            let is_file = file_type.is_file()
                || (file_type.is_symlink() && fs::metadata(&path).map(|m| m.is_file()).unwrap_or(false));
            if !is_file {
                continue;
            }

            let Some(rel) = rel_posix(base, &path) else {
                continue;
            };
            if filter.is_tracked(&rel) {
                files.insert(rel, path);
            }
        }
    }

    Ok(files)
}

fn rel_posix(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

fn join_rel(base: &Path, rel: &str) -> PathBuf {
    rel.split('/').fold(base.to_path_buf(), |path, part| path.join(part))
}

fn copy_preserving_mtime(src: &Path, dest: &Path) -> Result<(), DaemonError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| DaemonError::copy(parent, e))?;
    }
    fs::copy(src, dest).map_err(|e| DaemonError::copy(dest, e))?;

    let meta = fs::metadata(src).map_err(|e| DaemonError::copy(src, e))?;
    filetime::set_file_times(
        dest,
        FileTime::from_last_access_time(&meta),
        FileTime::from_last_modification_time(&meta),
    )
    .map_err(|e| DaemonError::copy(dest, e))?;
    Ok(())
}

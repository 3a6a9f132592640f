//! The on-disk configuration document

use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::DaemonError;
use crate::storage::settings::{sample_config, Settings};

/// The JSON configuration file the daemon is started with
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
}

impl ConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Read the raw document (UTF-8, optional BOM)
    pub async fn read_value(&self) -> Result<Value, DaemonError> {
        let contents = fs::read_to_string(&self.path).await?;
        let contents = contents.strip_prefix('\u{feff}').unwrap_or(&contents);
        Ok(serde_json::from_str(contents)?)
    }

    /// Read and validate the document
    pub async fn load_settings(&self) -> Result<Settings, DaemonError> {
        let contents = fs::read_to_string(&self.path).await?;
        Settings::from_json_str(&contents)
    }

    /// Replace the document, writing through a temporary file
    pub async fn save(&self, value: &Value) -> Result<(), DaemonError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let contents = serde_json::to_string_pretty(value)?;
        let temp_path = self.path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    /// Write the sample configuration for the operator to edit
    pub async fn write_sample(&self) -> Result<(), DaemonError> {
        self.save(&sample_config()).await
    }
}

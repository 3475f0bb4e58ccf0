use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;

use crate::error::{ExporterError, Result};
use crate::state::WatermarkStore;

/// Watermarks kept as a JSON map in a local file.
///
/// The file is read lazily on every access; a missing file reads as an empty
/// map rather than an error, so first runs need no provisioning.
#[derive(Debug)]
pub struct FileWatermarkStore {
    path: PathBuf,
}

impl FileWatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_map(&self) -> Result<BTreeMap<String, String>> {
        match fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| ExporterError::Storage(format!("corrupt state file: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(ExporterError::Storage(e.to_string())),
        }
    }

    async fn write_map(&self, map: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ExporterError::Storage(e.to_string()))?;
            }
        }
        let content = serde_json::to_string_pretty(map)?;
        fs::write(&self.path, content)
            .await
            .map_err(|e| ExporterError::Storage(e.to_string()))
    }
}

#[async_trait]
impl WatermarkStore for FileWatermarkStore {
    async fn get(&self, job_name: &str) -> Result<Option<String>> {
        Ok(self.read_map().await?.get(job_name).cloned())
    }

    async fn set(&self, job_name: &str, value: &str) -> Result<()> {
        let mut map = self.read_map().await?;
        map.insert(job_name.to_string(), value.to_string());
        self.write_map(&map).await
    }

    async fn delete(&self, job_name: &str) -> Result<()> {
        let mut map = self.read_map().await?;
        if map.remove(job_name).is_some() {
            self.write_map(&map).await?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.write_map(&BTreeMap::new()).await
    }
}

pub mod local;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ExporterConfig, StateBackend};
use crate::error::Result;

pub use local::FileWatermarkStore;
pub use memory::MemoryWatermarkStore;

/// Persistence contract for per-job extraction watermarks.
///
/// Backends must provide read-after-write consistency for a single writer;
/// concurrent writers are excluded by the per-job lock around the cycle.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn get(&self, job_name: &str) -> Result<Option<String>>;
    async fn set(&self, job_name: &str, value: &str) -> Result<()>;
    async fn delete(&self, job_name: &str) -> Result<()>;
    /// Drop all stored watermarks.
    async fn flush(&self) -> Result<()>;
}

/// Select the backend once at startup; never re-dispatched per call.
pub fn from_config(config: &ExporterConfig) -> Arc<dyn WatermarkStore> {
    match config.state.backend {
        StateBackend::Local => Arc::new(FileWatermarkStore::new(&config.state.file_path)),
        StateBackend::Memory => Arc::new(MemoryWatermarkStore::new()),
    }
}

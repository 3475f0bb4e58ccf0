use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::state::WatermarkStore;

/// In-process watermark store for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn get(&self, job_name: &str) -> Result<Option<String>> {
        Ok(self.map.lock().await.get(job_name).cloned())
    }

    async fn set(&self, job_name: &str, value: &str) -> Result<()> {
        self.map
            .lock()
            .await
            .insert(job_name.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, job_name: &str) -> Result<()> {
        self.map.lock().await.remove(job_name);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.map.lock().await.clear();
        Ok(())
    }
}

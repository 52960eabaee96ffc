//! Telemetry sink implementations

use super::{ArchiveStore, HotExporter, SpanRecord};
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// In-memory hot exporter (for testing)
#[derive(Default)]
pub struct InMemoryHotExporter {
    records: Arc<RwLock<Vec<SpanRecord>>>,
}

impl InMemoryHotExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<SpanRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl HotExporter for InMemoryHotExporter {
    async fn export(&self, record: SpanRecord) -> Result<()> {
        self.records.write().await.push(record);
        Ok(())
    }
}

/// Emits stripped spans as structured log lines
pub struct LogExporter;

#[async_trait]
impl HotExporter for LogExporter {
    async fn export(&self, record: SpanRecord) -> Result<()> {
        let duration_ms = (record.end - record.start).num_milliseconds();
        info!(
            target: "telemetry",
            span = %record.name,
            trace_id = %record.trace_id,
            duration_ms,
            attributes = %serde_json::to_string(&record.attributes)?,
            "span"
        );
        Ok(())
    }
}

/// In-memory archive keyed by object path
#[derive(Default)]
pub struct InMemoryArchive {
    batches: Arc<RwLock<HashMap<String, Vec<SpanRecord>>>>,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.batches.read().await.len()
    }

    pub async fn batches(&self) -> HashMap<String, Vec<SpanRecord>> {
        self.batches.read().await.clone()
    }
}

#[async_trait]
impl ArchiveStore for InMemoryArchive {
    async fn put(&self, key: &str, records: &[SpanRecord]) -> Result<()> {
        self.batches
            .write()
            .await
            .insert(key.to_string(), records.to_vec());
        Ok(())
    }
}

/// Date-partitioned JSON batches under a root directory
pub struct FileArchive {
    root: PathBuf,
}

impl FileArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArchiveStore for FileArchive {
    async fn put(&self, key: &str, records: &[SpanRecord]) -> Result<()> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let body = serde_json::to_vec_pretty(records)?;
        tokio::fs::write(&path, body).await?;
        Ok(())
    }
}

//! In-memory implementation of `ArchiveCatalog`.
//!
//! Nothing survives the process. Useful for tests and for dry experiments
//! where the chain head does not need to outlive a run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use coldchain_contracts::archive::{ArchiveBatch, ChainHead};
use coldchain_contracts::error::{ArchiveError, ArchiveResult};
use coldchain_core::traits::ArchiveCatalog;

use crate::index::CatalogIndex;

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    index: RwLock<CatalogIndex>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ArchiveCatalog for InMemoryCatalog {
    async fn record(&self, batch: &ArchiveBatch) -> ArchiveResult<()> {
        self.index.write().await.insert(batch.clone())?;
        debug!(archive_id = %batch.archive_id, "catalog record added");
        Ok(())
    }

    async fn lookup(&self, archive_id: &str) -> ArchiveResult<Option<ArchiveBatch>> {
        Ok(self.index.read().await.get(archive_id).cloned())
    }

    async fn list_all(&self) -> ArchiveResult<Vec<ArchiveBatch>> {
        Ok(self.index.read().await.all())
    }

    async fn list_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ArchiveResult<Vec<ArchiveBatch>> {
        Ok(self.index.read().await.in_range(start, end))
    }

    async fn list_by_year(&self, year: i32) -> ArchiveResult<Vec<ArchiveBatch>> {
        Ok(self.index.read().await.in_year(year))
    }

    async fn chain_head(&self) -> ArchiveResult<Option<ChainHead>> {
        Ok(self.index.read().await.head())
    }

    async fn remove(&self, archive_id: &str) -> ArchiveResult<()> {
        self.index
            .write()
            .await
            .remove(archive_id)
            .map(|_| ())
            .ok_or_else(|| ArchiveError::NotFound {
                what: format!("archive {archive_id}"),
            })
    }
}

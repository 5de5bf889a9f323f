//! Marketplace archival demo scenarios.
//!
//! Each scenario wires the real coldchain components (archiver, multipart
//! transfer, catalog) to an in-memory live store filled with mock marketplace
//! traffic and demonstrates one guarantee of the engine.

pub mod archive_backlog;
pub mod restore_truncated;
pub mod verify_fresh;

use std::sync::Arc;

use coldchain_catalog::InMemoryCatalog;
use coldchain_contracts::{config::ArchiverConfig, error::ArchiveResult, event::AuditEvent};
use coldchain_core::{
    traits::{ArchiveCatalog, Envelope, EventSource, ObjectStore},
    Archiver,
};
use coldchain_storage::{MemoryBackend, MultipartTransfer, TransferConfig};

use crate::source::InMemoryEventSource;

/// Everything a scenario needs, with handles kept on the concrete types so
/// tests can inspect and damage state behind the archiver's back.
pub struct Harness {
    pub source: Arc<InMemoryEventSource>,
    pub backend: Arc<MemoryBackend>,
    pub catalog: Arc<InMemoryCatalog>,
    pub archiver: Archiver,
}

impl Harness {
    pub fn new(config: ArchiverConfig, events: Vec<AuditEvent>) -> ArchiveResult<Self> {
        Self::build(config, events, None)
    }

    pub fn with_envelope(
        config: ArchiverConfig,
        events: Vec<AuditEvent>,
        envelope: Arc<dyn Envelope>,
    ) -> ArchiveResult<Self> {
        Self::build(config, events, Some(envelope))
    }

    fn build(
        config: ArchiverConfig,
        events: Vec<AuditEvent>,
        envelope: Option<Arc<dyn Envelope>>,
    ) -> ArchiveResult<Self> {
        let source = Arc::new(InMemoryEventSource::from_events(events)?);
        let backend = Arc::new(MemoryBackend::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        let store: Arc<dyn ObjectStore> = Arc::new(MultipartTransfer::new(
            Arc::clone(&backend),
            TransferConfig::from(&config),
        ));

        let source_dyn: Arc<dyn EventSource> = source.clone();
        let catalog_dyn: Arc<dyn ArchiveCatalog> = catalog.clone();
        let archiver = match envelope {
            Some(envelope) => {
                Archiver::with_envelope(config, source_dyn, store, catalog_dyn, envelope)?
            }
            None => Archiver::new(config, source_dyn, store, catalog_dyn)?,
        };

        Ok(Self {
            source,
            backend,
            catalog,
            archiver,
        })
    }
}

/// Configuration shared by the scenarios: small parts so every batch is a
/// real multipart upload, and millisecond retry delays.
pub fn scenario_config(batch_size: usize) -> ArchiverConfig {
    ArchiverConfig::default()
        .with_batch_size(batch_size)
        .with_row_group_size(250)
        .with_part_size(16 * 1024)
        .with_max_concurrency(4)
        .with_fast_retries()
}

//! Capability traits for the coldchain archival pipeline.
//!
//! The archiver depends only on these four seams:
//!
//! - `EventSource`: the live audit store (read pages, mark, re-insert)
//! - `ObjectStore`: untrusted bulk storage for encoded batches
//! - `ArchiveCatalog`: trusted metadata, the single source of truth
//! - `Envelope`: optional encryption applied to stored bytes
//!
//! Provider-specific adapters (filesystem, in-memory, an S3-compatible
//! service) implement them; nothing in the orchestrator names a provider.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use coldchain_contracts::{
    archive::{ArchiveBatch, ChainHead, SequenceRange},
    error::ArchiveResult,
    event::{AuditEvent, EventPage},
};

/// The live audit-event store.
///
/// Reads are cursor-based: `after` is the last sequence of the previous
/// page, so concurrent inserts never shift or duplicate what a run sees.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Return up to `limit` events with `occurred_at < cutoff` and
    /// `sequence > after`, in strictly increasing sequence order.
    ///
    /// Read-only. Never deletes anything.
    async fn fetch_older_than(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<u64>,
        limit: usize,
    ) -> ArchiveResult<EventPage>;

    /// Remove the events in `range` from the live store.
    ///
    /// The archiver only calls this after the batch covering `range` has a
    /// durable catalog record. Returns the number of events removed.
    async fn mark_archived(&self, range: SequenceRange) -> ArchiveResult<u64>;

    /// Re-insert one event through the store's write path.
    ///
    /// Inserting a sequence that is already present is an error.
    async fn restore(&self, event: &AuditEvent) -> ArchiveResult<()>;
}

/// Object storage for encoded archive files.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key` and return the stored size.
    ///
    /// Either the whole object becomes visible or nothing does. When
    /// `cancel` fires mid-transfer the upload is abandoned and
    /// `ArchiveError::Cancelled` is returned.
    async fn upload(&self, key: &str, bytes: Bytes, cancel: &CancellationToken)
        -> ArchiveResult<u64>;

    /// Read the object at `key`. A missing key is `ArchiveError::NotFound`.
    async fn download(&self, key: &str) -> ArchiveResult<Bytes>;

    /// Delete the object at `key`. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> ArchiveResult<()>;
}

/// Durable archive metadata.
///
/// Object storage is always checked against the catalog, never the reverse.
#[async_trait]
pub trait ArchiveCatalog: Send + Sync {
    /// Atomically record a new batch. Duplicate archive ids are rejected.
    async fn record(&self, batch: &ArchiveBatch) -> ArchiveResult<()>;

    async fn lookup(&self, archive_id: &str) -> ArchiveResult<Option<ArchiveBatch>>;

    /// Every recorded batch, in the order it was recorded.
    async fn list_all(&self) -> ArchiveResult<Vec<ArchiveBatch>>;

    /// Batches whose time range overlaps the inclusive `[start, end]`.
    async fn list_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ArchiveResult<Vec<ArchiveBatch>>;

    /// Batches whose time range starts in `year`.
    async fn list_by_year(&self, year: i32) -> ArchiveResult<Vec<ArchiveBatch>>;

    /// Terminal hash of the most recently recorded batch ever, including
    /// batches that have since expired.
    async fn chain_head(&self) -> ArchiveResult<Option<ChainHead>>;

    /// Drop the record for `archive_id`. Only the expiration cycle calls this.
    async fn remove(&self, archive_id: &str) -> ArchiveResult<()>;
}

/// Encryption applied after encoding and removed before decoding.
///
/// Key management lives with the host; the engine only calls these two
/// methods.
pub trait Envelope: Send + Sync {
    fn seal(&self, archive_id: &str, plaintext: Bytes) -> ArchiveResult<Bytes>;

    fn open(&self, archive_id: &str, sealed: Bytes) -> ArchiveResult<Bytes>;
}

//! Error taxonomy for the coldchain archival pipeline.
//!
//! All fallible operations return `ArchiveResult<T>`. The variants follow the
//! failure classes the orchestrator has to tell apart: transient storage
//! faults are retried at the transfer layer, everything else propagates.

use thiserror::Error;

/// The unified error type for the coldchain engine.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// A network or storage fault that may succeed if retried (5xx, reset).
    #[error("transient storage failure: {reason}")]
    Transient { reason: String },

    /// A single network operation exceeded its per-operation timeout.
    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The storage provider rejected our credentials or permissions.
    #[error("storage access denied: {reason}")]
    AccessDenied { reason: String },

    /// The storage provider refused the write because a quota is exhausted.
    #[error("storage quota exceeded: {reason}")]
    QuotaExceeded { reason: String },

    /// An archive id, object key, or event that was asked for does not exist.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// The columnar file could not be produced or read back.
    #[error("archive file is structurally invalid: {reason}")]
    Structural { reason: String },

    /// Verification ran and the archive failed at least one check.
    #[error("integrity check failed for archive {archive_id}: {reason}")]
    IntegrityFailed { archive_id: String, reason: String },

    /// The live event store failed a read, mark, or restore call.
    #[error("event source error: {reason}")]
    Source { reason: String },

    /// The archive catalog could not be read or written.
    #[error("catalog error: {reason}")]
    Catalog { reason: String },

    /// A configuration value is missing or outside its valid range.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// An event read from the source violates an engine invariant.
    #[error("invalid event at sequence {sequence}: {reason}")]
    InvalidEvent { sequence: u64, reason: String },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// One page of an archive run failed. Pages committed before it remain valid.
    #[error(
        "archive page aborted after {batches_committed} committed batch(es) \
         ({events_archived} events): {cause}"
    )]
    PageAborted {
        events_archived: u64,
        batches_committed: usize,
        #[source]
        cause: Box<ArchiveError>,
    },
}

impl ArchiveError {
    /// True for failures the transfer layer is allowed to retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }
}

/// Convenience alias used throughout the coldchain crates.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

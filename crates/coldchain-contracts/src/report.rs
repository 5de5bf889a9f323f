//! Operation results returned by the archiver.
//!
//! None of these are persisted; they are computed on demand and handed to
//! the caller, which may log or print them.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of verifying one archive against its catalog record.
///
/// The three checks are independent: a structurally damaged file and a
/// tampered chain are reported separately even when both are true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityVerificationResult {
    pub archive_id: String,
    /// Conjunction of the three checks below.
    pub is_valid: bool,
    /// Number of events decoded from the stored object.
    pub event_count: u64,
    pub hash_chain_valid: bool,
    /// Decoded count, time range, and digest match the catalog record.
    pub metadata_valid: bool,
    /// The Parquet file decoded cleanly and every footer checksum matched.
    pub parquet_valid: bool,
    /// Position of the first event whose hash does not reproduce.
    pub first_divergent_index: Option<usize>,
    /// Specific discrepancies, in the order they were found.
    pub errors: Vec<String>,
}

impl IntegrityVerificationResult {
    /// Start a result with every check passing; checks then clear flags.
    pub fn passing(archive_id: impl Into<String>) -> Self {
        Self {
            archive_id: archive_id.into(),
            is_valid: true,
            event_count: 0,
            hash_chain_valid: true,
            metadata_valid: true,
            parquet_valid: true,
            first_divergent_index: None,
            errors: Vec::new(),
        }
    }

    /// Recompute `is_valid` from the three check flags.
    pub fn seal(mut self) -> Self {
        self.is_valid = self.hash_chain_valid && self.metadata_valid && self.parquet_valid;
        self
    }
}

/// Outcome of restoring one archive into the live store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreResult {
    pub archive_id: String,
    /// Events successfully re-inserted.
    pub events_restored: u64,
    /// Events the archive holds, i.e. what a full restore would insert.
    pub events_to_restore: u64,
    pub dry_run: bool,
    /// Verification run against the downloaded data before any insert.
    pub verification_status: IntegrityVerificationResult,
    #[serde(with = "duration_ms")]
    pub restore_time: Duration,
    /// Per-event insertion failures and verification failures.
    pub errors: Vec<String>,
}

impl RestoreResult {
    /// True when verification passed and every event was inserted.
    pub fn is_complete(&self) -> bool {
        self.verification_status.is_valid && self.errors.is_empty()
    }
}

/// Per-year aggregate inside `ArchiveStats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearStats {
    pub archives: u64,
    pub events: u64,
    pub size_bytes: u64,
}

/// Aggregate statistics over every batch in the catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveStats {
    pub total_archives: u64,
    pub total_events: u64,
    pub total_size_bytes: u64,
    pub total_uncompressed_bytes: u64,
    pub average_archive_size_bytes: f64,
    /// Uncompressed bytes divided by stored bytes; 0.0 with nothing stored.
    pub compression_ratio: f64,
    /// Earliest `occurred_at` covered by any archive.
    pub oldest_archive: Option<DateTime<Utc>>,
    /// Latest `occurred_at` covered by any archive.
    pub newest_archive: Option<DateTime<Utc>>,
    pub by_year: BTreeMap<i32, YearStats>,
    pub by_compliance_flag: BTreeMap<String, u64>,
}

/// Summary of one `archive` invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveRunReport {
    /// Events committed (or, in a dry run, that would be committed).
    pub events_archived: u64,
    /// Archive ids created, in chain order. Always empty for a dry run.
    pub batches: Vec<String>,
    pub pages_processed: u64,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
    pub events_per_second: f64,
    pub dry_run: bool,
    /// The run stopped early on a cancellation signal.
    pub cancelled: bool,
}

/// Summary of one expiration cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpirationReport {
    pub expired: Vec<String>,
    pub retained: u64,
    pub errors: Vec<String>,
}

/// Serialize `Duration` as integer milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

//! Archive batch metadata as recorded in the catalog.
//!
//! An `ArchiveBatch` is written once, atomically, when a page has been
//! encoded and uploaded. It is the ground truth that verification and
//! restoration check the stored object against.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inclusive span of `occurred_at` values covered by a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// True if the two inclusive ranges share at least one instant.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start <= end && start <= self.end
    }
}

/// Inclusive span of source sequence numbers covered by a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceRange {
    pub first: u64,
    pub last: u64,
}

impl SequenceRange {
    pub fn contains(&self, sequence: u64) -> bool {
        self.first <= sequence && sequence <= self.last
    }
}

/// Where a batch's object lives in object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocation {
    pub bucket: String,
    pub key: String,
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Compression profile applied to each row group.
///
/// Expressed in TOML as `"none"`, `"fast"`, `"balanced"` or `"maximal"`.
/// The codec names are accepted as aliases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Compression {
    None,
    /// Snappy: lowest CPU cost.
    #[serde(alias = "snappy")]
    Fast,
    /// Zstd level 3.
    #[default]
    #[serde(alias = "zstd")]
    Balanced,
    /// Zstd level 19: smallest files, slowest writes.
    Maximal,
}

impl Compression {
    /// Every supported profile, for tests and diagnostics.
    pub const ALL: [Compression; 4] = [
        Compression::None,
        Compression::Fast,
        Compression::Balanced,
        Compression::Maximal,
    ];

    /// The algorithm identifier stored in catalog records.
    pub fn identifier(&self) -> &'static str {
        match self {
            Self::None => "uncompressed",
            Self::Fast => "snappy",
            Self::Balanced => "zstd(3)",
            Self::Maximal => "zstd(19)",
        }
    }
}

/// Catalog record for one archived batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveBatch {
    pub archive_id: String,
    pub time_range: TimeRange,
    pub sequence_range: SequenceRange,
    pub event_count: u64,
    /// SHA-256 over the seed and every event hash in order.
    pub batch_digest: String,
    pub storage_location: StorageLocation,
    pub compression: Compression,
    pub row_group_size: usize,
    /// Bytes actually stored (after compression and sealing).
    pub size_bytes: u64,
    /// Sum of the canonical event byte lengths before encoding.
    pub uncompressed_bytes: u64,
    pub created_at: DateTime<Utc>,
    /// Previous batch's terminal hash, or `GENESIS_HASH`.
    pub seed_hash: String,
    /// Hash of the last event in this batch.
    pub terminal_hash: String,
    #[serde(default)]
    pub encrypted: bool,
    /// Number of events carrying each compliance tag.
    #[serde(default)]
    pub compliance_flag_counts: BTreeMap<String, u64>,
}

/// The most recently recorded batch's terminal hash.
///
/// The next batch ever created must use `terminal_hash` as its seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    pub archive_id: String,
    pub terminal_hash: String,
}

/// Explicit authorization for the destructive expiration cycle.
///
/// Callers construct this deliberately (the CLI requires `--confirm`); the
/// archiver refuses to expire anything without one.
#[derive(Debug, Clone)]
pub struct ExpirationGrant {
    /// Who or what authorized the expiration, recorded in logs.
    pub authorized_by: String,
}

impl ExpirationGrant {
    pub fn new(authorized_by: impl Into<String>) -> Self {
        Self {
            authorized_by: authorized_by.into(),
        }
    }
}

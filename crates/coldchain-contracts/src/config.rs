//! Validated archiver configuration.
//!
//! The engine never reads files or the environment itself. Hosts build an
//! `ArchiverConfig` (directly or by deserializing TOML) and the archiver
//! rejects it at construction time if any value is out of range.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::archive::Compression;
use crate::error::{ArchiveError, ArchiveResult};

/// Smallest multipart part the transfer layer accepts.
pub const MIN_PART_SIZE_BYTES: usize = 1024;

/// Longest accepted retention window, one hundred years.
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Which object-storage backend the host wires in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageProvider {
    /// Process-local store, for tests and dry experiments.
    #[default]
    Memory,
    /// A directory on the local filesystem.
    LocalFs,
}

/// Object-storage placement settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub provider: StorageProvider,
    pub bucket: String,
    /// Root directory for `local-fs`. Ignored by other providers.
    pub root: Option<PathBuf>,
    /// Prefix prepended to every object key.
    pub key_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::Memory,
            bucket: "audit-archive".to_string(),
            root: None,
            key_prefix: "audit-events".to_string(),
        }
    }
}

/// Every tunable the archival engine consumes.
///
/// Example in TOML:
/// ```toml
/// batch_size = 10000
/// compression = "balanced"
/// retention_days = 2555
///
/// [storage]
/// provider = "local-fs"
/// bucket = "audit-archive"
/// root = "/var/lib/coldchain/objects"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiverConfig {
    pub storage: StorageConfig,
    /// Maximum events per archive batch.
    pub batch_size: usize,
    pub compression: Compression,
    /// Rows per Parquet row group.
    pub row_group_size: usize,
    /// How long archives are kept before `expire` may delete them.
    pub retention_days: u32,
    /// Ceiling on concurrent part uploads for one object.
    pub max_concurrency: usize,
    pub part_size_bytes: usize,
    /// Timeout applied to each network call, not to a whole run.
    pub operation_timeout_secs: u64,
    /// Retries for transient failures, on top of the first attempt.
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Seal objects with the host-provided envelope before upload.
    pub encryption: bool,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            batch_size: 10_000,
            compression: Compression::Balanced,
            row_group_size: 1_000,
            retention_days: 2_555,
            max_concurrency: 4,
            part_size_bytes: 8 * 1024 * 1024,
            operation_timeout_secs: 300,
            max_retries: 3,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 10_000,
            encryption: false,
        }
    }
}

impl ArchiverConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_row_group_size(mut self, row_group_size: usize) -> Self {
        self.row_group_size = row_group_size;
        self
    }

    pub fn with_part_size(mut self, part_size_bytes: usize) -> Self {
        self.part_size_bytes = part_size_bytes;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_encryption(mut self, enabled: bool) -> Self {
        self.encryption = enabled;
        self
    }

    /// Shrink retry delays to a few milliseconds. Intended for tests.
    pub fn with_fast_retries(mut self) -> Self {
        self.retry_base_delay_ms = 1;
        self.retry_max_delay_ms = 5;
        self
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    /// Reject out-of-range values.
    ///
    /// Returns `ArchiveError::ConfigError` naming the first offending field.
    pub fn validate(&self) -> ArchiveResult<()> {
        fn reject(reason: String) -> ArchiveResult<()> {
            Err(ArchiveError::ConfigError { reason })
        }

        if self.batch_size == 0 {
            return reject("batch_size must be greater than 0".to_string());
        }
        if self.row_group_size == 0 {
            return reject("row_group_size must be greater than 0".to_string());
        }
        if self.retention_days == 0 {
            return reject("retention_days must be greater than 0".to_string());
        }
        if self.retention_days > MAX_RETENTION_DAYS {
            return reject(format!(
                "retention_days must be at most {MAX_RETENTION_DAYS}, got {}",
                self.retention_days
            ));
        }
        if self.max_concurrency == 0 {
            return reject("max_concurrency must be at least 1".to_string());
        }
        if self.part_size_bytes < MIN_PART_SIZE_BYTES {
            return reject(format!(
                "part_size_bytes must be at least {MIN_PART_SIZE_BYTES}, got {}",
                self.part_size_bytes
            ));
        }
        if self.operation_timeout_secs == 0 {
            return reject("operation_timeout_secs must be greater than 0".to_string());
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return reject(format!(
                "retry_max_delay_ms ({}) is below retry_base_delay_ms ({})",
                self.retry_max_delay_ms, self.retry_base_delay_ms
            ));
        }
        if self.storage.bucket.trim().is_empty() {
            return reject("storage.bucket must not be empty".to_string());
        }
        if self.storage.provider == StorageProvider::LocalFs && self.storage.root.is_none() {
            return reject("storage.root is required for the local-fs provider".to_string());
        }
        Ok(())
    }
}

//! Structural decode failures.
//!
//! These describe damage to the file itself. They are reported separately
//! from hash-chain mismatches, which indicate tampering with content.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The Parquet footer could not be parsed, usually a truncated object.
    #[error("corrupt or truncated footer: {reason}")]
    CorruptFooter { reason: String },

    /// A required footer key-value entry is absent or unparseable.
    #[error("footer metadata '{key}' is missing or malformed")]
    MissingFooterMetadata { key: String },

    /// The file schema does not match the archive schema.
    #[error("schema mismatch: {reason}")]
    SchemaMismatch { reason: String },

    /// A row group failed to read or decompress.
    #[error("row group {row_group} unreadable: {reason}")]
    Unreadable { row_group: usize, reason: String },

    /// Recomputed column checksum differs from the one in the footer.
    #[error("checksum mismatch in row group {row_group}, column '{column}'")]
    ChecksumMismatch { row_group: usize, column: String },

    /// A cell decoded but holds a value the archive format never writes.
    #[error("row group {row_group}: invalid value in column '{column}': {reason}")]
    InvalidValue {
        row_group: usize,
        column: String,
        reason: String,
    },

    /// Footer and file disagree on how many rows exist.
    #[error("footer declares {expected} rows but {actual} were decoded")]
    RowCountMismatch { expected: u64, actual: u64 },
}

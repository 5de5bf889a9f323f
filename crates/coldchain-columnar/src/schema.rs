//! Archive file schema, footer metadata, and per-column checksums.
//!
//! The schema here is the contract for analytical readers of cold storage
//! (DuckDB, Spark, Athena). Keep changes backwards-compatible and bump
//! `FORMAT_VERSION` when the layout changes.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema};
use parquet::basic::{Compression as ParquetCompression, ZstdLevel};
use parquet::format::KeyValue;
use sha2::{Digest, Sha256};

use coldchain_contracts::archive::Compression;
use coldchain_contracts::error::{ArchiveError, ArchiveResult};
use coldchain_contracts::event::ChainedEvent;

use crate::error::DecodeError;

pub const FORMAT_VERSION: &str = "1";

pub(crate) const KEY_FORMAT_VERSION: &str = "coldchain.format_version";
pub(crate) const KEY_ARCHIVE_ID: &str = "coldchain.archive_id";
pub(crate) const KEY_EVENT_COUNT: &str = "coldchain.event_count";
pub(crate) const KEY_ROW_GROUP_SIZE: &str = "coldchain.row_group_size";
pub(crate) const KEY_COMPRESSION: &str = "coldchain.compression";
pub(crate) const KEY_CHECKSUMS: &str = "coldchain.column_checksums";

/// Column names in file order.
pub const COLUMNS: [&str; 9] = [
    "sequence",
    "occurred_at_us",
    "actor",
    "action",
    "resource",
    "payload",
    "compliance_flags",
    "prev_hash",
    "event_hash",
];

/// The Arrow schema every archive file is written with.
pub fn archive_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("sequence", DataType::UInt64, false),
        Field::new("occurred_at_us", DataType::Int64, false),
        Field::new("actor", DataType::Utf8, false),
        Field::new("action", DataType::Utf8, false),
        Field::new("resource", DataType::Utf8, false),
        Field::new("payload", DataType::Binary, false),
        Field::new("compliance_flags", DataType::Utf8, false),
        Field::new("prev_hash", DataType::Utf8, false),
        Field::new("event_hash", DataType::Utf8, false),
    ]))
}

/// Map a compression profile onto the Parquet codec.
pub(crate) fn parquet_compression(compression: Compression) -> ArchiveResult<ParquetCompression> {
    let zstd = |level: i32| {
        ZstdLevel::try_new(level)
            .map(ParquetCompression::ZSTD)
            .map_err(|e| ArchiveError::ConfigError {
                reason: format!("invalid zstd level {level}: {e}"),
            })
    };

    match compression {
        Compression::None => Ok(ParquetCompression::UNCOMPRESSED),
        Compression::Fast => Ok(ParquetCompression::SNAPPY),
        Compression::Balanced => zstd(3),
        Compression::Maximal => zstd(19),
    }
}

/// Compliance flags as a JSON array string. Sorted because the set is.
pub(crate) fn flags_json(event: &ChainedEvent) -> String {
    serde_json::Value::Array(
        event
            .event
            .compliance_flags
            .iter()
            .map(|f| serde_json::Value::String(f.clone()))
            .collect(),
    )
    .to_string()
}

/// One SHA-256 per column over the given rows, in `COLUMNS` order.
pub(crate) fn column_checksums(rows: &[ChainedEvent]) -> Vec<String> {
    let mut hashers: Vec<Sha256> = COLUMNS.iter().map(|_| Sha256::new()).collect();

    for row in rows {
        let flags = flags_json(row);
        let sequence = row.event.sequence.to_le_bytes();
        let occurred_at = row.event.occurred_at.timestamp_micros().to_le_bytes();
        let cells: [&[u8]; 9] = [
            &sequence,
            &occurred_at,
            row.event.actor.as_bytes(),
            row.event.action.as_bytes(),
            row.event.resource.as_bytes(),
            &row.event.payload,
            flags.as_bytes(),
            row.prev_hash.as_bytes(),
            row.event_hash.as_bytes(),
        ];
        for (hasher, cell) in hashers.iter_mut().zip(cells) {
            hasher.update((cell.len() as u32).to_le_bytes());
            hasher.update(cell);
        }
    }

    hashers.into_iter().map(|h| hex::encode(h.finalize())).collect()
}

/// Self-describing metadata stored in the Parquet footer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FooterMetadata {
    pub format_version: String,
    pub archive_id: String,
    pub event_count: u64,
    pub row_group_size: usize,
    /// Compression identifier, as recorded in the catalog.
    pub compression: String,
    /// `checksums[row_group][column]`.
    pub checksums: Vec<Vec<String>>,
}

impl FooterMetadata {
    pub(crate) fn to_key_values(&self) -> Vec<KeyValue> {
        let checksums = serde_json::Value::Array(
            self.checksums
                .iter()
                .map(|group| {
                    serde_json::Value::Array(
                        group.iter().map(|c| serde_json::Value::String(c.clone())).collect(),
                    )
                })
                .collect(),
        );

        [
            (KEY_FORMAT_VERSION, self.format_version.clone()),
            (KEY_ARCHIVE_ID, self.archive_id.clone()),
            (KEY_EVENT_COUNT, self.event_count.to_string()),
            (KEY_ROW_GROUP_SIZE, self.row_group_size.to_string()),
            (KEY_COMPRESSION, self.compression.clone()),
            (KEY_CHECKSUMS, checksums.to_string()),
        ]
        .into_iter()
        .map(|(key, value)| KeyValue {
            key: key.to_string(),
            value: Some(value),
        })
        .collect()
    }

    pub(crate) fn from_key_values(entries: Option<&Vec<KeyValue>>) -> Result<Self, DecodeError> {
        let map: HashMap<&str, &str> = entries
            .map(|kvs| {
                kvs.iter()
                    .filter_map(|kv| kv.value.as_deref().map(|v| (kv.key.as_str(), v)))
                    .collect()
            })
            .unwrap_or_default();

        let get = |key: &str| {
            map.get(key).copied().ok_or_else(|| DecodeError::MissingFooterMetadata {
                key: key.to_string(),
            })
        };
        let malformed = |key: &str| DecodeError::MissingFooterMetadata {
            key: key.to_string(),
        };

        let format_version = get(KEY_FORMAT_VERSION)?.to_string();
        if format_version != FORMAT_VERSION {
            return Err(DecodeError::SchemaMismatch {
                reason: format!(
                    "unsupported archive format version '{format_version}', expected '{FORMAT_VERSION}'"
                ),
            });
        }

        Ok(Self {
            format_version,
            archive_id: get(KEY_ARCHIVE_ID)?.to_string(),
            event_count: get(KEY_EVENT_COUNT)?
                .parse()
                .map_err(|_| malformed(KEY_EVENT_COUNT))?,
            row_group_size: get(KEY_ROW_GROUP_SIZE)?
                .parse()
                .map_err(|_| malformed(KEY_ROW_GROUP_SIZE))?,
            compression: get(KEY_COMPRESSION)?.to_string(),
            checksums: serde_json::from_str(get(KEY_CHECKSUMS)?)
                .map_err(|_| malformed(KEY_CHECKSUMS))?,
        })
    }
}

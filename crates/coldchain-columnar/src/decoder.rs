//! Parquet reader for archive files.
//!
//! Decoding never fails outright. It returns whatever events it could read
//! together with every structural problem it found, so the verifier can
//! report file damage and chain tampering side by side.

use std::collections::BTreeSet;

use arrow::array::{Array as _, BinaryArray, Int64Array, StringArray, UInt64Array};
use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::DateTime;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::{debug, warn};

use coldchain_contracts::event::{AuditEvent, ChainedEvent};

use crate::error::DecodeError;
use crate::schema::{archive_schema, column_checksums, FooterMetadata, COLUMNS};

/// Rows per Arrow batch when reading a row group. Also caps preallocation,
/// since footer row counts are untrusted until the checksums match.
const READ_BATCH_ROWS: usize = 8192;

/// Everything recovered from one archive file.
#[derive(Debug, Clone, Default)]
pub struct DecodedArchive {
    /// Events from every readable row group, in file order.
    pub events: Vec<ChainedEvent>,
    /// Present when the footer metadata parsed.
    pub footer: Option<FooterMetadata>,
    pub row_groups: usize,
    /// The footer parsed and the schema matched, so rows could be read.
    pub readable: bool,
    /// Structural problems. Empty means the file is well-formed.
    pub errors: Vec<DecodeError>,
}

impl DecodedArchive {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Decode an archive file produced by `encode`.
pub fn decode(bytes: &Bytes) -> DecodedArchive {
    let mut out = DecodedArchive::default();

    let builder = match ParquetRecordBatchReaderBuilder::try_new(bytes.clone()) {
        Ok(builder) => builder,
        Err(e) => {
            warn!(bytes = bytes.len(), error = %e, "archive footer unreadable");
            out.errors.push(DecodeError::CorruptFooter {
                reason: e.to_string(),
            });
            return out;
        }
    };

    if let Err(e) = check_schema(builder.schema()) {
        out.errors.push(e);
        return out;
    }

    let metadata = builder.metadata().clone();
    drop(builder);
    out.readable = true;

    let footer = match FooterMetadata::from_key_values(metadata.file_metadata().key_value_metadata())
    {
        Ok(footer) => Some(footer),
        Err(e) => {
            out.errors.push(e);
            None
        }
    };

    // Every row stores its own SHA-256 event hash, so an honest file never
    // holds more rows than bytes, nor more than its footer declares.
    let mut row_budget = footer
        .as_ref()
        .map_or(u64::MAX, |f| f.event_count)
        .min(bytes.len() as u64);
    let mut declared_rows: u64 = 0;

    out.row_groups = metadata.num_row_groups();
    for row_group in 0..out.row_groups {
        let declared = metadata.row_group(row_group).num_rows();
        declared_rows = declared_rows.saturating_add(u64::try_from(declared).unwrap_or(u64::MAX));
        let Some(rows) = row_allowance(declared, row_budget) else {
            warn!(row_group, declared, row_budget, "row group declares an implausible row count");
            out.errors.push(DecodeError::RowCountMismatch {
                expected: footer.as_ref().map_or(row_budget, |f| f.event_count),
                actual: declared_rows,
            });
            continue;
        };
        row_budget -= rows as u64;

        let events = match read_row_group(bytes, row_group, rows) {
            Ok(events) => events,
            Err(e) => {
                out.errors.push(e);
                continue;
            }
        };

        if let Some(footer) = &footer {
            match footer.checksums.get(row_group) {
                Some(expected) => {
                    let actual = column_checksums(&events);
                    for (column, (want, got)) in COLUMNS.iter().zip(expected.iter().zip(&actual)) {
                        if want != got {
                            out.errors.push(DecodeError::ChecksumMismatch {
                                row_group,
                                column: (*column).to_string(),
                            });
                        }
                    }
                    if expected.len() != COLUMNS.len() {
                        out.errors.push(DecodeError::MissingFooterMetadata {
                            key: format!("column checksums for row group {row_group}"),
                        });
                    }
                }
                None => out.errors.push(DecodeError::MissingFooterMetadata {
                    key: format!("column checksums for row group {row_group}"),
                }),
            }
        }

        out.events.extend(events);
    }

    if let Some(footer) = &footer {
        if footer.checksums.len() > out.row_groups {
            out.errors.push(DecodeError::RowCountMismatch {
                expected: footer.checksums.len() as u64,
                actual: out.row_groups as u64,
            });
        }
        if footer.event_count != out.events.len() as u64 {
            out.errors.push(DecodeError::RowCountMismatch {
                expected: footer.event_count,
                actual: out.events.len() as u64,
            });
        }
    }
    out.footer = footer;

    debug!(
        events = out.events.len(),
        row_groups = out.row_groups,
        errors = out.errors.len(),
        "archive file decoded"
    );
    out
}

/// Rows to read from a row group declaring `declared`, or `None` when the
/// count is negative or exceeds what the file can plausibly hold.
pub(crate) fn row_allowance(declared: i64, budget: u64) -> Option<usize> {
    let rows = u64::try_from(declared).ok()?;
    if rows > budget {
        return None;
    }
    usize::try_from(rows).ok()
}

fn check_schema(actual: &Schema) -> Result<(), DecodeError> {
    for expected in archive_schema().fields() {
        let field = actual
            .field_with_name(expected.name())
            .map_err(|_| DecodeError::SchemaMismatch {
                reason: format!("missing column '{}'", expected.name()),
            })?;
        if field.data_type() != expected.data_type() {
            return Err(DecodeError::SchemaMismatch {
                reason: format!(
                    "column '{}' has type {}, expected {}",
                    expected.name(),
                    field.data_type(),
                    expected.data_type()
                ),
            });
        }
    }
    Ok(())
}

fn read_row_group(
    bytes: &Bytes,
    row_group: usize,
    rows: usize,
) -> Result<Vec<ChainedEvent>, DecodeError> {
    let unreadable = |e: parquet::errors::ParquetError| DecodeError::Unreadable {
        row_group,
        reason: e.to_string(),
    };

    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes.clone())
        .map_err(unreadable)?
        .with_row_groups(vec![row_group])
        .with_batch_size(rows.clamp(1, READ_BATCH_ROWS))
        .build()
        .map_err(unreadable)?;

    let mut events = Vec::with_capacity(rows.min(READ_BATCH_ROWS));
    for batch in reader {
        let batch = batch.map_err(|e| DecodeError::Unreadable {
            row_group,
            reason: e.to_string(),
        })?;
        append_rows(&batch, row_group, &mut events)?;
    }
    Ok(events)
}

fn append_rows(
    batch: &RecordBatch,
    row_group: usize,
    out: &mut Vec<ChainedEvent>,
) -> Result<(), DecodeError> {
    let sequence = column::<UInt64Array>(batch, "sequence")?;
    let occurred_at_us = column::<Int64Array>(batch, "occurred_at_us")?;
    let actor = column::<StringArray>(batch, "actor")?;
    let action = column::<StringArray>(batch, "action")?;
    let resource = column::<StringArray>(batch, "resource")?;
    let payload = column::<BinaryArray>(batch, "payload")?;
    let flags = column::<StringArray>(batch, "compliance_flags")?;
    let prev_hash = column::<StringArray>(batch, "prev_hash")?;
    let event_hash = column::<StringArray>(batch, "event_hash")?;

    let invalid = |column: &str, reason: String| DecodeError::InvalidValue {
        row_group,
        column: column.to_string(),
        reason,
    };

    for row in 0..batch.num_rows() {
        let micros = occurred_at_us.value(row);
        let occurred_at = DateTime::from_timestamp_micros(micros)
            .ok_or_else(|| invalid("occurred_at_us", format!("{micros} is out of range")))?;
        let compliance_flags: BTreeSet<String> = serde_json::from_str(flags.value(row))
            .map_err(|e| invalid("compliance_flags", e.to_string()))?;

        out.push(ChainedEvent {
            event: AuditEvent {
                sequence: sequence.value(row),
                occurred_at,
                actor: actor.value(row).to_string(),
                action: action.value(row).to_string(),
                resource: resource.value(row).to_string(),
                payload: payload.value(row).to_vec(),
                compliance_flags,
            },
            prev_hash: prev_hash.value(row).to_string(),
            event_hash: event_hash.value(row).to_string(),
        });
    }
    Ok(())
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T, DecodeError> {
    let idx = batch
        .schema()
        .index_of(name)
        .map_err(|e| DecodeError::SchemaMismatch {
            reason: format!("missing column '{name}': {e}"),
        })?;

    batch
        .column(idx)
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| DecodeError::SchemaMismatch {
            reason: format!("column '{name}' has an unexpected array type"),
        })
}

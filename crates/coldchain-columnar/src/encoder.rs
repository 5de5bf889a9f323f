//! Parquet writer for chained audit events.

use std::sync::Arc;

use arrow::array::{BinaryArray, Int64Array, StringArray, UInt64Array};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use tracing::debug;

use coldchain_contracts::archive::Compression;
use coldchain_contracts::error::{ArchiveError, ArchiveResult};
use coldchain_contracts::event::ChainedEvent;

use crate::schema::{
    archive_schema, column_checksums, flags_json, parquet_compression, FooterMetadata,
    FORMAT_VERSION,
};

/// Parameters for one archive file.
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// Written into the footer so an object can be matched to its catalog record.
    pub archive_id: String,
    pub compression: Compression,
    pub row_group_size: usize,
}

fn structural(message: String) -> ArchiveError {
    ArchiveError::Structural { reason: message }
}

/// Encode `events` into a Parquet file.
///
/// Each block of `row_group_size` events becomes its own row group,
/// compressed independently, with one checksum per column recorded in the
/// footer.
///
/// # Errors
///
/// Returns `ArchiveError::ConfigError` for a zero row-group size and
/// `ArchiveError::Structural` if the Parquet write fails.
pub fn encode(events: &[ChainedEvent], options: &EncodeOptions) -> ArchiveResult<Bytes> {
    if options.row_group_size == 0 {
        return Err(ArchiveError::ConfigError {
            reason: "row_group_size must be greater than 0".to_string(),
        });
    }
    let checksums = events
        .chunks(options.row_group_size)
        .map(column_checksums)
        .collect();
    encode_with_checksums(events, options, checksums)
}

pub(crate) fn encode_with_checksums(
    events: &[ChainedEvent],
    options: &EncodeOptions,
    checksums: Vec<Vec<String>>,
) -> ArchiveResult<Bytes> {
    let footer = FooterMetadata {
        format_version: FORMAT_VERSION.to_string(),
        archive_id: options.archive_id.clone(),
        event_count: events.len() as u64,
        row_group_size: options.row_group_size,
        compression: options.compression.identifier().to_string(),
        checksums,
    };

    let props = WriterProperties::builder()
        .set_compression(parquet_compression(options.compression)?)
        .set_max_row_group_size(options.row_group_size)
        .set_created_by(format!("coldchain-columnar {}", env!("CARGO_PKG_VERSION")))
        .set_key_value_metadata(Some(footer.to_key_values()))
        .build();

    let schema = archive_schema();
    let mut buffer = Vec::<u8>::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, schema.clone(), Some(props))
        .map_err(|e| structural(format!("parquet writer init failed: {e}")))?;

    for chunk in events.chunks(options.row_group_size) {
        let batch = to_record_batch(chunk)?;
        writer
            .write(&batch)
            .map_err(|e| structural(format!("parquet write failed: {e}")))?;
        // Close the row group so its boundary matches the checksum block.
        writer
            .flush()
            .map_err(|e| structural(format!("parquet row group flush failed: {e}")))?;
    }
    writer
        .close()
        .map_err(|e| structural(format!("parquet close failed: {e}")))?;

    debug!(
        archive_id = %options.archive_id,
        events = events.len(),
        bytes = buffer.len(),
        compression = options.compression.identifier(),
        "archive file encoded"
    );

    Ok(Bytes::from(buffer))
}

fn to_record_batch(rows: &[ChainedEvent]) -> ArchiveResult<RecordBatch> {
    let sequence = UInt64Array::from(rows.iter().map(|r| r.event.sequence).collect::<Vec<_>>());
    let occurred_at = Int64Array::from(
        rows.iter()
            .map(|r| r.event.occurred_at.timestamp_micros())
            .collect::<Vec<_>>(),
    );
    let actor = StringArray::from(rows.iter().map(|r| r.event.actor.as_str()).collect::<Vec<_>>());
    let action =
        StringArray::from(rows.iter().map(|r| r.event.action.as_str()).collect::<Vec<_>>());
    let resource =
        StringArray::from(rows.iter().map(|r| r.event.resource.as_str()).collect::<Vec<_>>());
    let payload =
        BinaryArray::from(rows.iter().map(|r| r.event.payload.as_slice()).collect::<Vec<_>>());
    let flags = StringArray::from(rows.iter().map(flags_json).collect::<Vec<_>>());
    let prev_hash =
        StringArray::from(rows.iter().map(|r| r.prev_hash.as_str()).collect::<Vec<_>>());
    let event_hash =
        StringArray::from(rows.iter().map(|r| r.event_hash.as_str()).collect::<Vec<_>>());

    RecordBatch::try_new(
        archive_schema(),
        vec![
            Arc::new(sequence),
            Arc::new(occurred_at),
            Arc::new(actor),
            Arc::new(action),
            Arc::new(resource),
            Arc::new(payload),
            Arc::new(flags),
            Arc::new(prev_hash),
            Arc::new(event_hash),
        ],
    )
    .map_err(|e| structural(format!("record batch build failed: {e}")))
}

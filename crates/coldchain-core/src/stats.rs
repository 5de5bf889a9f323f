//! Aggregate statistics over catalog records.
//!
//! Everything here is computed from `ArchiveBatch` metadata alone; no object
//! is downloaded.

use chrono::Datelike;

use coldchain_contracts::{
    archive::ArchiveBatch,
    report::{ArchiveStats, YearStats},
};

/// Fold `batches` into an `ArchiveStats`.
pub fn aggregate(batches: &[ArchiveBatch]) -> ArchiveStats {
    let mut stats = ArchiveStats::default();

    for batch in batches {
        stats.total_archives += 1;
        stats.total_events += batch.event_count;
        stats.total_size_bytes += batch.size_bytes;
        stats.total_uncompressed_bytes += batch.uncompressed_bytes;

        stats.oldest_archive = Some(match stats.oldest_archive {
            Some(oldest) => oldest.min(batch.time_range.start),
            None => batch.time_range.start,
        });
        stats.newest_archive = Some(match stats.newest_archive {
            Some(newest) => newest.max(batch.time_range.end),
            None => batch.time_range.end,
        });

        let year = stats
            .by_year
            .entry(batch.time_range.start.year())
            .or_insert_with(YearStats::default);
        year.archives += 1;
        year.events += batch.event_count;
        year.size_bytes += batch.size_bytes;

        for (flag, count) in &batch.compliance_flag_counts {
            *stats.by_compliance_flag.entry(flag.clone()).or_insert(0) += count;
        }
    }

    if stats.total_archives > 0 {
        stats.average_archive_size_bytes =
            stats.total_size_bytes as f64 / stats.total_archives as f64;
    }
    if stats.total_size_bytes > 0 {
        stats.compression_ratio =
            stats.total_uncompressed_bytes as f64 / stats.total_size_bytes as f64;
    }

    stats
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{TimeZone, Utc};

    use coldchain_contracts::archive::{
        Compression, SequenceRange, StorageLocation, TimeRange,
    };
    use coldchain_contracts::event::GENESIS_HASH;

    use super::*;

    fn batch(year: i32, events: u64, size: u64, raw: u64, flags: &[(&str, u64)]) -> ArchiveBatch {
        ArchiveBatch {
            archive_id: format!("batch-{year}-{events}"),
            time_range: TimeRange {
                start: Utc.with_ymd_and_hms(year, 1, 10, 0, 0, 0).unwrap(),
                end: Utc.with_ymd_and_hms(year, 2, 10, 0, 0, 0).unwrap(),
            },
            sequence_range: SequenceRange { first: 1, last: events },
            event_count: events,
            batch_digest: "digest".to_string(),
            storage_location: StorageLocation {
                bucket: "b".to_string(),
                key: "k".to_string(),
            },
            compression: Compression::Balanced,
            row_group_size: 100,
            size_bytes: size,
            uncompressed_bytes: raw,
            created_at: Utc::now(),
            seed_hash: GENESIS_HASH.to_string(),
            terminal_hash: "t".to_string(),
            encrypted: false,
            compliance_flag_counts: flags
                .iter()
                .map(|(f, c)| (f.to_string(), *c))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_empty_catalog() {
        let stats = aggregate(&[]);
        assert_eq!(stats.total_archives, 0);
        assert_eq!(stats.compression_ratio, 0.0);
        assert_eq!(stats.average_archive_size_bytes, 0.0);
        assert!(stats.oldest_archive.is_none());
        assert!(stats.by_year.is_empty());
    }

    #[test]
    fn test_totals_and_ratio() {
        let stats = aggregate(&[
            batch(2021, 1000, 400, 4000, &[("pci", 3)]),
            batch(2021, 500, 200, 2000, &[("pci", 1), ("gdpr", 7)]),
            batch(2022, 250, 400, 1000, &[]),
        ]);

        assert_eq!(stats.total_archives, 3);
        assert_eq!(stats.total_events, 1750);
        assert_eq!(stats.total_size_bytes, 1000);
        assert_eq!(stats.total_uncompressed_bytes, 7000);
        assert!((stats.compression_ratio - 7.0).abs() < f64::EPSILON);
        assert!((stats.average_archive_size_bytes - 1000.0 / 3.0).abs() < 1e-9);

        assert_eq!(
            stats.by_year[&2021],
            YearStats { archives: 2, events: 1500, size_bytes: 600 }
        );
        assert_eq!(stats.by_year[&2022].archives, 1);
        assert_eq!(stats.by_compliance_flag["pci"], 4);
        assert_eq!(stats.by_compliance_flag["gdpr"], 7);
    }

    #[test]
    fn test_oldest_and_newest_span_all_batches() {
        let stats = aggregate(&[batch(2022, 1, 1, 1, &[]), batch(2020, 1, 1, 1, &[])]);
        assert_eq!(
            stats.oldest_archive,
            Some(Utc.with_ymd_and_hms(2020, 1, 10, 0, 0, 0).unwrap())
        );
        assert_eq!(
            stats.newest_archive,
            Some(Utc.with_ymd_and_hms(2022, 2, 10, 0, 0, 0).unwrap())
        );
    }
}

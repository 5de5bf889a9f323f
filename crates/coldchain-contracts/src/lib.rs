//! # coldchain-contracts
//!
//! Shared types, error taxonomy, and configuration for the coldchain
//! audit-event archival engine.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate, only data definitions, errors, and configuration validation.

pub mod archive;
pub mod config;
pub mod error;
pub mod event;
pub mod report;

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use archive::{Compression, SequenceRange, TimeRange};
    use config::{ArchiverConfig, StorageProvider};
    use error::ArchiveError;
    use event::{AuditEvent, MAX_PAYLOAD_BYTES};
    use report::IntegrityVerificationResult;

    // ── AuditEvent ───────────────────────────────────────────────────────────

    #[test]
    fn audit_event_new_truncates_to_micros() {
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let event = AuditEvent::new(1, ts, "rider:1", "trip.requested", "trip/1", vec![]);

        assert_eq!(event.occurred_at.timestamp_subsec_nanos(), 123_456_000);
        assert!(event.validate().is_ok());
    }

    #[test]
    fn audit_event_deserialize_truncates_to_micros() {
        let json = r#"{"sequence":7,"occurred_at":"2020-01-01T00:00:00.123456789Z",
            "actor":"rider:1","action":"trip.requested","resource":"trip/7","payload":[]}"#;
        let event: AuditEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.occurred_at.timestamp_subsec_nanos(), 123_456_000);
        assert!(event.validate().is_ok());
    }

    #[test]
    fn audit_event_normalized_drops_nanos() {
        let mut event = AuditEvent::new(1, Utc::now(), "a", "b", "c", vec![]);
        event.occurred_at = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap()
            + chrono::Duration::nanoseconds(999);
        assert!(event.validate().is_err());
        let event = event.normalized();
        assert_eq!(event.occurred_at.timestamp_subsec_nanos(), 0);
        assert!(event.validate().is_ok());
    }

    #[test]
    fn audit_event_rejects_oversized_payload() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let event = AuditEvent::new(7, ts, "a", "b", "c", vec![0u8; MAX_PAYLOAD_BYTES + 1]);

        match event.validate() {
            Err(ArchiveError::InvalidEvent { sequence, reason }) => {
                assert_eq!(sequence, 7);
                assert!(reason.contains("payload"));
            }
            other => panic!("expected InvalidEvent, got {:?}", other),
        }
    }

    #[test]
    fn audit_event_flags_are_sorted_and_deduplicated() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let event = AuditEvent::new(1, ts, "a", "b", "c", vec![])
            .with_flag("consent-change")
            .with_flag("data-subject-request")
            .with_flag("consent-change");

        let flags: Vec<&str> = event.compliance_flags.iter().map(String::as_str).collect();
        assert_eq!(flags, vec!["consent-change", "data-subject-request"]);
    }

    // ── Ranges ───────────────────────────────────────────────────────────────

    #[test]
    fn time_range_overlap_is_inclusive() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        let range = TimeRange { start, end };

        assert!(range.overlaps(end, end + chrono::Duration::days(1)));
        assert!(!range.overlaps(end + chrono::Duration::seconds(1), end + chrono::Duration::days(2)));
    }

    #[test]
    fn sequence_range_contains_bounds() {
        let range = SequenceRange { first: 10, last: 20 };
        assert!(range.contains(10));
        assert!(range.contains(20));
        assert!(!range.contains(21));
    }

    // ── Compression serde ────────────────────────────────────────────────────

    #[test]
    fn compression_accepts_codec_aliases() {
        let fast: Compression = serde_json::from_str("\"snappy\"").unwrap();
        let balanced: Compression = serde_json::from_str("\"zstd\"").unwrap();
        let maximal: Compression = serde_json::from_str("\"maximal\"").unwrap();

        assert_eq!(fast, Compression::Fast);
        assert_eq!(balanced, Compression::Balanced);
        assert_eq!(maximal, Compression::Maximal);
        assert_eq!(Compression::default(), Compression::Balanced);
    }

    // ── Config validation ────────────────────────────────────────────────────

    #[test]
    fn default_config_is_valid() {
        assert!(ArchiverConfig::default().validate().is_ok());
    }

    #[test]
    fn config_rejects_zero_batch_size() {
        let err = ArchiverConfig::default().with_batch_size(0).validate().unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn config_rejects_zero_concurrency() {
        let err = ArchiverConfig::default()
            .with_max_concurrency(0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("max_concurrency"));
    }

    #[test]
    fn config_rejects_unbounded_retention() {
        let mut config = ArchiverConfig::default();
        config.retention_days = 200_000_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("retention_days"));

        config.retention_days = config::MAX_RETENTION_DAYS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_rejects_tiny_parts() {
        let err = ArchiverConfig::default().with_part_size(16).validate().unwrap_err();
        assert!(err.to_string().contains("part_size_bytes"));
    }

    #[test]
    fn config_requires_root_for_local_fs() {
        let mut config = ArchiverConfig::default();
        config.storage.provider = StorageProvider::LocalFs;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("storage.root"));
    }

    #[test]
    fn config_fills_defaults_from_partial_json() {
        let config: ArchiverConfig =
            serde_json::from_str(r#"{ "batch_size": 500, "compression": "fast" }"#).unwrap();

        assert_eq!(config.batch_size, 500);
        assert_eq!(config.compression, Compression::Fast);
        assert_eq!(config.row_group_size, 1_000);
        assert_eq!(config.max_concurrency, 4);
    }

    // ── Verification result ──────────────────────────────────────────────────

    #[test]
    fn seal_requires_all_three_checks() {
        let mut result = IntegrityVerificationResult::passing("a-1");
        assert!(result.clone().seal().is_valid);

        result.metadata_valid = false;
        assert!(!result.seal().is_valid);
    }

    // ── ArchiveError display messages ────────────────────────────────────────

    #[test]
    fn error_integrity_failed_names_archive() {
        let err = ArchiveError::IntegrityFailed {
            archive_id: "arch-42".to_string(),
            reason: "hash chain diverges at index 3".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("arch-42"));
        assert!(msg.contains("index 3"));
    }

    #[test]
    fn error_transient_classification() {
        assert!(ArchiveError::Transient { reason: "503".into() }.is_transient());
        assert!(ArchiveError::Timeout {
            operation: "upload part 1".into(),
            timeout_ms: 10
        }
        .is_transient());
        assert!(!ArchiveError::AccessDenied { reason: "403".into() }.is_transient());
        assert!(!ArchiveError::NotFound { what: "k".into() }.is_transient());
    }

    #[test]
    fn error_page_aborted_carries_cause() {
        let err = ArchiveError::PageAborted {
            events_archived: 2000,
            batches_committed: 2,
            cause: Box::new(ArchiveError::QuotaExceeded {
                reason: "bucket full".into(),
            }),
        };
        let msg = err.to_string();
        assert!(msg.contains("2 committed batch"));
        assert!(msg.contains("bucket full"));
        assert!(std::error::Error::source(&err).is_some());
    }
}

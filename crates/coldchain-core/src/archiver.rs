//! The coldchain archiver: moves aging audit events into verified cold storage.
//!
//! Each operation is a small state machine over the capability traits:
//!
//!   archive: Fetch → Chain → Encode → [Seal] → Upload → Record → Mark
//!   verify:  Lookup → Download → [Open] → Decode → Chain check → Metadata check
//!   restore: verify → Re-insert (per event, failures collected)
//!
//! The ordering in `archive` is the durability guarantee: the source is only
//! marked after the catalog record exists, so a crash leaves duplicates in the
//! live store, never a gap. Pages run strictly one after another because each
//! page's seed is the previous page's terminal hash.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use coldchain_audit::{batch_digest, build_chain, canonical_bytes, verify_chain};
use coldchain_columnar::{decode, encode, DecodedArchive, EncodeOptions};
use coldchain_contracts::{
    archive::{ArchiveBatch, ExpirationGrant, SequenceRange, StorageLocation, TimeRange},
    config::ArchiverConfig,
    error::{ArchiveError, ArchiveResult},
    event::{AuditEvent, ChainedEvent, GENESIS_HASH},
    report::{
        ArchiveRunReport, ArchiveStats, ExpirationReport, IntegrityVerificationResult,
        RestoreResult,
    },
};

use crate::keys::archive_key;
use crate::stats;
use crate::traits::{ArchiveCatalog, Envelope, EventSource, ObjectStore};

/// Parameters for one `archive` run.
#[derive(Debug, Clone)]
pub struct ArchiveRequest {
    /// Only events with `occurred_at` strictly before this are archived.
    pub cutoff: DateTime<Utc>,
    /// Overrides `ArchiverConfig::batch_size` for this run.
    pub batch_size: Option<usize>,
    pub dry_run: bool,
}

impl ArchiveRequest {
    pub fn older_than(cutoff: DateTime<Utc>) -> Self {
        Self {
            cutoff,
            batch_size: None,
            dry_run: false,
        }
    }

    /// Archive everything that occurred more than `days` days before `now`.
    ///
    /// Returns `ArchiveError::ConfigError` when the cutoff falls outside the
    /// representable date range.
    pub fn older_than_days(days: u32, now: DateTime<Utc>) -> ArchiveResult<Self> {
        let cutoff = days_before(now, days).ok_or_else(|| ArchiveError::ConfigError {
            reason: format!("--older-than-days {days} reaches before the earliest supported date"),
        })?;
        Ok(Self::older_than(cutoff))
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// A page that has been validated and chained but not yet written anywhere.
struct PreparedPage {
    seed_hash: String,
    events: Vec<ChainedEvent>,
    terminal_hash: String,
    time_range: TimeRange,
    sequence_range: SequenceRange,
    uncompressed_bytes: u64,
}

/// The orchestrator. One instance per configured deployment.
///
/// Holds no chain state between calls: the seed for a new run is read from
/// the catalog's chain head, so a restarted process resumes the chain.
pub struct Archiver {
    config: ArchiverConfig,
    source: Arc<dyn EventSource>,
    store: Arc<dyn ObjectStore>,
    catalog: Arc<dyn ArchiveCatalog>,
    envelope: Option<Arc<dyn Envelope>>,
}

impl Archiver {
    /// Build an archiver without encryption support.
    ///
    /// # Errors
    ///
    /// `ArchiveError::ConfigError` if the configuration is out of range or
    /// enables encryption.
    pub fn new(
        config: ArchiverConfig,
        source: Arc<dyn EventSource>,
        store: Arc<dyn ObjectStore>,
        catalog: Arc<dyn ArchiveCatalog>,
    ) -> ArchiveResult<Self> {
        Self::build(config, source, store, catalog, None)
    }

    /// Build an archiver that can seal and open encrypted archives.
    pub fn with_envelope(
        config: ArchiverConfig,
        source: Arc<dyn EventSource>,
        store: Arc<dyn ObjectStore>,
        catalog: Arc<dyn ArchiveCatalog>,
        envelope: Arc<dyn Envelope>,
    ) -> ArchiveResult<Self> {
        Self::build(config, source, store, catalog, Some(envelope))
    }

    fn build(
        config: ArchiverConfig,
        source: Arc<dyn EventSource>,
        store: Arc<dyn ObjectStore>,
        catalog: Arc<dyn ArchiveCatalog>,
        envelope: Option<Arc<dyn Envelope>>,
    ) -> ArchiveResult<Self> {
        config.validate()?;
        if config.encryption && envelope.is_none() {
            return Err(ArchiveError::ConfigError {
                reason: "encryption is enabled but no envelope was provided".to_string(),
            });
        }
        Ok(Self {
            config,
            source,
            store,
            catalog,
            envelope,
        })
    }

    pub fn config(&self) -> &ArchiverConfig {
        &self.config
    }

    // ── Archive ──────────────────────────────────────────────────────────────

    /// Archive every event older than `request.cutoff`, one page at a time.
    ///
    /// A dry run walks the same pages and builds the same chains but performs
    /// no upload, catalog write, or source mark.
    ///
    /// # Errors
    ///
    /// A failing page returns `ArchiveError::PageAborted`. Pages committed
    /// before it stay committed and are counted in the error. Cancellation is
    /// not an error: the report comes back with `cancelled = true`.
    pub async fn archive(
        &self,
        request: &ArchiveRequest,
        cancel: &CancellationToken,
    ) -> ArchiveResult<ArchiveRunReport> {
        let batch_size = request.batch_size.unwrap_or(self.config.batch_size);
        if batch_size == 0 {
            return Err(ArchiveError::ConfigError {
                reason: "batch_size must be greater than 0".to_string(),
            });
        }

        let started = Instant::now();
        let mut report = ArchiveRunReport {
            dry_run: request.dry_run,
            ..ArchiveRunReport::default()
        };

        let mut seed = match self.catalog.chain_head().await? {
            Some(head) => head.terminal_hash,
            None => GENESIS_HASH.to_string(),
        };
        let mut cursor: Option<u64> = None;

        info!(
            cutoff = %request.cutoff,
            batch_size,
            dry_run = request.dry_run,
            seed_hash = %seed,
            "archive run starting"
        );

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            // ── Step 1: Fetch ────────────────────────────────────────────────
            let page = self
                .source
                .fetch_older_than(request.cutoff, cursor, batch_size)
                .await
                .map_err(|e| page_aborted(&report, e))?;

            // ── Step 2: Stop on an empty page ────────────────────────────────
            if page.events.is_empty() {
                break;
            }
            let has_more = page.has_more;

            // ── Step 3: Chain ────────────────────────────────────────────────
            let prepared =
                prepare_page(&seed, cursor, page.events).map_err(|e| page_aborted(&report, e))?;
            cursor = Some(prepared.sequence_range.last);

            if request.dry_run {
                debug!(
                    first_sequence = prepared.sequence_range.first,
                    last_sequence = prepared.sequence_range.last,
                    events = prepared.events.len(),
                    "dry run page chained"
                );
                report.events_archived += prepared.events.len() as u64;
                report.pages_processed += 1;
                seed = prepared.terminal_hash;
            } else {
                // ── Steps 4-5: Encode, upload, record ────────────────────────
                let batch = match self.commit_page(prepared, cancel).await {
                    Ok(batch) => batch,
                    Err(ArchiveError::Cancelled) => {
                        report.cancelled = true;
                        break;
                    }
                    Err(e) => return Err(page_aborted(&report, e)),
                };
                seed = batch.terminal_hash.clone();
                report.events_archived += batch.event_count;
                report.pages_processed += 1;
                report.batches.push(batch.archive_id.clone());

                // ── Step 6: Mark the source, only now that the record is durable ─
                let removed = self
                    .source
                    .mark_archived(batch.sequence_range)
                    .await
                    .map_err(|e| page_aborted(&report, e))?;
                debug!(archive_id = %batch.archive_id, removed, "source events marked archived");
            }

            if !has_more {
                break;
            }
        }

        report.elapsed = started.elapsed();
        let secs = report.elapsed.as_secs_f64();
        if secs > 0.0 {
            report.events_per_second = report.events_archived as f64 / secs;
        }

        info!(
            events_archived = report.events_archived,
            batches = report.batches.len(),
            pages = report.pages_processed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            events_per_second = report.events_per_second,
            dry_run = report.dry_run,
            cancelled = report.cancelled,
            "archive run finished"
        );
        Ok(report)
    }

    /// Encode, upload, and record one page.
    ///
    /// If the catalog write fails after the upload succeeded, the object is
    /// deleted so storage holds nothing the catalog does not know about.
    async fn commit_page(
        &self,
        page: PreparedPage,
        cancel: &CancellationToken,
    ) -> ArchiveResult<ArchiveBatch> {
        let archive_id = Uuid::new_v4().to_string();

        let encoded = encode(
            &page.events,
            &EncodeOptions {
                archive_id: archive_id.clone(),
                compression: self.config.compression,
                row_group_size: self.config.row_group_size,
            },
        )?;
        let body = self.seal(&archive_id, encoded)?;

        let key = archive_key(&self.config.storage.key_prefix, &page.time_range, &archive_id);
        let size_bytes = self.store.upload(&key, body, cancel).await?;

        let batch = ArchiveBatch {
            archive_id: archive_id.clone(),
            time_range: page.time_range,
            sequence_range: page.sequence_range,
            event_count: page.events.len() as u64,
            batch_digest: batch_digest(&page.seed_hash, &page.events),
            storage_location: StorageLocation {
                bucket: self.config.storage.bucket.clone(),
                key: key.clone(),
            },
            compression: self.config.compression,
            row_group_size: self.config.row_group_size,
            size_bytes,
            uncompressed_bytes: page.uncompressed_bytes,
            created_at: Utc::now(),
            seed_hash: page.seed_hash,
            terminal_hash: page.terminal_hash,
            encrypted: self.config.encryption,
            compliance_flag_counts: flag_counts(&page.events),
        };

        if let Err(e) = self.catalog.record(&batch).await {
            warn!(
                archive_id = %archive_id,
                key = %key,
                error = %e,
                "catalog record failed, deleting uploaded object"
            );
            if let Err(cleanup) = self.store.delete(&key).await {
                warn!(key = %key, error = %cleanup, "orphaned object could not be deleted");
            }
            return Err(e);
        }

        info!(
            archive_id = %archive_id,
            key = %key,
            event_count = batch.event_count,
            size_bytes,
            seed_hash = %batch.seed_hash,
            terminal_hash = %batch.terminal_hash,
            "archive batch committed"
        );
        Ok(batch)
    }

    fn seal(&self, archive_id: &str, encoded: Bytes) -> ArchiveResult<Bytes> {
        match (&self.envelope, self.config.encryption) {
            (Some(envelope), true) => envelope.seal(archive_id, encoded),
            _ => Ok(encoded),
        }
    }

    // ── Verify ───────────────────────────────────────────────────────────────

    /// Check a stored archive against its catalog record.
    ///
    /// # Errors
    ///
    /// `ArchiveError::NotFound` for an unknown archive id. A missing or
    /// damaged object is not an error; it is reported in the result.
    pub async fn verify_integrity(
        &self,
        archive_id: &str,
        cancel: &CancellationToken,
    ) -> ArchiveResult<IntegrityVerificationResult> {
        let batch = self.lookup(archive_id).await?;
        let (result, _) = self.check_archive(&batch, cancel).await?;

        if result.is_valid {
            info!(archive_id = %archive_id, events = result.event_count, "archive verified");
        } else {
            warn!(
                archive_id = %archive_id,
                parquet_valid = result.parquet_valid,
                hash_chain_valid = result.hash_chain_valid,
                metadata_valid = result.metadata_valid,
                errors = %result.errors.join("; "),
                "integrity check failed"
            );
        }
        Ok(result)
    }

    async fn lookup(&self, archive_id: &str) -> ArchiveResult<ArchiveBatch> {
        self.catalog
            .lookup(archive_id)
            .await?
            .ok_or_else(|| ArchiveError::NotFound {
                what: format!("archive {archive_id}"),
            })
    }

    /// Run all three checks and hand back the decoded events for restore.
    async fn check_archive(
        &self,
        batch: &ArchiveBatch,
        cancel: &CancellationToken,
    ) -> ArchiveResult<(IntegrityVerificationResult, Vec<ChainedEvent>)> {
        let mut result = IntegrityVerificationResult::passing(&batch.archive_id);

        let downloaded = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ArchiveError::Cancelled),
            downloaded = self.store.download(&batch.storage_location.key) => downloaded,
        };
        let stored = match downloaded {
            Ok(bytes) => bytes,
            Err(ArchiveError::NotFound { .. }) => {
                mark_unreadable(
                    &mut result,
                    format!("object {} is missing from storage", batch.storage_location),
                );
                return Ok((result.seal(), Vec::new()));
            }
            Err(e) => return Err(e),
        };

        let plain = if batch.encrypted {
            let envelope = self.envelope.as_ref().ok_or_else(|| ArchiveError::ConfigError {
                reason: format!(
                    "archive {} is encrypted but no envelope is configured",
                    batch.archive_id
                ),
            })?;
            match envelope.open(&batch.archive_id, stored) {
                Ok(plain) => plain,
                Err(e) => {
                    mark_unreadable(&mut result, format!("envelope could not be opened: {e}"));
                    return Ok((result.seal(), Vec::new()));
                }
            }
        } else {
            stored
        };

        // ── Structural ───────────────────────────────────────────────────────
        let decoded = decode(&plain);
        result.event_count = decoded.events.len() as u64;
        if !decoded.is_clean() {
            result.parquet_valid = false;
            result
                .errors
                .extend(decoded.errors.iter().map(|e| format!("parquet: {e}")));
        }
        if !decoded.readable {
            result.hash_chain_valid = false;
            result.metadata_valid = false;
            result
                .errors
                .push("hash chain and metadata not checked: archive file is unreadable".to_string());
            return Ok((result.seal(), Vec::new()));
        }

        // ── Hash chain ───────────────────────────────────────────────────────
        let chain = verify_chain(&batch.seed_hash, &decoded.events, &batch.terminal_hash);
        if !chain.valid {
            result.hash_chain_valid = false;
            result.first_divergent_index = chain.first_divergent_index;
            let index = chain.first_divergent_index.unwrap_or(0);
            match decoded.events.get(index) {
                Some(event) => result.errors.push(format!(
                    "hash chain diverges at event index {index} (sequence {})",
                    event.event.sequence
                )),
                None => result
                    .errors
                    .push(format!("hash chain diverges at event index {index}")),
            }
        }

        // ── Metadata ─────────────────────────────────────────────────────────
        check_metadata(batch, &decoded, &mut result);

        Ok((result.seal(), decoded.events))
    }

    // ── Restore ──────────────────────────────────────────────────────────────

    /// Verify an archive and re-insert its events into the live store.
    ///
    /// Nothing is inserted unless all three checks pass. Per-event insertion
    /// failures are collected in `errors` and the remaining events are still
    /// attempted. A dry run verifies and reports `events_to_restore` only.
    pub async fn restore(
        &self,
        archive_id: &str,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> ArchiveResult<RestoreResult> {
        let started = Instant::now();
        let batch = self.lookup(archive_id).await?;
        let (verification, events) = self.check_archive(&batch, cancel).await?;

        let mut result = RestoreResult {
            archive_id: archive_id.to_string(),
            events_restored: 0,
            events_to_restore: 0,
            dry_run,
            verification_status: verification,
            restore_time: Duration::ZERO,
            errors: Vec::new(),
        };

        if !result.verification_status.is_valid {
            result.errors = result.verification_status.errors.clone();
            result.restore_time = started.elapsed();
            warn!(
                archive_id = %archive_id,
                errors = %result.errors.join("; "),
                "restore refused, archive failed verification"
            );
            return Ok(result);
        }

        result.events_to_restore = events.len() as u64;
        if dry_run {
            result.restore_time = started.elapsed();
            info!(
                archive_id = %archive_id,
                events_to_restore = result.events_to_restore,
                "restore dry run complete"
            );
            return Ok(result);
        }

        for chained in &events {
            if cancel.is_cancelled() {
                result.errors.push(format!(
                    "restore cancelled after {} of {} events",
                    result.events_restored, result.events_to_restore
                ));
                break;
            }
            match self.source.restore(&chained.event).await {
                Ok(()) => result.events_restored += 1,
                Err(e) => {
                    warn!(
                        archive_id = %archive_id,
                        sequence = chained.event.sequence,
                        error = %e,
                        "event insert failed"
                    );
                    result
                        .errors
                        .push(format!("sequence {}: {e}", chained.event.sequence));
                }
            }
        }

        result.restore_time = started.elapsed();
        info!(
            archive_id = %archive_id,
            events_restored = result.events_restored,
            failures = result.errors.len(),
            "restore finished"
        );
        Ok(result)
    }

    // ── Stats ────────────────────────────────────────────────────────────────

    /// Aggregate statistics over every batch in the catalog.
    pub async fn stats(&self) -> ArchiveResult<ArchiveStats> {
        let batches = self.catalog.list_all().await?;
        Ok(stats::aggregate(&batches))
    }

    /// Statistics restricted to batches starting in `year`.
    pub async fn stats_for_year(&self, year: i32) -> ArchiveResult<ArchiveStats> {
        let batches = self.catalog.list_by_year(year).await?;
        Ok(stats::aggregate(&batches))
    }

    /// Statistics restricted to batches overlapping `[start, end]`.
    pub async fn stats_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ArchiveResult<ArchiveStats> {
        let batches = self.catalog.list_in_range(start, end).await?;
        Ok(stats::aggregate(&batches))
    }

    // ── Expire ───────────────────────────────────────────────────────────────

    /// Delete archives whose newest event is older than the retention window.
    ///
    /// The object goes first, then the catalog record; a batch whose object
    /// delete fails keeps its record so a later cycle retries it. The chain
    /// head is unaffected.
    pub async fn expire(
        &self,
        now: DateTime<Utc>,
        grant: &ExpirationGrant,
        cancel: &CancellationToken,
    ) -> ArchiveResult<ExpirationReport> {
        let threshold =
            days_before(now, self.config.retention_days).ok_or_else(|| ArchiveError::ConfigError {
                reason: format!(
                    "retention_days {} reaches before the earliest supported date",
                    self.config.retention_days
                ),
            })?;
        info!(
            authorized_by = %grant.authorized_by,
            threshold = %threshold,
            retention_days = self.config.retention_days,
            "expiration cycle starting"
        );

        let mut report = ExpirationReport::default();
        for batch in self.catalog.list_all().await? {
            if batch.time_range.end >= threshold {
                report.retained += 1;
                continue;
            }
            if cancel.is_cancelled() {
                report.errors.push("expiration cancelled".to_string());
                break;
            }

            if let Err(e) = self.store.delete(&batch.storage_location.key).await {
                warn!(archive_id = %batch.archive_id, error = %e, "object delete failed");
                report
                    .errors
                    .push(format!("{}: object delete failed: {e}", batch.archive_id));
                continue;
            }
            if let Err(e) = self.catalog.remove(&batch.archive_id).await {
                warn!(archive_id = %batch.archive_id, error = %e, "catalog remove failed");
                report
                    .errors
                    .push(format!("{}: catalog remove failed: {e}", batch.archive_id));
                continue;
            }

            info!(
                archive_id = %batch.archive_id,
                end = %batch.time_range.end,
                authorized_by = %grant.authorized_by,
                "archive expired"
            );
            report.expired.push(batch.archive_id);
        }

        info!(
            expired = report.expired.len(),
            retained = report.retained,
            errors = report.errors.len(),
            "expiration cycle finished"
        );
        Ok(report)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn page_aborted(report: &ArchiveRunReport, cause: ArchiveError) -> ArchiveError {
    ArchiveError::PageAborted {
        events_archived: report.events_archived,
        batches_committed: report.batches.len(),
        cause: Box::new(cause),
    }
}

/// `now` minus `days` whole days, or `None` outside chrono's date range.
fn days_before(now: DateTime<Utc>, days: u32) -> Option<DateTime<Utc>> {
    chrono::Duration::try_days(i64::from(days)).and_then(|span| now.checked_sub_signed(span))
}

/// Validate and chain a page. `after` is the cursor the page was fetched with.
///
/// Timestamps are truncated to microseconds first; that is the precision the
/// hash and the columnar file both carry.
fn prepare_page(
    seed_hash: &str,
    after: Option<u64>,
    events: Vec<AuditEvent>,
) -> ArchiveResult<PreparedPage> {
    let events: Vec<AuditEvent> = events.into_iter().map(AuditEvent::normalized).collect();
    let mut previous = after;
    let mut uncompressed_bytes = 0u64;
    for event in &events {
        event.validate()?;
        if previous.is_some_and(|p| event.sequence <= p) {
            return Err(ArchiveError::InvalidEvent {
                sequence: event.sequence,
                reason: "sequence is not strictly increasing".to_string(),
            });
        }
        previous = Some(event.sequence);
        uncompressed_bytes += canonical_bytes(event).len() as u64;
    }

    let (time_range, sequence_range) = match (events.first(), events.last()) {
        (Some(first), Some(last)) => (
            TimeRange {
                start: events.iter().map(|e| e.occurred_at).min().unwrap_or(first.occurred_at),
                end: events.iter().map(|e| e.occurred_at).max().unwrap_or(last.occurred_at),
            },
            SequenceRange {
                first: first.sequence,
                last: last.sequence,
            },
        ),
        _ => {
            return Err(ArchiveError::Source {
                reason: "cannot archive an empty page".to_string(),
            })
        }
    };

    let chain = build_chain(seed_hash, events);
    Ok(PreparedPage {
        seed_hash: seed_hash.to_string(),
        events: chain.events,
        terminal_hash: chain.terminal_hash,
        time_range,
        sequence_range,
        uncompressed_bytes,
    })
}

fn flag_counts(events: &[ChainedEvent]) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for flag in events.iter().flat_map(|e| &e.event.compliance_flags) {
        *counts.entry(flag.clone()).or_insert(0) += 1;
    }
    counts
}

fn mark_unreadable(result: &mut IntegrityVerificationResult, reason: String) {
    result.parquet_valid = false;
    result.hash_chain_valid = false;
    result.metadata_valid = false;
    result.errors.push(reason);
}

/// Compare what was decoded against what the catalog recorded.
fn check_metadata(
    batch: &ArchiveBatch,
    decoded: &DecodedArchive,
    result: &mut IntegrityVerificationResult,
) {
    let mut fail = |message: String| {
        result.metadata_valid = false;
        result.errors.push(message);
    };
    let events = &decoded.events;

    if events.len() as u64 != batch.event_count {
        fail(format!(
            "event count {} does not match catalog ({})",
            events.len(),
            batch.event_count
        ));
    }

    let start = events.iter().map(|e| e.event.occurred_at).min();
    let end = events.iter().map(|e| e.event.occurred_at).max();
    if let (Some(start), Some(end)) = (start, end) {
        if start != batch.time_range.start || end != batch.time_range.end {
            fail(format!(
                "time range {start}..{end} does not match catalog ({}..{})",
                batch.time_range.start, batch.time_range.end
            ));
        }
    }

    if let (Some(first), Some(last)) = (events.first(), events.last()) {
        let (first, last) = (first.event.sequence, last.event.sequence);
        if first != batch.sequence_range.first || last != batch.sequence_range.last {
            fail(format!(
                "sequence range {first}..{last} does not match catalog ({}..{})",
                batch.sequence_range.first, batch.sequence_range.last
            ));
        }
    }

    if batch_digest(&batch.seed_hash, events) != batch.batch_digest {
        fail("batch digest does not match catalog".to_string());
    }

    if let Some(footer) = &decoded.footer {
        if footer.archive_id != batch.archive_id {
            fail(format!(
                "file footer names archive {}, catalog expects {}",
                footer.archive_id, batch.archive_id
            ));
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

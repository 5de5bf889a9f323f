//! Scenario A: Archive a Backlog
//!
//! A marketplace has let 2 500 audit events age past the 90-day hot window.
//! One archive run moves them into cold storage in three batches:
//!
//!   Batch 1: events    1..=1000   seed = GENESIS
//!   Batch 2: events 1001..=2000   seed = terminal hash of batch 1
//!   Batch 3: events 2001..=2500   seed = terminal hash of batch 2
//!
//! Every batch gets a catalog record before its events leave the live store,
//! and the seeds link the batches into one unbroken chain.

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;

use coldchain_contracts::{
    archive::ArchiveBatch, error::ArchiveResult, report::ArchiveRunReport,
};
use coldchain_core::{traits::ArchiveCatalog, ArchiveRequest};

use super::{scenario_config, Harness};
use crate::mock_data;

pub const BACKLOG_EVENTS: usize = 2_500;
pub const BATCH_SIZE: usize = 1_000;
pub const HOT_WINDOW_DAYS: u32 = 90;

pub struct BacklogOutcome {
    pub harness: Harness,
    pub report: ArchiveRunReport,
    /// Catalog records in chain order.
    pub batches: Vec<ArchiveBatch>,
}

/// Load the backlog, archive everything older than the hot window, and
/// return the harness for inspection.
pub async fn archive_backlog(now: DateTime<Utc>) -> ArchiveResult<BacklogOutcome> {
    let events = mock_data::backlog(
        BACKLOG_EVENTS,
        now,
        Duration::days(i64::from(HOT_WINDOW_DAYS)),
    );
    let harness = Harness::new(scenario_config(BATCH_SIZE), events)?;

    let request = ArchiveRequest::older_than_days(HOT_WINDOW_DAYS, now)?;
    let report = harness
        .archiver
        .archive(&request, &CancellationToken::new())
        .await?;
    let batches = harness.catalog.list_all().await?;

    Ok(BacklogOutcome {
        harness,
        report,
        batches,
    })
}

pub async fn run() -> ArchiveResult<()> {
    println!("══════════════════════════════════════════════════════════════");
    println!("  Scenario A: Archive a Backlog");
    println!("══════════════════════════════════════════════════════════════");
    println!();

    let outcome = archive_backlog(Utc::now()).await?;

    println!(
        "  Archived {} events in {} batch(es), {} page(s), {:.0} events/s",
        outcome.report.events_archived,
        outcome.report.batches.len(),
        outcome.report.pages_processed,
        outcome.report.events_per_second
    );
    for batch in &outcome.batches {
        println!(
            "  ✓ {}  seq {}..={}  {} events  {} bytes",
            batch.archive_id,
            batch.sequence_range.first,
            batch.sequence_range.last,
            batch.event_count,
            batch.size_bytes
        );
        println!("      seed     {}", batch.seed_hash);
        println!("      terminal {}", batch.terminal_hash);
    }
    println!(
        "  Live store now holds {} event(s)",
        outcome.harness.source.len().await
    );
    println!();
    println!("  Scenario A complete.");
    println!();

    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use coldchain_audit::build_chain;
    use coldchain_contracts::event::GENESIS_HASH;

    use super::*;

    #[tokio::test]
    async fn test_backlog_splits_into_three_batches() {
        let outcome = archive_backlog(Utc::now()).await.unwrap();

        assert_eq!(outcome.report.events_archived, 2_500);
        assert_eq!(outcome.report.batches.len(), 3);
        assert!(!outcome.report.cancelled);

        let counts: Vec<u64> = outcome.batches.iter().map(|b| b.event_count).collect();
        assert_eq!(counts, vec![1_000, 1_000, 500]);
        let ids: Vec<&str> = outcome.batches.iter().map(|b| b.archive_id.as_str()).collect();
        assert_eq!(ids, outcome.report.batches.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_batches_link_into_one_chain() {
        let outcome = archive_backlog(Utc::now()).await.unwrap();
        let batches = &outcome.batches;

        assert_eq!(batches[0].seed_hash, GENESIS_HASH);
        for pair in batches.windows(2) {
            assert_eq!(pair[1].seed_hash, pair[0].terminal_hash);
        }

        let head = outcome.harness.catalog.chain_head().await.unwrap().unwrap();
        assert_eq!(head.terminal_hash, batches[2].terminal_hash);
    }

    #[tokio::test]
    async fn test_chain_matches_independent_recomputation() {
        let now = Utc::now();
        let outcome = archive_backlog(now).await.unwrap();

        let events = mock_data::backlog(
            BACKLOG_EVENTS,
            now,
            Duration::days(i64::from(HOT_WINDOW_DAYS)),
        );
        let whole = build_chain(GENESIS_HASH, events);
        assert_eq!(whole.terminal_hash, outcome.batches[2].terminal_hash);
    }

    #[tokio::test]
    async fn test_live_store_drained_and_objects_stored() {
        let outcome = archive_backlog(Utc::now()).await.unwrap();
        assert!(outcome.harness.source.is_empty().await);
        assert_eq!(outcome.harness.backend.object_count().await, 3);
        assert_eq!(outcome.harness.backend.pending_uploads().await, 0);
        for batch in &outcome.batches {
            assert!(outcome.harness.backend.contains(&batch.storage_location.key).await);
        }
    }

    #[tokio::test]
    async fn test_second_run_finds_nothing() {
        let now = Utc::now();
        let outcome = archive_backlog(now).await.unwrap();
        let again = outcome
            .harness
            .archiver
            .archive(
                &ArchiveRequest::older_than_days(HOT_WINDOW_DAYS, now).unwrap(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(again.events_archived, 0);
        assert!(again.batches.is_empty());
        assert_eq!(outcome.harness.catalog.len().await, 3);
    }
}

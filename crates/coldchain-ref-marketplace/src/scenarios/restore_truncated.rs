//! Scenario C: Restore From a Truncated Object
//!
//! A compliance request needs last year's trip records back in the live
//! store, but the stored object was cut short (an interrupted copy between
//! storage tiers, say). Restore verifies before it writes anything:
//!
//!   Step 1: archive 400 events as one batch
//!   Step 2: truncate the stored object to half its length
//!   Step 3: restore → parquet_valid = false, is_valid = false, 0 inserted
//!
//! The intact case is shown alongside for contrast.

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;

use coldchain_contracts::{
    archive::ArchiveBatch,
    error::{ArchiveError, ArchiveResult},
    report::RestoreResult,
};
use coldchain_core::{traits::ArchiveCatalog, ArchiveRequest};

use super::{scenario_config, Harness};
use crate::mock_data;

pub const ARCHIVED_EVENTS: usize = 400;

pub struct RestoreOutcome {
    pub harness: Harness,
    pub batch: ArchiveBatch,
    pub result: RestoreResult,
    /// Live-store size right before the restore attempt.
    pub live_before: usize,
    pub live_after: usize,
}

/// Archive one batch and return it, with the live store drained.
pub async fn archive_one_batch(now: DateTime<Utc>) -> ArchiveResult<(Harness, ArchiveBatch)> {
    let start = now - Duration::days(400);
    let events = mock_data::generate_events(ARCHIVED_EVENTS, 1, start, Duration::minutes(3));
    let harness = Harness::new(scenario_config(ARCHIVED_EVENTS), events)?;

    harness
        .archiver
        .archive(
            &ArchiveRequest::older_than_days(365, now)?,
            &CancellationToken::new(),
        )
        .await?;

    let batch = harness
        .catalog
        .list_all()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ArchiveError::NotFound {
            what: "archived batch".to_string(),
        })?;
    Ok((harness, batch))
}

/// Run the restore, optionally truncating the stored object first.
pub async fn restore_after_damage(now: DateTime<Utc>, truncate: bool) -> ArchiveResult<RestoreOutcome> {
    let (harness, batch) = archive_one_batch(now).await?;
    let key = &batch.storage_location.key;

    if truncate {
        let stored = harness
            .backend
            .object(key)
            .await
            .ok_or_else(|| ArchiveError::NotFound {
                what: format!("object {key}"),
            })?;
        let truncated: Bytes = stored.slice(..stored.len() / 2);
        harness.backend.put_object(key, truncated).await;
    }

    let live_before = harness.source.len().await;
    let result = harness
        .archiver
        .restore(&batch.archive_id, false, &CancellationToken::new())
        .await?;
    let live_after = harness.source.len().await;

    Ok(RestoreOutcome {
        harness,
        batch,
        result,
        live_before,
        live_after,
    })
}

pub async fn run() -> ArchiveResult<()> {
    println!("══════════════════════════════════════════════════════════════");
    println!("  Scenario C: Restore From a Truncated Object");
    println!("══════════════════════════════════════════════════════════════");
    println!();

    for (label, truncate) in [("truncated object", true), ("intact object", false)] {
        let outcome = restore_after_damage(Utc::now(), truncate).await?;
        let status = &outcome.result.verification_status;
        println!("  ── {label} ──");
        println!(
            "  parquet_valid={} is_valid={}  restored {} of {} event(s)",
            status.parquet_valid,
            status.is_valid,
            outcome.result.events_restored,
            outcome.batch.event_count
        );
        println!(
            "  live store: {} → {} event(s)",
            outcome.live_before, outcome.live_after
        );
        for error in &outcome.result.errors {
            println!("      {error}");
        }
        println!();
    }
    println!("  Scenario C complete.");
    println!();

    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

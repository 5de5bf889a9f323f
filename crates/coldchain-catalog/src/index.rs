//! In-memory catalog index shared by both catalog implementations.
//!
//! Batches are kept in record order, with secondary indexes by time-range
//! start and by year. The chain head moves forward on every insert and is
//! never rolled back by a removal.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Datelike, Utc};

use coldchain_contracts::archive::{ArchiveBatch, ChainHead};
use coldchain_contracts::error::{ArchiveError, ArchiveResult};

#[derive(Debug, Default)]
pub(crate) struct CatalogIndex {
    /// Record position → batch.
    batches: BTreeMap<u64, ArchiveBatch>,
    positions: HashMap<String, u64>,
    by_start: BTreeMap<DateTime<Utc>, BTreeSet<u64>>,
    by_year: BTreeMap<i32, BTreeSet<u64>>,
    next_position: u64,
    head: Option<ChainHead>,
}

impl CatalogIndex {
    pub(crate) fn contains(&self, archive_id: &str) -> bool {
        self.positions.contains_key(archive_id)
    }

    pub(crate) fn insert(&mut self, batch: ArchiveBatch) -> ArchiveResult<()> {
        if self.contains(&batch.archive_id) {
            return Err(ArchiveError::Catalog {
                reason: format!("archive {} is already recorded", batch.archive_id),
            });
        }

        let position = self.next_position;
        self.next_position += 1;

        self.positions.insert(batch.archive_id.clone(), position);
        self.by_start
            .entry(batch.time_range.start)
            .or_default()
            .insert(position);
        self.by_year
            .entry(batch.time_range.start.year())
            .or_default()
            .insert(position);
        self.head = Some(ChainHead {
            archive_id: batch.archive_id.clone(),
            terminal_hash: batch.terminal_hash.clone(),
        });
        self.batches.insert(position, batch);
        Ok(())
    }

    pub(crate) fn remove(&mut self, archive_id: &str) -> Option<ArchiveBatch> {
        let position = self.positions.remove(archive_id)?;
        let batch = self.batches.remove(&position)?;

        if let Some(set) = self.by_start.get_mut(&batch.time_range.start) {
            set.remove(&position);
            if set.is_empty() {
                self.by_start.remove(&batch.time_range.start);
            }
        }
        let year = batch.time_range.start.year();
        if let Some(set) = self.by_year.get_mut(&year) {
            set.remove(&position);
            if set.is_empty() {
                self.by_year.remove(&year);
            }
        }
        Some(batch)
    }

    pub(crate) fn get(&self, archive_id: &str) -> Option<&ArchiveBatch> {
        self.positions
            .get(archive_id)
            .and_then(|p| self.batches.get(p))
    }

    pub(crate) fn all(&self) -> Vec<ArchiveBatch> {
        self.batches.values().cloned().collect()
    }

    /// Batches overlapping `[start, end]`, ordered by time-range start.
    pub(crate) fn in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<ArchiveBatch> {
        if start > end {
            return Vec::new();
        }
        self.by_start
            .range(..=end)
            .flat_map(|(_, positions)| positions)
            .filter_map(|p| self.batches.get(p))
            .filter(|b| b.time_range.overlaps(start, end))
            .cloned()
            .collect()
    }

    pub(crate) fn in_year(&self, year: i32) -> Vec<ArchiveBatch> {
        self.by_year
            .get(&year)
            .map(|positions| {
                positions
                    .iter()
                    .filter_map(|p| self.batches.get(p))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn head(&self) -> Option<ChainHead> {
        self.head.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.batches.len()
    }
}

//! Live-store adapters implementing `EventSource`.
//!
//! The marketplace's audit logger appends events with a monotonically
//! increasing sequence and an `occurred_at` that never goes backwards, so a
//! sequence range returned by `fetch_older_than` contains only eligible
//! events and `mark_archived` can delete by range.
//!
//! - `InMemoryEventSource`: a map behind a lock, for tests and the demo
//! - `JsonlEventSource`: a JSON-lines file rewritten atomically on change,
//!   used by the CLI as a stand-in for the production store

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use coldchain_contracts::{
    archive::SequenceRange,
    error::{ArchiveError, ArchiveResult},
    event::{AuditEvent, EventPage},
};
use coldchain_core::traits::EventSource;

// ── Ledger ────────────────────────────────────────────────────────────────────

/// Sequence-ordered event storage shared by both adapters.
#[derive(Debug, Default)]
struct Ledger {
    events: BTreeMap<u64, AuditEvent>,
}

impl Ledger {
    fn insert(&mut self, event: AuditEvent) -> ArchiveResult<()> {
        if self.events.contains_key(&event.sequence) {
            return Err(ArchiveError::Source {
                reason: format!("sequence {} is already present", event.sequence),
            });
        }
        self.events.insert(event.sequence, event);
        Ok(())
    }

    fn page(&self, cutoff: DateTime<Utc>, after: Option<u64>, limit: usize) -> EventPage {
        let lower = match after {
            Some(after) => Bound::Excluded(after),
            None => Bound::Unbounded,
        };
        let mut eligible = self
            .events
            .range((lower, Bound::Unbounded))
            .map(|(_, event)| event)
            .filter(|event| event.occurred_at < cutoff);

        let events: Vec<AuditEvent> = eligible.by_ref().take(limit).cloned().collect();
        let has_more = eligible.next().is_some();
        EventPage { events, has_more }
    }

    fn remove_range(&mut self, range: SequenceRange) -> u64 {
        if range.first > range.last {
            return 0;
        }
        let doomed: Vec<u64> = self
            .events
            .range(range.first..=range.last)
            .map(|(sequence, _)| *sequence)
            .collect();
        for sequence in &doomed {
            self.events.remove(sequence);
        }
        doomed.len() as u64
    }
}

// ── InMemoryEventSource ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryEventSource {
    ledger: RwLock<Ledger>,
}

impl InMemoryEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a source pre-loaded with `events`.
    ///
    /// # Errors
    ///
    /// `ArchiveError::Source` if two events share a sequence.
    pub fn from_events(events: impl IntoIterator<Item = AuditEvent>) -> ArchiveResult<Self> {
        let mut ledger = Ledger::default();
        for event in events {
            ledger.insert(event)?;
        }
        Ok(Self {
            ledger: RwLock::new(ledger),
        })
    }

    /// Append an event the way the audit logger would.
    pub async fn append(&self, event: AuditEvent) -> ArchiveResult<()> {
        self.ledger.write().await.insert(event)
    }

    pub async fn len(&self) -> usize {
        self.ledger.read().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, sequence: u64) -> bool {
        self.ledger.read().await.events.contains_key(&sequence)
    }

    /// Snapshot of every event currently in the store, in sequence order.
    pub async fn snapshot(&self) -> Vec<AuditEvent> {
        self.ledger.read().await.events.values().cloned().collect()
    }
}

#[async_trait]
impl EventSource for InMemoryEventSource {
    async fn fetch_older_than(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<u64>,
        limit: usize,
    ) -> ArchiveResult<EventPage> {
        Ok(self.ledger.read().await.page(cutoff, after, limit))
    }

    async fn mark_archived(&self, range: SequenceRange) -> ArchiveResult<u64> {
        let removed = self.ledger.write().await.remove_range(range);
        debug!(first = range.first, last = range.last, removed, "events removed from live store");
        Ok(removed)
    }

    async fn restore(&self, event: &AuditEvent) -> ArchiveResult<()> {
        self.ledger.write().await.insert(event.clone())
    }
}

// ── JsonlEventSource ──────────────────────────────────────────────────────────

/// File-backed live store: one `AuditEvent` JSON object per line.
///
/// Every mutation rewrites the file through a temporary sibling and a rename,
/// so a reader never observes a half-written store.
pub struct JsonlEventSource {
    path: PathBuf,
    ledger: Mutex<Ledger>,
}

impl JsonlEventSource {
    /// Load the store at `path`. A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// `ArchiveError::Source` if the file cannot be read, a line fails to
    /// parse, or two lines share a sequence.
    pub async fn open(path: impl Into<PathBuf>) -> ArchiveResult<Self> {
        let path = path.into();
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(source_error("cannot read", &path, e)),
        };

        let mut ledger = Ledger::default();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let event: AuditEvent = serde_json::from_str(line)
                .map_err(|e| source_error(&format!("line {} of", index + 1), &path, e))?;
            ledger.insert(event)?;
        }

        info!(path = %path.display(), events = ledger.events.len(), "live store loaded");
        Ok(Self {
            path,
            ledger: Mutex::new(ledger),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn len(&self) -> usize {
        self.ledger.lock().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Add events and persist, as the audit logger would.
    pub async fn append_all(&self, events: impl IntoIterator<Item = AuditEvent>) -> ArchiveResult<()> {
        let mut ledger = self.ledger.lock().await;
        for event in events {
            ledger.insert(event)?;
        }
        self.persist(&ledger).await
    }

    async fn persist(&self, ledger: &Ledger) -> ArchiveResult<()> {
        let mut body = Vec::new();
        for event in ledger.events.values() {
            serde_json::to_writer(&mut body, event)
                .map_err(|e| source_error("cannot serialize event for", &self.path, e))?;
            body.push(b'\n');
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| source_error("cannot create directory for", &self.path, e))?;
        }
        let staging = self.path.with_extension("jsonl.tmp");
        fs::write(&staging, &body)
            .await
            .map_err(|e| source_error("cannot write", &staging, e))?;
        fs::rename(&staging, &self.path)
            .await
            .map_err(|e| source_error("cannot replace", &self.path, e))
    }
}

fn source_error(context: &str, path: &Path, e: impl std::fmt::Display) -> ArchiveError {
    ArchiveError::Source {
        reason: format!("{context} {}: {e}", path.display()),
    }
}

#[async_trait]
impl EventSource for JsonlEventSource {
    async fn fetch_older_than(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<u64>,
        limit: usize,
    ) -> ArchiveResult<EventPage> {
        Ok(self.ledger.lock().await.page(cutoff, after, limit))
    }

    async fn mark_archived(&self, range: SequenceRange) -> ArchiveResult<u64> {
        let mut ledger = self.ledger.lock().await;
        let removed = ledger.remove_range(range);
        if removed > 0 {
            self.persist(&ledger).await?;
        }
        debug!(first = range.first, last = range.last, removed, "events removed from live store");
        Ok(removed)
    }

    async fn restore(&self, event: &AuditEvent) -> ArchiveResult<()> {
        let mut ledger = self.ledger.lock().await;
        ledger.insert(event.clone())?;
        if let Err(e) = self.persist(&ledger).await {
            ledger.events.remove(&event.sequence);
            return Err(e);
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

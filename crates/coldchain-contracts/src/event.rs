//! Audit event types.
//!
//! `AuditEvent` is the immutable fact produced by the marketplace's audit
//! logger. `ChainedEvent` wraps it with the SHA-256 link that makes an
//! archived batch tamper-evident.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ArchiveError, ArchiveResult};

/// Upper bound on a single event payload accepted for archival.
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// The sentinel seed used for the first batch ever archived.
///
/// 64 hex zeros: never the SHA-256 of real data.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// A single audit record read from the live store.
///
/// Never mutated by the engine. `occurred_at` carries microsecond precision,
/// which is what both the canonical hash bytes and the columnar encoding
/// store; finer input is truncated on construction and on deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Strictly increasing position within the source.
    pub sequence: u64,
    #[serde(deserialize_with = "deserialize_micros")]
    pub occurred_at: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub resource: String,
    /// Opaque structured content, at most `MAX_PAYLOAD_BYTES`.
    pub payload: Vec<u8>,
    /// Category tags such as `data-subject-request`. Statistics only.
    #[serde(default)]
    pub compliance_flags: BTreeSet<String>,
}

impl AuditEvent {
    /// Build an event, truncating `occurred_at` to microseconds.
    pub fn new(
        sequence: u64,
        occurred_at: DateTime<Utc>,
        actor: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            sequence,
            occurred_at: truncate_to_micros(occurred_at),
            actor: actor.into(),
            action: action.into(),
            resource: resource.into(),
            payload,
            compliance_flags: BTreeSet::new(),
        }
    }

    /// Attach a compliance tag.
    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.compliance_flags.insert(flag.into());
        self
    }

    /// The same event with `occurred_at` truncated to microseconds.
    pub fn normalized(mut self) -> Self {
        self.occurred_at = truncate_to_micros(self.occurred_at);
        self
    }

    /// Check the invariants the archiver relies on before hashing.
    pub fn validate(&self) -> ArchiveResult<()> {
        if self.payload.len() > MAX_PAYLOAD_BYTES {
            return Err(ArchiveError::InvalidEvent {
                sequence: self.sequence,
                reason: format!(
                    "payload is {} bytes, limit is {}",
                    self.payload.len(),
                    MAX_PAYLOAD_BYTES
                ),
            });
        }
        if self.occurred_at.timestamp_subsec_nanos() % 1_000 != 0 {
            return Err(ArchiveError::InvalidEvent {
                sequence: self.sequence,
                reason: "occurred_at has sub-microsecond precision".to_string(),
            });
        }
        Ok(())
    }
}

/// Drop sub-microsecond precision so the value survives the columnar round trip.
pub fn truncate_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(ts.timestamp_micros()).unwrap_or(ts)
}

fn deserialize_micros<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    DateTime::<Utc>::deserialize(deserializer).map(truncate_to_micros)
}

/// An `AuditEvent` linked into a batch's hash chain.
///
/// `event_hash = SHA256(canonical_bytes(event) ‖ prev_hash)`. Altering any
/// byte of `event` invalidates this hash and every hash after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainedEvent {
    pub event: AuditEvent,
    /// Hash of the preceding event, or the batch seed for the first event.
    pub prev_hash: String,
    /// Lowercase hex SHA-256 of this event's canonical bytes and `prev_hash`.
    pub event_hash: String,
}

/// One page returned by `EventSource::fetch_older_than`.
#[derive(Debug, Clone, Default)]
pub struct EventPage {
    /// Events in strictly increasing `sequence` order.
    pub events: Vec<AuditEvent>,
    /// True if more eligible events exist past the last one returned.
    pub has_more: bool,
}

impl EventPage {
    /// The pagination cursor to pass to the next fetch.
    pub fn last_sequence(&self) -> Option<u64> {
        self.events.last().map(|e| e.sequence)
    }
}

//! Hash-chain primitives: canonical bytes, chain building, and verification.
//!
//! Hash input layout for one event (bytes, in order):
//!   1. canonical event bytes (see `canonical_bytes`)
//!   2. prev_hash as UTF-8 bytes (64 ASCII hex chars)
//!
//! Canonical event layout, all integers little-endian:
//!   1. format version byte `0x01`
//!   2. sequence as u64
//!   3. occurred_at as i64 microseconds since the Unix epoch
//!   4. actor, action, resource, payload, each as u32 length + bytes
//!   5. compliance flag count as u32, then each flag as u32 length + bytes,
//!      in sorted order
//!
//! The layout is independent of serde and of the columnar encoding, so
//! archives stay verifiable across encoder versions.

use sha2::{Digest, Sha256};
use tracing::debug;

use coldchain_contracts::event::{AuditEvent, ChainedEvent};

/// Leading byte of every canonical encoding. Bump only with a new layout.
pub const CANONICAL_FORMAT_VERSION: u8 = 0x01;

/// Deterministic byte encoding of an event's content.
pub fn canonical_bytes(event: &AuditEvent) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        1 + 8 + 8 + 16 + event.actor.len() + event.action.len() + event.resource.len()
            + event.payload.len(),
    );
    out.push(CANONICAL_FORMAT_VERSION);
    out.extend_from_slice(&event.sequence.to_le_bytes());
    out.extend_from_slice(&event.occurred_at.timestamp_micros().to_le_bytes());
    push_len_prefixed(&mut out, event.actor.as_bytes());
    push_len_prefixed(&mut out, event.action.as_bytes());
    push_len_prefixed(&mut out, event.resource.as_bytes());
    push_len_prefixed(&mut out, &event.payload);

    // BTreeSet iteration is already sorted.
    out.extend_from_slice(&(event.compliance_flags.len() as u32).to_le_bytes());
    for flag in &event.compliance_flags {
        push_len_prefixed(&mut out, flag.as_bytes());
    }
    out
}

fn push_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

/// Compute the SHA-256 hash linking `event` to `prev_hash`.
///
/// Returns a lowercase 64-character hex string.
pub fn hash_event(event: &AuditEvent, prev_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_bytes(event));
    hasher.update(prev_hash.as_bytes());
    hex::encode(hasher.finalize())
}

/// Result of `build_chain`.
#[derive(Debug, Clone)]
pub struct ChainOutput {
    pub events: Vec<ChainedEvent>,
    /// Hash of the last event, or the seed when `events` is empty.
    pub terminal_hash: String,
}

/// Link `events` into a chain starting from `seed_hash`.
///
/// Events are chained in the order given; callers pass them in strictly
/// increasing sequence order.
pub fn build_chain(seed_hash: &str, events: Vec<AuditEvent>) -> ChainOutput {
    let mut prev_hash = seed_hash.to_string();
    let mut chained = Vec::with_capacity(events.len());

    for event in events {
        let event_hash = hash_event(&event, &prev_hash);
        chained.push(ChainedEvent {
            event,
            prev_hash: std::mem::replace(&mut prev_hash, event_hash.clone()),
            event_hash,
        });
    }

    debug!(
        seed_hash = %seed_hash,
        event_count = chained.len(),
        terminal_hash = %prev_hash,
        "hash chain built"
    );

    ChainOutput {
        events: chained,
        terminal_hash: prev_hash,
    }
}

/// Outcome of `verify_chain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerification {
    pub valid: bool,
    /// First event that breaks the chain. When every link holds but the
    /// terminal hash differs from the expected one, this is the last event
    /// (0 for an empty chain).
    pub first_divergent_index: Option<usize>,
}

impl ChainVerification {
    fn valid() -> Self {
        Self {
            valid: true,
            first_divergent_index: None,
        }
    }

    fn diverged_at(index: usize) -> Self {
        Self {
            valid: false,
            first_divergent_index: Some(index),
        }
    }
}

/// Verify a stored chain against its seed and expected terminal hash.
///
/// Each event must satisfy both rules:
///
/// 1. **Linkage**: its `prev_hash` equals the previous event's `event_hash`
///    (or `seed_hash` for event 0).
/// 2. **Hash correctness**: its `event_hash` matches the value recomputed
///    from its own fields.
///
/// Finally the last hash must equal `expected_terminal_hash`. This catches a
/// chain that was rewritten consistently from some point onwards.
pub fn verify_chain(
    seed_hash: &str,
    events: &[ChainedEvent],
    expected_terminal_hash: &str,
) -> ChainVerification {
    let mut expected_prev = seed_hash;

    for (index, chained) in events.iter().enumerate() {
        if chained.prev_hash != expected_prev {
            return ChainVerification::diverged_at(index);
        }

        let recomputed = hash_event(&chained.event, &chained.prev_hash);
        if chained.event_hash != recomputed {
            return ChainVerification::diverged_at(index);
        }

        expected_prev = &chained.event_hash;
    }

    if expected_prev != expected_terminal_hash {
        return ChainVerification::diverged_at(events.len().saturating_sub(1));
    }

    ChainVerification::valid()
}

/// Digest summarizing a whole batch: seed, count, and every event hash.
pub fn batch_digest(seed_hash: &str, events: &[ChainedEvent]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed_hash.as_bytes());
    hasher.update((events.len() as u64).to_le_bytes());
    for chained in events {
        hasher.update(chained.event_hash.as_bytes());
    }
    hex::encode(hasher.finalize())
}

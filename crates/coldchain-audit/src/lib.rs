//! # coldchain-audit
//!
//! SHA-256 hash chains over archived audit events.
//!
//! ## Overview
//!
//! Every event in a batch is hashed together with the previous event's hash.
//! The first event chains from the batch's seed, which is the previous
//! batch's terminal hash, so the chain runs across the archive's entire
//! history. Changing even a single byte of any event breaks every hash from
//! that point forward, and `verify_chain` reports where.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use coldchain_audit::{build_chain, verify_chain};
//! use coldchain_contracts::event::GENESIS_HASH;
//!
//! let out = build_chain(GENESIS_HASH, page);
//! assert!(verify_chain(GENESIS_HASH, &out.events, &out.terminal_hash).valid);
//! ```

pub mod chain;

pub use chain::{
    batch_digest, build_chain, canonical_bytes, hash_event, verify_chain, ChainOutput,
    ChainVerification,
};

// ── Tests ─────────────────────────────────────────────────────────────────────

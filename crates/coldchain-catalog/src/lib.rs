//! # coldchain-catalog
//!
//! Archive catalog implementations.
//!
//! The catalog is the single source of truth for what has been archived.
//! Verification and restoration always check object storage against it,
//! and the archiver reads the chain head from it to seed the next batch.
//!
//! - `InMemoryCatalog`: process-local, for tests
//! - `JsonlCatalog`: append-only JSON-lines file with `fsync` per entry

mod index;
pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlCatalog;
pub use memory::InMemoryCatalog;

// ── Tests ─────────────────────────────────────────────────────────────────────

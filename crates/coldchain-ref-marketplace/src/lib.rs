//! # coldchain-ref-marketplace
//!
//! Marketplace reference runtime for the coldchain archival engine.
//!
//! Provides the pieces a host system supplies around the engine:
//!
//! - **Live-store adapters**: `InMemoryEventSource` and the file-backed
//!   `JsonlEventSource` used by the CLI.
//! - **Mock traffic**: deterministic rider, driver, and payment events with
//!   compliance tags.
//! - **Scenarios**: archive a backlog (A), verify fresh archives (B), and
//!   refuse to restore a truncated object (C).
//!
//! All data is generated and fictional. Nothing leaves the process except the
//! files a test or the CLI points it at.

pub mod mock_data;
pub mod scenarios;
pub mod source;

pub use source::{InMemoryEventSource, JsonlEventSource};

// ── Tests ─────────────────────────────────────────────────────────────────────

//! # coldchain-core
//!
//! The archival orchestrator for coldchain.
//!
//! This crate provides:
//! - The four capability traits (`EventSource`, `ObjectStore`,
//!   `ArchiveCatalog`, `Envelope`)
//! - The `Archiver` that drives archive, verify, restore, stats, and expire
//! - Deterministic object key derivation and catalog statistics
//!
//! ## Usage
//!
//! ```rust,ignore
//! use coldchain_core::{Archiver, ArchiveRequest};
//!
//! let archiver = Archiver::new(config, source, store, catalog)?;
//! let report = archiver
//!     .archive(&ArchiveRequest::older_than_days(90, Utc::now())?, &cancel)
//!     .await?;
//! ```

pub mod archiver;
pub mod keys;
pub mod stats;
pub mod traits;

pub use archiver::{ArchiveRequest, Archiver};
pub use keys::archive_key;
pub use traits::{ArchiveCatalog, Envelope, EventSource, ObjectStore};

//! # coldchain-columnar
//!
//! Parquet encoding of chained audit events for cold storage.
//!
//! Files are written in row groups of a configured size, each compressed
//! independently. The footer carries the archive id, the event count, and a
//! SHA-256 checksum per column per row group, so a reader can tell a damaged
//! file apart from a tampered hash chain without consulting the catalog.
//!
//! Compression is a space/CPU trade-off only: hashing happens on canonical
//! bytes before encoding, so the profile never affects the chain.

pub mod decoder;
pub mod encoder;
pub mod error;
pub mod schema;

pub use decoder::{decode, DecodedArchive};
pub use encoder::{encode, EncodeOptions};
pub use error::DecodeError;
pub use schema::{archive_schema, FooterMetadata, COLUMNS, FORMAT_VERSION};

// ── Tests ─────────────────────────────────────────────────────────────────────

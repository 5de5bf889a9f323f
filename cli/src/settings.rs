//! CLI settings file.
//!
//! The engine takes an `ArchiverConfig` value and never reads files; this is
//! where the CLI turns a TOML file into one, plus the two paths only the CLI
//! cares about:
//!
//! ```toml
//! [paths]
//! catalog = "/var/lib/coldchain/catalog.jsonl"
//! live_store = "/var/lib/coldchain/events.jsonl"
//!
//! [archiver]
//! batch_size = 10000
//! compression = "maximal"
//!
//! [archiver.storage]
//! provider = "local-fs"
//! root = "/var/lib/coldchain/objects"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use coldchain_contracts::{
    config::{ArchiverConfig, StorageConfig, StorageProvider},
    error::{ArchiveError, ArchiveResult},
};

const DEFAULT_DATA_DIR: &str = "coldchain-data";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Paths {
    /// JSON-lines archive catalog.
    pub catalog: PathBuf,
    /// JSON-lines file standing in for the live audit store.
    pub live_store: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        let data = Path::new(DEFAULT_DATA_DIR);
        Self {
            catalog: data.join("catalog.jsonl"),
            live_store: data.join("events.jsonl"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub paths: Paths,
    pub archiver: ArchiverConfig,
}

impl Default for Settings {
    /// Everything under `./coldchain-data`, objects on the local filesystem.
    fn default() -> Self {
        Self {
            paths: Paths::default(),
            archiver: ArchiverConfig {
                storage: StorageConfig {
                    provider: StorageProvider::LocalFs,
                    root: Some(Path::new(DEFAULT_DATA_DIR).join("objects")),
                    ..StorageConfig::default()
                },
                ..ArchiverConfig::default()
            },
        }
    }
}

impl Settings {
    /// Parse settings from a TOML string and validate them.
    ///
    /// Returns `ArchiveError::ConfigError` on malformed TOML or out-of-range
    /// values.
    pub fn from_toml_str(s: &str) -> ArchiveResult<Self> {
        let settings: Settings = toml::from_str(s).map_err(|e| ArchiveError::ConfigError {
            reason: format!("failed to parse settings TOML: {}", e),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read the file at `path` and parse it with `from_toml_str`.
    pub fn from_file(path: &Path) -> ArchiveResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ArchiveError::ConfigError {
            reason: format!("failed to read settings file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Settings from `path` if given, otherwise the defaults.
    pub fn load(path: Option<&Path>) -> ArchiveResult<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let settings = Self::default();
                settings.validate()?;
                Ok(settings)
            }
        }
    }

    pub fn validate(&self) -> ArchiveResult<()> {
        // Each CLI invocation is its own process; an in-memory object store
        // would lose every object the catalog points at.
        if self.archiver.storage.provider == StorageProvider::Memory {
            return Err(ArchiveError::ConfigError {
                reason: "storage.provider \"memory\" cannot be used from the CLI; \
                         use \"local-fs\""
                    .to_string(),
            });
        }
        self.archiver.validate()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::io::Write;

    use coldchain_contracts::archive::Compression;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.archiver.storage.provider, StorageProvider::LocalFs);
        assert_eq!(settings.archiver.batch_size, 10_000);
        assert_eq!(settings.paths.catalog, Path::new("coldchain-data/catalog.jsonl"));
    }

    #[test]
    fn test_parse_full_file() {
        let settings = Settings::from_toml_str(
            r#"
            [paths]
            catalog = "/srv/cc/catalog.jsonl"
            live_store = "/srv/cc/events.jsonl"

            [archiver]
            batch_size = 5000
            compression = "maximal"
            retention_days = 365
            encryption = false

            [archiver.storage]
            provider = "local-fs"
            bucket = "trips-audit"
            root = "/srv/cc/objects"
            "#,
        )
        .unwrap();

        assert_eq!(settings.paths.live_store, Path::new("/srv/cc/events.jsonl"));
        assert_eq!(settings.archiver.batch_size, 5_000);
        assert_eq!(settings.archiver.compression, Compression::Maximal);
        assert_eq!(settings.archiver.retention_days, 365);
        assert_eq!(settings.archiver.storage.bucket, "trips-audit");
        assert_eq!(settings.archiver.row_group_size, 1_000, "unset fields keep defaults");
    }

    #[test]
    fn test_memory_provider_rejected() {
        let err = Settings::from_toml_str(
            r#"
            [archiver.storage]
            provider = "memory"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ArchiveError::ConfigError { .. }));
    }

    #[test]
    fn test_out_of_range_value_rejected() {
        let err = Settings::from_toml_str(
            r#"
            [archiver]
            batch_size = 0

            [archiver.storage]
            provider = "local-fs"
            root = "/tmp/objects"
            "#,
        )
        .unwrap_err();
        match err {
            ArchiveError::ConfigError { reason } => assert!(reason.contains("batch_size")),
            other => panic!("expected ConfigError, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let err = Settings::from_toml_str("[archiver\nbatch_size = ").unwrap_err();
        assert!(matches!(err, ArchiveError::ConfigError { .. }));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[archiver.storage]\nprovider = \"local-fs\"\nroot = \"/tmp/cc-objects\""
        )
        .unwrap();
        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.archiver.storage.root, Some(PathBuf::from("/tmp/cc-objects")));

        let missing = Settings::from_file(Path::new("/nonexistent/coldchain.toml"));
        assert!(matches!(missing, Err(ArchiveError::ConfigError { .. })));
    }
}

//! coldchain: audit-event archival CLI
//!
//! Thin front end over `coldchain_core::Archiver`. Each invocation opens the
//! JSON-lines catalog, the configured object store, and the live-store file,
//! runs one cycle, prints its report as JSON, and exits.
//!
//! Usage:
//!   coldchain --config coldchain.toml archive --older-than-days 90
//!   coldchain verify 6f1c…-…
//!   coldchain restore 6f1c…-… --dry-run
//!   coldchain stats --year 2024
//!   coldchain expire --confirm
//!   coldchain demo
//!
//! Exit status is 0 on success and 1 with a message on stderr otherwise.

mod settings;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use coldchain_catalog::JsonlCatalog;
use coldchain_contracts::{
    archive::ExpirationGrant,
    error::{ArchiveError, ArchiveResult},
};
use coldchain_core::{ArchiveRequest, Archiver};
use coldchain_ref_marketplace::{scenarios, JsonlEventSource};

use crate::settings::Settings;

// ── CLI definition ────────────────────────────────────────────────────────────

/// coldchain: move aging audit events into verified cold storage.
#[derive(Debug, Parser)]
#[command(
    name = "coldchain",
    version,
    about = "Archive, verify, restore, and expire audit-event archives",
    long_about = "Archives audit events older than a cutoff into hash-chained Parquet\n\
                  objects, verifies them against the catalog, and restores them on demand."
)]
struct Cli {
    /// Settings file (TOML). Defaults keep everything under ./coldchain-data.
    #[arg(long, global = true, value_name = "TOML")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Archive every event older than the given number of days.
    Archive {
        #[arg(long, value_name = "N")]
        older_than_days: u32,
        /// Override the configured batch size for this run.
        #[arg(long, value_name = "N")]
        batch_size: Option<usize>,
        /// Walk and chain the eligible events without writing anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Verify one archive against its catalog record.
    Verify { archive_id: String },
    /// Verify one archive and re-insert its events into the live store.
    Restore {
        archive_id: String,
        /// Verify and report what would be restored without inserting.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print catalog statistics.
    Stats {
        /// Restrict to archives whose time range starts in this year.
        #[arg(long)]
        year: Option<i32>,
    },
    /// Delete archives older than the retention window.
    Expire {
        /// Required. Expiration deletes objects and catalog records.
        #[arg(long)]
        confirm: bool,
    },
    /// Run the in-memory marketplace scenarios A, B, and C.
    Demo,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Initialize structured logging. Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current step");
            on_signal.cancel();
        }
    });

    if let Err(e) = run(cli, &cancel).await {
        eprintln!("coldchain: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, cancel: &CancellationToken) -> ArchiveResult<()> {
    let config = cli.config.as_deref();

    match cli.command {
        Command::Archive {
            older_than_days,
            batch_size,
            dry_run,
        } => {
            let archiver = open_archiver(config).await?;
            let mut request = ArchiveRequest::older_than_days(older_than_days, Utc::now())?
                .with_dry_run(dry_run);
            if let Some(batch_size) = batch_size {
                request = request.with_batch_size(batch_size);
            }
            let report = archiver.archive(&request, cancel).await?;
            print_json(&report)?;
            if report.cancelled {
                return Err(ArchiveError::Cancelled);
            }
            Ok(())
        }
        Command::Verify { archive_id } => {
            let archiver = open_archiver(config).await?;
            let result = archiver.verify_integrity(&archive_id, cancel).await?;
            print_json(&result)?;
            if !result.is_valid {
                return Err(ArchiveError::IntegrityFailed {
                    archive_id,
                    reason: result.errors.join("; "),
                });
            }
            Ok(())
        }
        Command::Restore {
            archive_id,
            dry_run,
        } => {
            let archiver = open_archiver(config).await?;
            let result = archiver.restore(&archive_id, dry_run, cancel).await?;
            print_json(&result)?;
            if !result.verification_status.is_valid {
                return Err(ArchiveError::IntegrityFailed {
                    archive_id,
                    reason: result.verification_status.errors.join("; "),
                });
            }
            if !result.errors.is_empty() {
                return Err(ArchiveError::Source {
                    reason: format!(
                        "restored {} of {} events; {} failed",
                        result.events_restored,
                        result.events_to_restore,
                        result.errors.len()
                    ),
                });
            }
            Ok(())
        }
        Command::Stats { year } => {
            let archiver = open_archiver(config).await?;
            let stats = match year {
                Some(year) => archiver.stats_for_year(year).await?,
                None => archiver.stats().await?,
            };
            print_json(&stats)
        }
        Command::Expire { confirm } => {
            if !confirm {
                return Err(ArchiveError::ConfigError {
                    reason: "expire deletes archives permanently; pass --confirm to proceed"
                        .to_string(),
                });
            }
            let archiver = open_archiver(config).await?;
            let grant = ExpirationGrant::new(format!("cli:{}", whoami()));
            let report = archiver.expire(Utc::now(), &grant, cancel).await?;
            print_json(&report)?;
            if !report.errors.is_empty() {
                return Err(ArchiveError::Catalog {
                    reason: format!("{} archive(s) could not be expired", report.errors.len()),
                });
            }
            Ok(())
        }
        Command::Demo => run_demo().await,
    }
}

// ── Wiring ────────────────────────────────────────────────────────────────────

async fn open_archiver(config: Option<&Path>) -> ArchiveResult<Archiver> {
    let settings = Settings::load(config)?;
    let catalog = Arc::new(JsonlCatalog::open(&settings.paths.catalog).await?);
    let source = Arc::new(JsonlEventSource::open(&settings.paths.live_store).await?);
    let store = coldchain_storage::object_store(&settings.archiver)?;

    info!(
        catalog = %settings.paths.catalog.display(),
        live_store = %settings.paths.live_store.display(),
        bucket = %settings.archiver.storage.bucket,
        "archiver wired"
    );
    Archiver::new(settings.archiver, source, store, catalog)
}

async fn run_demo() -> ArchiveResult<()> {
    scenarios::archive_backlog::run().await?;
    scenarios::verify_fresh::run().await?;
    scenarios::restore_truncated::run().await?;
    println!("All scenarios completed successfully.");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> ArchiveResult<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(|e| ArchiveError::Structural {
        reason: format!("cannot render report: {}", e),
    })?;
    println!("{}", rendered);
    Ok(())
}

fn whoami() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_archive() {
        let cli = Cli::try_parse_from([
            "coldchain",
            "--config",
            "cc.toml",
            "archive",
            "--older-than-days",
            "90",
            "--batch-size",
            "500",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("cc.toml")));
        match cli.command {
            Command::Archive {
                older_than_days,
                batch_size,
                dry_run,
            } => {
                assert_eq!(older_than_days, 90);
                assert_eq!(batch_size, Some(500));
                assert!(dry_run);
            }
            other => panic!("expected Archive, got {other:?}"),
        }
    }

    #[test]
    fn test_archive_requires_cutoff() {
        assert!(Cli::try_parse_from(["coldchain", "archive"]).is_err());
    }

    #[test]
    fn test_verify_requires_archive_id() {
        assert!(Cli::try_parse_from(["coldchain", "verify"]).is_err());
        let cli = Cli::try_parse_from(["coldchain", "verify", "abc"]).unwrap();
        assert!(matches!(cli.command, Command::Verify { archive_id } if archive_id == "abc"));
    }

    #[test]
    fn test_global_config_after_subcommand() {
        let cli =
            Cli::try_parse_from(["coldchain", "stats", "--year", "2024", "--config", "x.toml"])
                .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert!(matches!(cli.command, Command::Stats { year: Some(2024) }));
    }

    #[tokio::test]
    async fn test_expire_without_confirm_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("cc.toml");
        std::fs::write(&config, settings_toml(dir.path())).unwrap();

        let cli = Cli::try_parse_from([
            "coldchain",
            "--config",
            config.to_str().unwrap(),
            "expire",
        ])
        .unwrap();
        let err = run(cli, &CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("--confirm"));
    }

    #[tokio::test]
    async fn test_archive_with_unrepresentable_cutoff_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("cc.toml");
        std::fs::write(&config, settings_toml(dir.path())).unwrap();

        let cli = Cli::try_parse_from([
            "coldchain",
            "--config",
            config.to_str().unwrap(),
            "archive",
            "--older-than-days",
            "4294967295",
        ])
        .unwrap();
        let err = run(cli, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ArchiveError::ConfigError { .. }));
    }

    #[tokio::test]
    async fn test_verify_unknown_archive_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("cc.toml");
        std::fs::write(&config, settings_toml(dir.path())).unwrap();

        let cli = Cli::try_parse_from([
            "coldchain",
            "--config",
            config.to_str().unwrap(),
            "verify",
            "no-such-archive",
        ])
        .unwrap();
        let err = run(cli, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ArchiveError::NotFound { .. }));
    }

    fn settings_toml(dir: &std::path::Path) -> String {
        format!(
            "[paths]\ncatalog = {:?}\nlive_store = {:?}\n\n\
             [archiver.storage]\nprovider = \"local-fs\"\nroot = {:?}\n",
            dir.join("catalog.jsonl"),
            dir.join("events.jsonl"),
            dir.join("objects"),
        )
    }
}

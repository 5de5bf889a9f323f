//! Durable append-only catalog backed by a JSON-lines file.
//!
//! Every change is one line: a `record` entry carrying the full batch, or a
//! `remove` tombstone written by the expiration cycle. Lines are appended
//! with a single write followed by `fsync`, so after a crash a record is
//! either fully present or shows up as a torn final line, which is discarded
//! on the next open. An append that fails is cut back to the last committed
//! length before the error is returned, and every append first trims any
//! bytes past that length, so a failed write never strands a partial line
//! in the middle of the file. Committed lines are never rewritten.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use coldchain_contracts::archive::{ArchiveBatch, ChainHead};
use coldchain_contracts::error::{ArchiveError, ArchiveResult};
use coldchain_core::traits::ArchiveCatalog;

use crate::index::CatalogIndex;

/// One line of the catalog file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Entry {
    Record {
        batch: ArchiveBatch,
    },
    Remove {
        archive_id: String,
        removed_at: DateTime<Utc>,
    },
}

struct State {
    index: CatalogIndex,
    file: File,
    /// Byte length of the file up to the last fully synced line.
    committed_len: u64,
}

pub struct JsonlCatalog {
    path: PathBuf,
    state: Mutex<State>,
}

fn catalog_error(context: &str, path: &Path, e: impl std::fmt::Display) -> ArchiveError {
    ArchiveError::Catalog {
        reason: format!("{context} {}: {e}", path.display()),
    }
}

impl JsonlCatalog {
    /// Open the catalog at `path`, creating it if absent, and replay it.
    ///
    /// # Errors
    ///
    /// `ArchiveError::Catalog` if the file cannot be read or a line other
    /// than the last one fails to parse.
    pub async fn open(path: impl Into<PathBuf>) -> ArchiveResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| catalog_error("cannot create directory for", &path, e))?;
        }

        let contents = match fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(catalog_error("cannot read", &path, e)),
        };
        let (index, valid_len) = replay(&path, &contents)?;

        if valid_len < contents.len() {
            warn!(
                path = %path.display(),
                discarded_bytes = contents.len() - valid_len,
                "discarding torn trailing catalog line"
            );
            let file = OpenOptions::new()
                .write(true)
                .open(&path)
                .await
                .map_err(|e| catalog_error("cannot open", &path, e))?;
            file.set_len(valid_len as u64)
                .await
                .map_err(|e| catalog_error("cannot truncate", &path, e))?;
            file.sync_all()
                .await
                .map_err(|e| catalog_error("cannot sync", &path, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| catalog_error("cannot open", &path, e))?;

        info!(
            path = %path.display(),
            archives = index.len(),
            head = ?index.head().map(|h| h.archive_id),
            "catalog opened"
        );

        Ok(Self {
            path,
            state: Mutex::new(State {
                index,
                file,
                committed_len: valid_len as u64,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry and fsync it.
    ///
    /// On failure the file is cut back to `committed_len`, so the entry is
    /// absent after a restart exactly when the caller saw an error.
    async fn append(&self, state: &mut State, entry: &Entry) -> ArchiveResult<()> {
        let mut line = serde_json::to_vec(entry)
            .map_err(|e| catalog_error("cannot serialize entry for", &self.path, e))?;
        line.push(b'\n');

        self.trim_uncommitted(state).await?;

        let written = async {
            state
                .file
                .write_all(&line)
                .await
                .map_err(|e| catalog_error("cannot append to", &self.path, e))?;
            state
                .file
                .flush()
                .await
                .map_err(|e| catalog_error("cannot append to", &self.path, e))?;
            state
                .file
                .sync_data()
                .await
                .map_err(|e| catalog_error("cannot sync", &self.path, e))
        }
        .await;

        match written {
            Ok(()) => {
                state.committed_len += line.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.truncate_to_committed(state).await {
                    // The next append retries the trim before writing.
                    warn!(
                        path = %self.path.display(),
                        error = %rollback,
                        "cannot roll back failed catalog append"
                    );
                }
                Err(e)
            }
        }
    }

    /// Drop bytes past the committed length left by an earlier failed append.
    async fn trim_uncommitted(&self, state: &mut State) -> ArchiveResult<()> {
        let on_disk = state
            .file
            .metadata()
            .await
            .map_err(|e| catalog_error("cannot stat", &self.path, e))?
            .len();

        if on_disk < state.committed_len {
            return Err(ArchiveError::Catalog {
                reason: format!(
                    "{} shrank to {on_disk} bytes below its committed length {}",
                    self.path.display(),
                    state.committed_len
                ),
            });
        }
        if on_disk > state.committed_len {
            warn!(
                path = %self.path.display(),
                discarded_bytes = on_disk - state.committed_len,
                "discarding uncommitted catalog bytes"
            );
            self.truncate_to_committed(state).await?;
        }
        Ok(())
    }

    async fn truncate_to_committed(&self, state: &mut State) -> ArchiveResult<()> {
        state
            .file
            .set_len(state.committed_len)
            .await
            .map_err(|e| catalog_error("cannot truncate", &self.path, e))?;
        state
            .file
            .sync_all()
            .await
            .map_err(|e| catalog_error("cannot sync", &self.path, e))
    }
}

/// Rebuild the index from file contents.
///
/// Returns the index and the byte length of the valid prefix. Only an
/// unterminated final line may be invalid; anything else is corruption.
fn replay(path: &Path, contents: &[u8]) -> ArchiveResult<(CatalogIndex, usize)> {
    let mut index = CatalogIndex::default();
    let mut offset = 0;
    let mut line_number = 0;

    while offset < contents.len() {
        line_number += 1;
        let rest = &contents[offset..];
        let (line, terminated) = match rest.iter().position(|b| *b == b'\n') {
            Some(end) => (&rest[..end], true),
            None => (rest, false),
        };

        if line.iter().all(u8::is_ascii_whitespace) {
            if !terminated {
                break;
            }
            offset += line.len() + 1;
            continue;
        }

        let entry = match serde_json::from_slice::<Entry>(line) {
            Ok(entry) => entry,
            Err(_) if !terminated => break,
            Err(e) => {
                return Err(catalog_error(
                    &format!("corrupt line {line_number} in"),
                    path,
                    e,
                ))
            }
        };
        if !terminated {
            // A complete JSON value without its newline is still a torn write.
            break;
        }

        match entry {
            Entry::Record { batch } => index
                .insert(batch)
                .map_err(|e| catalog_error(&format!("line {line_number} of"), path, e))?,
            Entry::Remove { archive_id, .. } => {
                if index.remove(&archive_id).is_none() {
                    debug!(archive_id = %archive_id, line_number, "tombstone for unknown archive");
                }
            }
        }
        offset += line.len() + 1;
    }

    Ok((index, offset))
}

#[async_trait]
impl ArchiveCatalog for JsonlCatalog {
    async fn record(&self, batch: &ArchiveBatch) -> ArchiveResult<()> {
        let mut state = self.state.lock().await;
        if state.index.contains(&batch.archive_id) {
            return Err(ArchiveError::Catalog {
                reason: format!("archive {} is already recorded", batch.archive_id),
            });
        }

        let entry = Entry::Record {
            batch: batch.clone(),
        };
        self.append(&mut state, &entry).await?;
        state.index.insert(batch.clone())?;

        debug!(archive_id = %batch.archive_id, "catalog record appended");
        Ok(())
    }

    async fn lookup(&self, archive_id: &str) -> ArchiveResult<Option<ArchiveBatch>> {
        Ok(self.state.lock().await.index.get(archive_id).cloned())
    }

    async fn list_all(&self) -> ArchiveResult<Vec<ArchiveBatch>> {
        Ok(self.state.lock().await.index.all())
    }

    async fn list_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ArchiveResult<Vec<ArchiveBatch>> {
        Ok(self.state.lock().await.index.in_range(start, end))
    }

    async fn list_by_year(&self, year: i32) -> ArchiveResult<Vec<ArchiveBatch>> {
        Ok(self.state.lock().await.index.in_year(year))
    }

    async fn chain_head(&self) -> ArchiveResult<Option<ChainHead>> {
        Ok(self.state.lock().await.index.head())
    }

    async fn remove(&self, archive_id: &str) -> ArchiveResult<()> {
        let mut state = self.state.lock().await;
        if !state.index.contains(archive_id) {
            return Err(ArchiveError::NotFound {
                what: format!("archive {archive_id}"),
            });
        }

        let entry = Entry::Remove {
            archive_id: archive_id.to_string(),
            removed_at: Utc::now(),
        };
        self.append(&mut state, &entry).await?;
        state.index.remove(archive_id);

        debug!(archive_id = %archive_id, "catalog tombstone appended");
        Ok(())
    }
}

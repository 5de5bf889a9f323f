//! Filesystem-backed multipart storage.
//!
//! Parts are staged under `<root>/.multipart/<upload_id>/` and assembled into
//! a temporary file that is renamed into place on completion, so an object
//! path either holds a complete object or nothing.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use coldchain_contracts::error::{ArchiveError, ArchiveResult};

use crate::transfer::{MultipartBackend, PartReceipt};

const STAGING_DIR: &str = ".multipart";

#[derive(Debug, Clone)]
pub struct LocalFsBackend {
    root: PathBuf,
}

impl LocalFsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an object key to a path under the root.
    ///
    /// Keys are relative, `/`-separated, and may not climb out of the root or
    /// touch the staging area.
    fn object_path(&self, key: &str) -> ArchiveResult<PathBuf> {
        let relative = Path::new(key);
        let escapes = key.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
            || relative.starts_with(STAGING_DIR);
        if escapes {
            return Err(ArchiveError::AccessDenied {
                reason: format!("object key '{key}' is outside the storage root"),
            });
        }
        Ok(self.root.join(relative))
    }

    fn staging_path(&self, upload_id: &str) -> ArchiveResult<PathBuf> {
        if upload_id.is_empty() || upload_id.contains(|c: char| matches!(c, '/' | '\\' | '.')) {
            return Err(ArchiveError::NotFound {
                what: format!("multipart upload {upload_id}"),
            });
        }
        Ok(self.root.join(STAGING_DIR).join(upload_id))
    }

    /// Multipart uploads with staged data still on disk.
    pub async fn pending_uploads(&self) -> ArchiveResult<usize> {
        let mut entries = match fs::read_dir(self.root.join(STAGING_DIR)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_error("read staging dir", e)),
        };
        let mut count = 0;
        while let Some(_entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("read staging dir", e))?
        {
            count += 1;
        }
        Ok(count)
    }
}

/// Map I/O failures onto the archive error taxonomy.
///
/// Anything not clearly permanent is treated as transient and left to the
/// bounded retry in the transfer layer.
fn io_error(context: &str, e: std::io::Error) -> ArchiveError {
    match e.kind() {
        ErrorKind::NotFound => ArchiveError::NotFound {
            what: format!("{context}: {e}"),
        },
        ErrorKind::PermissionDenied => ArchiveError::AccessDenied {
            reason: format!("{context}: {e}"),
        },
        _ => ArchiveError::Transient {
            reason: format!("{context}: {e}"),
        },
    }
}

fn part_file(staging: &Path, part_number: usize) -> PathBuf {
    staging.join(format!("{part_number:06}.part"))
}

#[async_trait]
impl MultipartBackend for LocalFsBackend {
    async fn create_multipart(&self, key: &str) -> ArchiveResult<String> {
        self.object_path(key)?;
        let upload_id = Uuid::new_v4().simple().to_string();
        let staging = self.staging_path(&upload_id)?;
        fs::create_dir_all(&staging)
            .await
            .map_err(|e| io_error("create staging dir", e))?;
        debug!(key, upload_id = %upload_id, "local multipart upload started");
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _key: &str,
        upload_id: &str,
        part_number: usize,
        body: Bytes,
    ) -> ArchiveResult<PartReceipt> {
        let staging = self.staging_path(upload_id)?;
        if !fs::try_exists(&staging)
            .await
            .map_err(|e| io_error("check staging dir", e))?
        {
            return Err(ArchiveError::NotFound {
                what: format!("multipart upload {upload_id}"),
            });
        }
        fs::write(part_file(&staging, part_number), &body)
            .await
            .map_err(|e| io_error("write part", e))?;

        Ok(PartReceipt {
            part_number,
            etag: format!("{upload_id}-{part_number}"),
            size: body.len() as u64,
        })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<PartReceipt>,
    ) -> ArchiveResult<u64> {
        let target = self.object_path(key)?;
        let staging = self.staging_path(upload_id)?;
        let assembled_path = staging.join("assembled");

        let mut assembled = fs::File::create(&assembled_path)
            .await
            .map_err(|e| io_error("create assembled file", e))?;
        let mut size = 0u64;
        for (expected, receipt) in (1..).zip(&parts) {
            if receipt.part_number != expected {
                return Err(ArchiveError::Structural {
                    reason: format!("part {expected} missing from completion list"),
                });
            }
            let body = fs::read(part_file(&staging, expected))
                .await
                .map_err(|e| io_error("read part", e))?;
            assembled
                .write_all(&body)
                .await
                .map_err(|e| io_error("write assembled file", e))?;
            size += body.len() as u64;
        }
        assembled
            .sync_all()
            .await
            .map_err(|e| io_error("sync assembled file", e))?;
        drop(assembled);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create object dir", e))?;
        }
        fs::rename(&assembled_path, &target)
            .await
            .map_err(|e| io_error("publish object", e))?;
        if let Err(e) = fs::remove_dir_all(&staging).await {
            warn!(upload_id, error = %e, "staging dir left behind after commit");
        }

        debug!(key, size, path = %target.display(), "local object committed");
        Ok(size)
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> ArchiveResult<()> {
        let staging = self.staging_path(upload_id)?;
        match fs::remove_dir_all(&staging).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("remove staging dir", e)),
        }
    }

    async fn get(&self, key: &str) -> ArchiveResult<Bytes> {
        let path = self.object_path(key)?;
        let bytes = fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => ArchiveError::NotFound {
                what: format!("object {key}"),
            },
            _ => io_error("read object", e),
        })?;
        Ok(Bytes::from(bytes))
    }

    async fn delete(&self, key: &str) -> ArchiveResult<()> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("delete object", e)),
        }
    }
}

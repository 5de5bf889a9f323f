//! Multipart transfer over any provider that supports staged uploads.
//!
//! An object is split into fixed-size parts, which are uploaded concurrently
//! up to `max_concurrency`, and the upload is committed only once every part
//! has landed. Any failure or cancellation aborts the upload, so readers never
//! see a partial object. A completion that reports failure may still have
//! committed, so the key is deleted as well before the error is returned.
//!
//! Every backend call runs under its own timeout. Transient failures
//! (`Transient`, `Timeout`) are retried with exponential backoff; all other
//! errors propagate on the first occurrence.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use coldchain_contracts::config::ArchiverConfig;
use coldchain_contracts::error::{ArchiveError, ArchiveResult};
use coldchain_core::traits::ObjectStore;

/// Proof that one part was stored, handed back on completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartReceipt {
    /// 1-based, as object-storage APIs number parts.
    pub part_number: usize,
    pub etag: String,
    pub size: u64,
}

/// Provider primitives for staged uploads.
///
/// Implementations report failures with the `ArchiveError` class that
/// matches the cause, since the transfer layer decides retries from it.
#[async_trait]
pub trait MultipartBackend: Send + Sync {
    /// Start an upload for `key` and return its upload id.
    async fn create_multipart(&self, key: &str) -> ArchiveResult<String>;

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: usize,
        body: Bytes,
    ) -> ArchiveResult<PartReceipt>;

    /// Assemble `parts` in order and make the object visible.
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<PartReceipt>,
    ) -> ArchiveResult<u64>;

    /// Release every staged part. Aborting an unknown upload succeeds.
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> ArchiveResult<()>;

    async fn get(&self, key: &str) -> ArchiveResult<Bytes>;

    /// Remove an object. Removing a missing object succeeds.
    async fn delete(&self, key: &str) -> ArchiveResult<()>;
}

/// Tunables for `MultipartTransfer`.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub part_size: usize,
    pub max_concurrency: usize,
    pub operation_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl From<&ArchiverConfig> for TransferConfig {
    fn from(config: &ArchiverConfig) -> Self {
        Self {
            part_size: config.part_size_bytes,
            max_concurrency: config.max_concurrency,
            operation_timeout: config.operation_timeout(),
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay(),
            retry_max_delay: config.retry_max_delay(),
        }
    }
}

impl TransferConfig {
    /// Backoff before retry number `attempt` (1-based), capped at the max.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_base_delay
            .saturating_mul(multiplier)
            .min(self.retry_max_delay)
    }
}

/// `ObjectStore` implementation on top of a `MultipartBackend`.
pub struct MultipartTransfer<B> {
    backend: Arc<B>,
    config: TransferConfig,
}

impl<B: MultipartBackend> MultipartTransfer<B> {
    pub fn new(backend: Arc<B>, config: TransferConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Run `call` under the operation timeout, retrying transient failures.
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> ArchiveResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ArchiveResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let outcome = match tokio::time::timeout(self.config.operation_timeout, call()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ArchiveError::Timeout {
                    operation: operation.to_string(),
                    timeout_ms: u64::try_from(self.config.operation_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                }),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(operation, attempts = attempt + 1, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.backoff(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient storage failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        bytes: &Bytes,
    ) -> ArchiveResult<Vec<PartReceipt>> {
        let parts = split_parts(bytes, self.config.part_size);
        debug!(key, upload_id, parts = parts.len(), "uploading parts");

        let mut receipts: Vec<PartReceipt> = stream::iter(parts.into_iter().enumerate())
            .map(|(index, body)| async move {
                let part_number = index + 1;
                self.with_retry("upload_part", move || {
                    self.backend
                        .upload_part(key, upload_id, part_number, body.clone())
                })
                .await
            })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .try_collect()
            .await?;

        receipts.sort_by_key(|r| r.part_number);
        Ok(receipts)
    }

    async fn abort(&self, key: &str, upload_id: &str) {
        match self
            .with_retry("abort_multipart", || self.backend.abort_multipart(key, upload_id))
            .await
        {
            Ok(()) => debug!(key, upload_id, "multipart upload aborted"),
            Err(e) => warn!(key, upload_id, error = %e, "multipart abort failed"),
        }
    }

    /// Best-effort removal of an object whose upload is being reported failed.
    async fn discard(&self, key: &str) {
        match self.with_retry("delete", || self.backend.delete(key)).await {
            Ok(()) => debug!(key, "object from failed completion discarded"),
            Err(e) => warn!(key, error = %e, "cannot discard object from failed completion"),
        }
    }
}

/// Split into `part_size` slices without copying. Empty input is one empty part.
pub fn split_parts(bytes: &Bytes, part_size: usize) -> Vec<Bytes> {
    if bytes.is_empty() || part_size == 0 {
        return vec![bytes.clone()];
    }
    (0..bytes.len())
        .step_by(part_size)
        .map(|start| bytes.slice(start..(start + part_size).min(bytes.len())))
        .collect()
}

#[async_trait]
impl<B: MultipartBackend + 'static> ObjectStore for MultipartTransfer<B> {
    async fn upload(
        &self,
        key: &str,
        bytes: Bytes,
        cancel: &CancellationToken,
    ) -> ArchiveResult<u64> {
        if cancel.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }

        let upload_id = self
            .with_retry("create_multipart", || self.backend.create_multipart(key))
            .await?;

        let transferred = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ArchiveError::Cancelled),
            parts = self.upload_parts(key, &upload_id, &bytes) => parts,
        };

        let parts = match transferred {
            Ok(parts) => parts,
            Err(e) => {
                warn!(key, upload_id = %upload_id, error = %e, "part upload failed, aborting");
                self.abort(key, &upload_id).await;
                return Err(e);
            }
        };

        let part_count = parts.len();
        let completed = self
            .with_retry("complete_multipart", || {
                self.backend
                    .complete_multipart(key, &upload_id, parts.clone())
            })
            .await;

        match completed {
            Ok(size) => {
                info!(key, size, parts = part_count, "object uploaded");
                Ok(size)
            }
            Err(e) => {
                warn!(key, upload_id = %upload_id, error = %e, "multipart completion failed, aborting");
                self.abort(key, &upload_id).await;
                self.discard(key).await;
                Err(e)
            }
        }
    }

    async fn download(&self, key: &str) -> ArchiveResult<Bytes> {
        let bytes = self.with_retry("get", || self.backend.get(key)).await?;
        debug!(key, size = bytes.len(), "object downloaded");
        Ok(bytes)
    }

    async fn delete(&self, key: &str) -> ArchiveResult<()> {
        self.with_retry("delete", || self.backend.delete(key)).await?;
        debug!(key, "object deleted");
        Ok(())
    }
}

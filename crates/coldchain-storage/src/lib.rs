//! # coldchain-storage
//!
//! Object-store transfer for archive files.
//!
//! `MultipartTransfer` implements `coldchain_core::ObjectStore` on top of any
//! `MultipartBackend`. Two backends ship here: `MemoryBackend` (with fault
//! injection, for tests) and `LocalFsBackend`. Adding an S3-compatible
//! provider means implementing the six `MultipartBackend` primitives; the
//! bounded concurrency, timeouts, retries, and abort-on-failure behaviour come
//! from the transfer layer.

pub mod local;
pub mod memory;
pub mod transfer;

use std::sync::Arc;

use coldchain_contracts::config::{ArchiverConfig, StorageProvider};
use coldchain_contracts::error::{ArchiveError, ArchiveResult};
use coldchain_core::traits::ObjectStore;

pub use local::LocalFsBackend;
pub use memory::{Fault, FaultTarget, MemoryBackend};
pub use transfer::{split_parts, MultipartBackend, MultipartTransfer, PartReceipt, TransferConfig};

/// Build the object store selected by `config.storage.provider`.
///
/// For `local-fs` the bucket is a directory under `storage.root`.
pub fn object_store(config: &ArchiverConfig) -> ArchiveResult<Arc<dyn ObjectStore>> {
    let transfer = TransferConfig::from(config);
    match config.storage.provider {
        StorageProvider::Memory => Ok(Arc::new(MultipartTransfer::new(
            Arc::new(MemoryBackend::new()),
            transfer,
        ))),
        StorageProvider::LocalFs => {
            let root = config
                .storage
                .root
                .as_ref()
                .ok_or_else(|| ArchiveError::ConfigError {
                    reason: "storage.root is required for the local-fs provider".to_string(),
                })?;
            Ok(Arc::new(MultipartTransfer::new(
                Arc::new(LocalFsBackend::new(root.join(&config.storage.bucket))),
                transfer,
            )))
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio_util::sync::CancellationToken;

    use coldchain_contracts::config::{ArchiverConfig, StorageProvider};
    use coldchain_contracts::error::{ArchiveError, ArchiveResult};
    use coldchain_core::traits::ObjectStore;

    use super::*;

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn transfer_config(part_size: usize, max_concurrency: usize) -> TransferConfig {
        TransferConfig {
            part_size,
            max_concurrency,
            operation_timeout: Duration::from_millis(500),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(5),
        }
    }

    fn payload(len: usize) -> Bytes {
        (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
    }

    fn memory_store(
        part_size: usize,
        max_concurrency: usize,
    ) -> (Arc<MemoryBackend>, MultipartTransfer<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let store = MultipartTransfer::new(backend.clone(), transfer_config(part_size, max_concurrency));
        (backend, store)
    }

    const KEY: &str = "audit-events/year=2024/month=01/day=02/a_b_c.parquet";

    /// Wraps a `MemoryBackend`, recording the peak number of part uploads in
    /// flight. With `lose_completion_reply` set, completion commits and then
    /// reports a timeout.
    #[derive(Default)]
    struct ObservedBackend {
        inner: MemoryBackend,
        part_delay: Duration,
        lose_completion_reply: bool,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl MultipartBackend for ObservedBackend {
        async fn create_multipart(&self, key: &str) -> ArchiveResult<String> {
            self.inner.create_multipart(key).await
        }

        async fn upload_part(
            &self,
            key: &str,
            upload_id: &str,
            part_number: usize,
            body: Bytes,
        ) -> ArchiveResult<PartReceipt> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.part_delay).await;
            let receipt = self
                .inner
                .upload_part(key, upload_id, part_number, body)
                .await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            receipt
        }

        async fn complete_multipart(
            &self,
            key: &str,
            upload_id: &str,
            parts: Vec<PartReceipt>,
        ) -> ArchiveResult<u64> {
            let size = self.inner.complete_multipart(key, upload_id, parts).await?;
            if self.lose_completion_reply {
                return Err(ArchiveError::Timeout {
                    operation: "complete_multipart".to_string(),
                    timeout_ms: 500,
                });
            }
            Ok(size)
        }

        async fn abort_multipart(&self, key: &str, upload_id: &str) -> ArchiveResult<()> {
            self.inner.abort_multipart(key, upload_id).await
        }

        async fn get(&self, key: &str) -> ArchiveResult<Bytes> {
            self.inner.get(key).await
        }

        async fn delete(&self, key: &str) -> ArchiveResult<()> {
            self.inner.delete(key).await
        }
    }

    // ── Part splitting and backoff ────────────────────────────────────────────

    #[test]
    fn test_split_parts_sizes() {
        let parts = split_parts(&payload(2500), 1024);
        let sizes: Vec<usize> = parts.iter().map(Bytes::len).collect();
        assert_eq!(sizes, vec![1024, 1024, 452]);

        assert_eq!(split_parts(&Bytes::new(), 1024).len(), 1);
        assert_eq!(split_parts(&payload(1024), 1024).len(), 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = TransferConfig {
            retry_base_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_millis(350),
            ..transfer_config(1024, 1)
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(350));
        assert_eq!(config.backoff(30), Duration::from_millis(350));
    }

    // ── Multipart upload ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_multipart_round_trip() {
        let (backend, store) = memory_store(1024, 4);
        let body = payload(10_000);

        let size = store
            .upload(KEY, body.clone(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(size, 10_000);
        assert_eq!(backend.part_attempts(), 10);
        assert_eq!(backend.pending_uploads().await, 0);
        assert_eq!(store.download(KEY).await.unwrap(), body);
    }

    #[tokio::test]
    async fn test_part_uploads_stay_within_concurrency_limit() {
        let backend = Arc::new(ObservedBackend {
            part_delay: Duration::from_millis(5),
            ..ObservedBackend::default()
        });
        let store = MultipartTransfer::new(backend.clone(), transfer_config(1024, 3));

        store
            .upload(KEY, payload(20 * 1024), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(backend.inner.part_attempts(), 20);
        assert_eq!(backend.peak.load(Ordering::SeqCst), 3);
        assert_eq!(backend.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_single_part_concurrency_is_sequential() {
        let backend = Arc::new(ObservedBackend {
            part_delay: Duration::from_millis(2),
            ..ObservedBackend::default()
        });
        let store = MultipartTransfer::new(backend.clone(), transfer_config(1024, 1));

        store
            .upload(KEY, payload(6 * 1024), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(backend.peak.load(Ordering::SeqCst), 1);
    }

    /// Completion commits, the reply is lost, and the retry finds no upload.
    #[tokio::test]
    async fn test_failed_completion_does_not_leave_object_visible() {
        let backend = Arc::new(ObservedBackend {
            lose_completion_reply: true,
            ..ObservedBackend::default()
        });
        let store = MultipartTransfer::new(backend.clone(), transfer_config(1024, 2));

        let result = store
            .upload(KEY, payload(3000), &CancellationToken::new())
            .await;
        assert!(result.is_err());
        assert!(!backend.inner.contains(KEY).await);
        assert_eq!(backend.inner.pending_uploads().await, 0);
    }

    #[tokio::test]
    async fn test_empty_object_upload() {
        let (_, store) = memory_store(1024, 4);
        store
            .upload(KEY, Bytes::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(store.download(KEY).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transient_part_failure_is_retried() {
        let (backend, store) = memory_store(1024, 2);
        backend
            .inject(FaultTarget::Part(3), Fault::Transient, 2)
            .await;

        store
            .upload(KEY, payload(5000), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(backend.part_attempts(), 5 + 2);
        assert!(backend.contains(KEY).await);
    }

    /// If part k of n keeps failing, nothing is visible and nothing is staged.
    #[tokio::test]
    async fn test_exhausted_retries_abort_upload() {
        let (backend, store) = memory_store(1024, 2);
        backend
            .inject(FaultTarget::Part(2), Fault::Transient, 100)
            .await;

        let err = store
            .upload(KEY, payload(5000), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Transient { .. }));
        assert!(!backend.contains(KEY).await);
        assert_eq!(backend.pending_uploads().await, 0);
    }

    #[tokio::test]
    async fn test_access_denied_is_not_retried() {
        let (backend, store) = memory_store(1024, 1);
        backend
            .inject(FaultTarget::Part(1), Fault::AccessDenied, 1)
            .await;

        let err = store
            .upload(KEY, payload(3000), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::AccessDenied { .. }));
        assert_eq!(backend.part_attempts(), 1);
        assert_eq!(backend.pending_uploads().await, 0);
    }

    #[tokio::test]
    async fn test_quota_on_complete_aborts() {
        let (backend, store) = memory_store(1024, 4);
        backend
            .inject(FaultTarget::Complete, Fault::QuotaExceeded, 1)
            .await;

        let err = store
            .upload(KEY, payload(3000), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::QuotaExceeded { .. }));
        assert!(!backend.contains(KEY).await);
        assert_eq!(backend.pending_uploads().await, 0);
    }

    #[tokio::test]
    async fn test_stalled_part_times_out_then_retries() {
        let backend = Arc::new(MemoryBackend::new());
        let store = MultipartTransfer::new(
            backend.clone(),
            TransferConfig {
                operation_timeout: Duration::from_millis(50),
                ..transfer_config(1024, 1)
            },
        );
        backend
            .inject(FaultTarget::Part(1), Fault::Stall(Duration::from_secs(5)), 1)
            .await;

        store
            .upload(KEY, payload(2000), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(backend.part_attempts(), 3);
    }

    #[tokio::test]
    async fn test_cancel_mid_upload_leaves_nothing() {
        let (backend, store) = memory_store(1024, 1);
        backend
            .inject(FaultTarget::Part(2), Fault::Stall(Duration::from_millis(400)), 1)
            .await;
        let cancel = CancellationToken::new();

        let (result, ()) = tokio::join!(store.upload(KEY, payload(4000), &cancel), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        assert!(matches!(result, Err(ArchiveError::Cancelled)));
        assert!(!backend.contains(KEY).await);
        assert_eq!(backend.pending_uploads().await, 0);
    }

    #[tokio::test]
    async fn test_precancelled_upload_never_starts() {
        let (backend, store) = memory_store(1024, 1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = store.upload(KEY, payload(10), &cancel).await.unwrap_err();
        assert!(matches!(err, ArchiveError::Cancelled));
        assert_eq!(backend.part_attempts(), 0);
    }

    // ── Download and delete ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_download_missing_is_not_found() {
        let (_, store) = memory_store(1024, 1);
        let err = store.download("nope").await.unwrap_err();
        assert!(matches!(err, ArchiveError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_download_retries_transient_failure() {
        let (backend, store) = memory_store(1024, 1);
        backend.put_object(KEY, payload(64)).await;
        backend.inject(FaultTarget::Get, Fault::Transient, 2).await;

        assert_eq!(store.download(KEY).await.unwrap(), payload(64));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (backend, store) = memory_store(1024, 1);
        backend.put_object(KEY, payload(64)).await;

        store.delete(KEY).await.unwrap();
        store.delete(KEY).await.unwrap();
        assert_eq!(backend.object_count().await, 0);
    }

    // ── Local filesystem ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_local_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(LocalFsBackend::new(dir.path()));
        let store = MultipartTransfer::new(backend.clone(), transfer_config(1024, 3));
        let body = payload(7000);

        let size = store
            .upload(KEY, body.clone(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(size, 7000);
        assert!(dir.path().join(KEY).is_file());
        assert_eq!(backend.pending_uploads().await.unwrap(), 0);
        assert_eq!(store.download(KEY).await.unwrap(), body);

        store.delete(KEY).await.unwrap();
        store.delete(KEY).await.unwrap();
        assert!(matches!(
            store.download(KEY).await,
            Err(ArchiveError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_local_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = MultipartTransfer::new(
            Arc::new(LocalFsBackend::new(dir.path())),
            transfer_config(1024, 1),
        );

        for key in ["../outside.parquet", "/etc/passwd", ".multipart/x", ""] {
            let err = store
                .upload(key, payload(10), &CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(err, ArchiveError::AccessDenied { .. }), "{key}");
        }
    }

    #[tokio::test]
    async fn test_local_abort_discards_staged_parts() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(dir.path());

        let upload_id = backend.create_multipart(KEY).await.unwrap();
        backend
            .upload_part(KEY, &upload_id, 1, payload(100))
            .await
            .unwrap();
        assert_eq!(backend.pending_uploads().await.unwrap(), 1);

        backend.abort_multipart(KEY, &upload_id).await.unwrap();
        assert_eq!(backend.pending_uploads().await.unwrap(), 0);
        assert!(!dir.path().join(KEY).exists());
    }

    // ── Provider selection ────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_object_store_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ArchiverConfig::default();
        config.storage.provider = StorageProvider::LocalFs;
        config.storage.root = Some(dir.path().to_path_buf());

        let store = object_store(&config).unwrap();
        store
            .upload("k/object", payload(10), &CancellationToken::new())
            .await
            .unwrap();
        assert!(dir.path().join("audit-archive/k/object").is_file());

        config.storage.root = None;
        assert!(matches!(
            object_store(&config),
            Err(ArchiveError::ConfigError { .. })
        ));
    }
}

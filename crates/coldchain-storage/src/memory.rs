//! In-process multipart backend with fault injection.
//!
//! Objects live in a map for the lifetime of the backend. Tests use the
//! injection hooks to make specific calls fail, stall, or deny access, and
//! the counters to assert what the transfer layer did about it.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use coldchain_contracts::error::{ArchiveError, ArchiveResult};

use crate::transfer::{MultipartBackend, PartReceipt};

/// Which backend call a fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultTarget {
    Part(usize),
    Complete,
    Get,
}

/// What happens when an injected fault fires.
#[derive(Debug, Clone)]
pub enum Fault {
    Transient,
    AccessDenied,
    QuotaExceeded,
    /// Sleep before answering, to trip the operation timeout.
    Stall(Duration),
}

#[derive(Debug)]
struct Injected {
    fault: Fault,
    remaining: u32,
}

#[derive(Debug)]
struct PendingUpload {
    key: String,
    parts: BTreeMap<usize, Bytes>,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: RwLock<HashMap<String, Bytes>>,
    pending: Mutex<HashMap<String, PendingUpload>>,
    faults: Mutex<HashMap<FaultTarget, Injected>>,
    part_attempts: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls to `target` fail with `fault`.
    pub async fn inject(&self, target: FaultTarget, fault: Fault, times: u32) {
        self.faults.lock().await.insert(
            target,
            Injected {
                fault,
                remaining: times,
            },
        );
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    pub async fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.read().await.get(key).cloned()
    }

    /// Overwrite an object directly, bypassing the multipart protocol.
    pub async fn put_object(&self, key: &str, bytes: Bytes) {
        self.objects.write().await.insert(key.to_string(), bytes);
    }

    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Multipart uploads that were started but neither completed nor aborted.
    pub async fn pending_uploads(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Total `upload_part` calls, including failed attempts.
    pub fn part_attempts(&self) -> usize {
        self.part_attempts.load(Ordering::SeqCst)
    }

    async fn check_fault(&self, target: FaultTarget) -> ArchiveResult<()> {
        let fault = {
            let mut faults = self.faults.lock().await;
            match faults.get_mut(&target) {
                Some(injected) if injected.remaining > 0 => {
                    injected.remaining -= 1;
                    Some(injected.fault.clone())
                }
                _ => None,
            }
        };

        let reason = format!("injected fault on {target:?}");
        match fault {
            None => Ok(()),
            Some(Fault::Stall(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
            Some(Fault::Transient) => Err(ArchiveError::Transient { reason }),
            Some(Fault::AccessDenied) => Err(ArchiveError::AccessDenied { reason }),
            Some(Fault::QuotaExceeded) => Err(ArchiveError::QuotaExceeded { reason }),
        }
    }
}

fn unknown_upload(upload_id: &str) -> ArchiveError {
    ArchiveError::NotFound {
        what: format!("multipart upload {upload_id}"),
    }
}

#[async_trait]
impl MultipartBackend for MemoryBackend {
    async fn create_multipart(&self, key: &str) -> ArchiveResult<String> {
        let upload_id = Uuid::new_v4().to_string();
        self.pending.lock().await.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _key: &str,
        upload_id: &str,
        part_number: usize,
        body: Bytes,
    ) -> ArchiveResult<PartReceipt> {
        self.part_attempts.fetch_add(1, Ordering::SeqCst);
        self.check_fault(FaultTarget::Part(part_number)).await?;

        let mut pending = self.pending.lock().await;
        let upload = pending
            .get_mut(upload_id)
            .ok_or_else(|| unknown_upload(upload_id))?;
        let size = body.len() as u64;
        upload.parts.insert(part_number, body);

        Ok(PartReceipt {
            part_number,
            etag: format!("{upload_id}-{part_number}"),
            size,
        })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<PartReceipt>,
    ) -> ArchiveResult<u64> {
        self.check_fault(FaultTarget::Complete).await?;

        let upload = self
            .pending
            .lock()
            .await
            .remove(upload_id)
            .ok_or_else(|| unknown_upload(upload_id))?;
        if upload.key != key {
            return Err(ArchiveError::Structural {
                reason: format!("upload {upload_id} was started for key {}", upload.key),
            });
        }

        let mut assembled = BytesMut::new();
        for (expected, receipt) in (1..).zip(&parts) {
            if receipt.part_number != expected {
                return Err(ArchiveError::Structural {
                    reason: format!("part {expected} missing from completion list"),
                });
            }
            let body = upload.parts.get(&expected).ok_or_else(|| ArchiveError::Structural {
                reason: format!("part {expected} was never uploaded"),
            })?;
            assembled.extend_from_slice(body);
        }

        let size = assembled.len() as u64;
        self.objects
            .write()
            .await
            .insert(key.to_string(), assembled.freeze());
        debug!(key, size, parts = parts.len(), "memory object committed");
        Ok(size)
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> ArchiveResult<()> {
        self.pending.lock().await.remove(upload_id);
        Ok(())
    }

    async fn get(&self, key: &str) -> ArchiveResult<Bytes> {
        self.check_fault(FaultTarget::Get).await?;
        self.object(key).await.ok_or_else(|| ArchiveError::NotFound {
            what: format!("object {key}"),
        })
    }

    async fn delete(&self, key: &str) -> ArchiveResult<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }
}

//! Blob store gateway.
//!
//! Durable storage for raw uploaded bytes behind a two-step protocol: the
//! store issues a single-use upload target, then a single-shot transfer
//! writes the bytes and returns a permanent, opaque storage id. On any
//! transfer failure the target is considered consumed; retrying requires a
//! fresh target. No resumable or partial transfer semantics — uploads are
//! size-capped, so single-shot is sufficient.
//!
//! Backends:
//! - [`HttpBlobStore`] — a remote store reached over HTTP.
//! - [`FsBlobStore`] — local-first, content-addressed files on disk.
//! - [`MemoryBlobStore`] — in-memory double for tests.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// A one-time-use upload destination. Valid for exactly one [`transfer`]
/// call; possession of the reference is the only credential.
///
/// [`transfer`]: BlobStore::transfer
#[derive(Debug)]
pub struct UploadTarget {
    pub reference: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Obtain a fresh single-use upload target.
    async fn request_upload_target(&self) -> Result<UploadTarget>;

    /// Write `bytes` to the target, returning the permanent storage id.
    ///
    /// The target is consumed whether or not the transfer succeeds.
    async fn transfer(
        &self,
        target: UploadTarget,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String>;
}

// ─── HTTP backend ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct UploadUrlResponse {
    #[serde(rename = "uploadUrl")]
    upload_url: String,
}

#[derive(Deserialize)]
struct TransferResponse {
    #[serde(rename = "storageId")]
    storage_id: String,
}

/// Remote blob store speaking the upload-url protocol: `POST /upload-url`
/// mints a target, a `POST` of the raw bytes to that target returns
/// `{"storageId": ...}`.
pub struct HttpBlobStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBlobStore {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Transfer(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn request_upload_target(&self) -> Result<UploadTarget> {
        let resp = self
            .client
            .post(format!("{}/upload-url", self.base_url))
            .send()
            .await
            .map_err(|e| Error::Transfer(format!("upload-url request failed: {}", e)))?;
        if !resp.status().is_success() {
            return Err(Error::Transfer(format!(
                "upload-url request returned {}",
                resp.status()
            )));
        }
        let body: UploadUrlResponse = resp
            .json()
            .await
            .map_err(|e| Error::Transfer(format!("bad upload-url response: {}", e)))?;
        Ok(UploadTarget {
            reference: body.upload_url,
        })
    }

    async fn transfer(
        &self,
        target: UploadTarget,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String> {
        let resp = self
            .client
            .post(&target.reference)
            .header("Content-Type", content_type)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| Error::Transfer(format!("transfer failed: {}", e)))?;
        if !resp.status().is_success() {
            return Err(Error::Transfer(format!(
                "transfer returned {}",
                resp.status()
            )));
        }
        let body: TransferResponse = resp
            .json()
            .await
            .map_err(|e| Error::Transfer(format!("bad transfer response: {}", e)))?;
        Ok(body.storage_id)
    }
}

// ─── Filesystem backend ─────────────────────────────────────────────────

/// Local-first blob store. Targets are single-use tokens; bytes land under
/// the root directory named by their SHA-256 digest, which doubles as the
/// storage id.
pub struct FsBlobStore {
    root: PathBuf,
    issued: Mutex<HashSet<String>>,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            issued: Mutex::new(HashSet::new()),
        }
    }

    /// Consume a target token. Errors if it was never issued or already used.
    fn consume(&self, reference: &str) -> Result<()> {
        let mut issued = self.issued.lock().expect("issued targets lock poisoned");
        if !issued.remove(reference) {
            return Err(Error::Transfer(
                "unknown or already consumed upload target".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn request_upload_target(&self) -> Result<UploadTarget> {
        let token = uuid::Uuid::new_v4().to_string();
        self.issued
            .lock()
            .expect("issued targets lock poisoned")
            .insert(token.clone());
        Ok(UploadTarget { reference: token })
    }

    async fn transfer(
        &self,
        target: UploadTarget,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<String> {
        self.consume(&target.reference)?;

        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let storage_id = format!("{:x}", hasher.finalize());

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Error::Transfer(format!("failed to create blob root: {}", e)))?;
        tokio::fs::write(self.root.join(&storage_id), bytes)
            .await
            .map_err(|e| Error::Transfer(format!("failed to write blob: {}", e)))?;

        Ok(storage_id)
    }
}

// ─── In-memory backend ──────────────────────────────────────────────────

#[derive(Default)]
struct MemoryBlobInner {
    blobs: HashMap<String, Vec<u8>>,
    issued: HashSet<String>,
    targets_requested: u64,
    transfers_attempted: u64,
}

/// In-memory blob store for tests. Records call counts and can be told to
/// fail every transfer.
#[derive(Default)]
pub struct MemoryBlobStore {
    inner: Mutex<MemoryBlobInner>,
    fail_transfers: bool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every transfer fails with [`Error::Transfer`].
    pub fn failing() -> Self {
        Self {
            inner: Mutex::new(MemoryBlobInner::default()),
            fail_transfers: true,
        }
    }

    pub fn targets_requested(&self) -> u64 {
        self.inner.lock().unwrap().targets_requested
    }

    pub fn transfers_attempted(&self) -> u64 {
        self.inner.lock().unwrap().transfers_attempted
    }

    pub fn blob(&self, storage_id: &str) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().blobs.get(storage_id).cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn request_upload_target(&self) -> Result<UploadTarget> {
        let token = uuid::Uuid::new_v4().to_string();
        let mut inner = self.inner.lock().unwrap();
        inner.targets_requested += 1;
        inner.issued.insert(token.clone());
        Ok(UploadTarget { reference: token })
    }

    async fn transfer(
        &self,
        target: UploadTarget,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        inner.transfers_attempted += 1;
        if !inner.issued.remove(&target.reference) {
            return Err(Error::Transfer(
                "unknown or already consumed upload target".to_string(),
            ));
        }
        if self.fail_transfers {
            return Err(Error::Transfer("simulated transfer failure".to_string()));
        }
        let storage_id = format!("mem-{}", uuid::Uuid::new_v4());
        inner.blobs.insert(storage_id.clone(), bytes.to_vec());
        Ok(storage_id)
    }
}

//! Ingestion pipeline orchestration.
//!
//! Drives one upload through `validating → extracting → requesting-target
//! → uploading → committing` as an explicit state machine, threading each
//! step's output into the next. Nothing durable is written before the
//! commit, and the commit itself is atomic, so a failure at any step aborts
//! cleanly with that step's error kind — no rollback, and no partial
//! document ever becomes visible.

use std::sync::Arc;

use tracing::debug;

use crate::blob::BlobStore;
use crate::error::{Error, Result};
use crate::extract::{self, MIME_PDF};
use crate::models::Document;
use crate::registry::DocumentRegistry;

/// Where an ingestion attempt currently stands. Starting a new upload while
/// another is in flight on the same controller is structurally rejected.
#[derive(Debug)]
pub enum IngestState {
    Idle,
    Validating,
    Extracting,
    RequestingTarget,
    Uploading,
    Committing,
    Succeeded(Document),
    Failed(Error),
}

impl IngestState {
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            IngestState::Validating
                | IngestState::Extracting
                | IngestState::RequestingTarget
                | IngestState::Uploading
                | IngestState::Committing
        )
    }

    fn name(&self) -> &'static str {
        match self {
            IngestState::Idle => "idle",
            IngestState::Validating => "validating",
            IngestState::Extracting => "extracting",
            IngestState::RequestingTarget => "requesting-target",
            IngestState::Uploading => "uploading",
            IngestState::Committing => "committing",
            IngestState::Succeeded(_) => "succeeded",
            IngestState::Failed(_) => "failed",
        }
    }
}

/// Orchestrates one upload at a time: extractor → blob store → registry.
///
/// Holds no durable state of its own, only the in-flight projection. On
/// success the committed [`Document`] is handed to the caller and the
/// controller is done with it; a finished controller (succeeded or failed)
/// may start a fresh attempt.
pub struct IngestController {
    blob: Arc<dyn BlobStore>,
    registry: DocumentRegistry,
    max_file_bytes: u64,
    state: IngestState,
}

impl IngestController {
    pub fn new(blob: Arc<dyn BlobStore>, registry: DocumentRegistry, max_file_bytes: u64) -> Self {
        Self {
            blob,
            registry,
            max_file_bytes,
            state: IngestState::Idle,
        }
    }

    pub fn state(&self) -> &IngestState {
        &self.state
    }

    /// Ingest one PDF. Returns the committed document, or the first step's
    /// error; either way the controller ends in `Succeeded`/`Failed`.
    pub async fn upload(&mut self, name: &str, bytes: Vec<u8>) -> Result<Document> {
        if self.state.is_in_flight() {
            return Err(Error::Validation(
                "an upload is already in progress on this controller".into(),
            ));
        }

        match self.run(name, bytes).await {
            Ok(document) => {
                self.state = IngestState::Succeeded(document.clone());
                Ok(document)
            }
            Err(e) => {
                self.state = IngestState::Failed(e.clone());
                Err(e)
            }
        }
    }

    async fn run(&mut self, name: &str, bytes: Vec<u8>) -> Result<Document> {
        self.transition(IngestState::Validating);
        let size = bytes.len() as u64;
        if size > self.max_file_bytes {
            return Err(Error::FileTooLarge {
                size,
                limit: self.max_file_bytes,
            });
        }

        // Extraction is CPU-bound; cross an async boundary so the caller's
        // task stays responsive.
        self.transition(IngestState::Extracting);
        let bytes = Arc::new(bytes);
        let for_extract = Arc::clone(&bytes);
        let text = tokio::task::spawn_blocking(move || extract::extract_text(&for_extract))
            .await
            .map_err(|e| Error::Extraction(format!("extraction task failed: {}", e)))??;

        self.transition(IngestState::RequestingTarget);
        let target = self.blob.request_upload_target().await?;

        self.transition(IngestState::Uploading);
        let storage_id = self.blob.transfer(target, &bytes, MIME_PDF).await?;

        self.transition(IngestState::Committing);
        self.registry
            .commit(name, &storage_id, bytes.len() as i64, &text)
            .await
    }

    fn transition(&mut self, next: IngestState) {
        debug!(from = self.state.name(), to = next.name(), "ingest transition");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::migrate;

    /// Minimal valid single-page PDF containing `phrase`, with correct xref
    /// byte offsets so the extractor can parse it.
    pub(crate) fn minimal_pdf_with_phrase(phrase: &str) -> Vec<u8> {
        let stream_body = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET\n", phrase);
        let mut out = Vec::new();
        out.extend_from_slice(b"%PDF-1.4\n");
        let o1 = out.len();
        out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
        let o2 = out.len();
        out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
        let o3 = out.len();
        out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
        let o4 = out.len();
        out.extend_from_slice(
            format!(
                "4 0 obj << /Length {} >> stream\n{}endstream endobj\n",
                stream_body.len(),
                stream_body
            )
            .as_bytes(),
        );
        let o5 = out.len();
        out.extend_from_slice(
            b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
        );
        let xref_start = out.len();
        out.extend_from_slice(b"xref\n0 6\n");
        out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
        for offset in [o1, o2, o3, o4, o5] {
            out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
        out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
        out.extend_from_slice(b"%%EOF\n");
        out
    }

    async fn test_registry() -> (tempfile::TempDir, DocumentRegistry) {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("docchat.sqlite"))
            .await
            .unwrap();
        migrate::apply_schema(&pool).await.unwrap();
        (tmp, DocumentRegistry::new(pool))
    }

    #[tokio::test]
    async fn oversized_file_fails_before_any_call() {
        let (_tmp, registry) = test_registry().await;
        let blob = Arc::new(MemoryBlobStore::new());
        let mut controller =
            IngestController::new(blob.clone(), registry.clone(), 10 * 1024 * 1024);

        let oversized = vec![0u8; 10 * 1024 * 1024 + 1];
        let err = controller.upload("big.pdf", oversized).await.unwrap_err();

        assert!(matches!(err, Error::FileTooLarge { .. }));
        assert!(matches!(controller.state(), IngestState::Failed(_)));
        assert_eq!(blob.targets_requested(), 0);
        assert_eq!(blob.transfers_attempted(), 0);
        assert!(registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_pdf_fails_in_extraction() {
        let (_tmp, registry) = test_registry().await;
        let blob = Arc::new(MemoryBlobStore::new());
        let mut controller = IngestController::new(blob.clone(), registry.clone(), 1024);

        let err = controller
            .upload("bad.pdf", b"not a pdf at all".to_vec())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Extraction(_)));
        // Extraction failed before the blob store was touched.
        assert_eq!(blob.targets_requested(), 0);
        assert!(registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transfer_failure_leaves_no_document() {
        let (_tmp, registry) = test_registry().await;
        let blob = Arc::new(MemoryBlobStore::failing());
        let mut controller = IngestController::new(blob.clone(), registry.clone(), 1 << 20);

        let pdf = minimal_pdf_with_phrase("transfer test");
        let err = controller.upload("doc.pdf", pdf.clone()).await.unwrap_err();

        assert!(matches!(err, Error::Transfer(_)));
        assert_eq!(blob.transfers_attempted(), 1);
        assert!(registry.list().await.unwrap().is_empty());

        // The failed controller may start a fresh attempt; each retry
        // requests a fresh target.
        let _ = controller.upload("doc.pdf", pdf).await;
        assert_eq!(blob.targets_requested(), 2);
    }

    #[tokio::test]
    async fn successful_upload_commits_a_complete_document() {
        let (_tmp, registry) = test_registry().await;
        let blob = Arc::new(MemoryBlobStore::new());
        let mut controller = IngestController::new(blob.clone(), registry.clone(), 1 << 20);

        let pdf = minimal_pdf_with_phrase("Hello world");
        let byte_len = pdf.len() as i64;
        let document = controller.upload("spec.pdf", pdf).await.unwrap();

        assert_eq!(document.name, "spec.pdf");
        assert_eq!(document.size, byte_len);
        assert!(document.text.contains("Hello world"));
        assert!(!document.agent_thread_id.is_empty());
        assert!(matches!(controller.state(), IngestState::Succeeded(_)));

        // The stored blob is byte-identical to the upload.
        assert_eq!(blob.blob(&document.storage_id).unwrap().len() as i64, byte_len);
    }
}

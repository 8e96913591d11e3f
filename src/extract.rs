//! Plain-text extraction for uploaded PDF binaries.
//!
//! Pure function: bytes in, UTF-8 text out. Reading order is preserved
//! across pages. A structurally valid but content-empty PDF (scanned or
//! image-only) yields empty or whitespace text rather than an error; an
//! unparseable binary fails with [`Error::Extraction`], which is terminal
//! for the upload attempt.

use crate::error::{Error, Result};

/// The only content type accepted at the upload boundary.
pub const MIME_PDF: &str = "application/pdf";

/// Extract the plain-text content of a PDF.
pub fn extract_text(bytes: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| Error::Extraction(e.to_string()))
}

//! Error taxonomy shared across the ingestion pipeline and the chat engine.
//!
//! Each pipeline stage fails independently with its own kind and stops the
//! pipeline; no stage retries on its own. Retry is a caller decision:
//! [`Error::FileTooLarge`] wants a different file, [`Error::Transfer`] the
//! same file with a fresh upload target, [`Error::Agent`] marks a single
//! message and leaves the thread intact.

/// Unified error type for the document and conversation core.
#[derive(Debug, Clone)]
pub enum Error {
    /// Selected file exceeds the configured size cap. No upload is attempted.
    FileTooLarge { size: u64, limit: u64 },
    /// Bad input shape or size (empty name, empty/oversized message, ...).
    /// Local, rejected before any I/O.
    Validation(String),
    /// The binary is not a parseable document. Terminal for this attempt.
    Extraction(String),
    /// Network or storage failure during upload. The upload target is
    /// consumed; a retry needs a fresh one.
    Transfer(String),
    /// The registry rejected the commit (e.g. inconsistent size).
    Commit(String),
    /// Inference or streaming failure, surfaced per-message.
    Agent(String),
    /// Lookup for an id that does not exist.
    NotFound(String),
    /// Underlying database failure.
    Db(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::FileTooLarge { size, limit } => {
                write!(f, "file size {} exceeds limit of {} bytes", size, limit)
            }
            Error::Validation(msg) => write!(f, "validation failed: {}", msg),
            Error::Extraction(msg) => write!(f, "text extraction failed: {}", msg),
            Error::Transfer(msg) => write!(f, "blob transfer failed: {}", msg),
            Error::Commit(msg) => write!(f, "document commit failed: {}", msg),
            Error::Agent(msg) => write!(f, "agent failed: {}", msg),
            Error::NotFound(what) => write!(f, "not found: {}", what),
            Error::Db(msg) => write!(f, "database error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Error::NotFound("row not found".to_string()),
            other => Error::Db(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

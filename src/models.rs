//! Core data models for documents and conversation threads.
//!
//! These types represent the rows the registry and thread store persist and
//! the pages the chat layer consumes.

use serde::Serialize;

/// A fully committed document. Never observable in a partial state: the row
/// only exists once extraction, upload, and thread creation all succeeded.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    /// Original filename, user-supplied, not unique.
    pub name: String,
    /// Opaque blob store reference, set exactly once at commit.
    pub storage_id: String,
    /// Byte length, equal to the size actually transferred.
    pub size: i64,
    /// Extracted plain text. May be empty for scanned/image-only PDFs.
    pub text: String,
    /// The document's conversation thread, created atomically with the row.
    pub agent_thread_id: String,
    /// Commit timestamp, unix seconds.
    pub created_at: i64,
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            _ => None,
        }
    }
}

/// Message lifecycle. Assistant messages move `pending → streaming →
/// complete` (or `failed`); user messages are `complete` once persisted.
/// A `pending`/`failed` user message only ever exists in the client-local
/// speculative projection, never in the authoritative log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Streaming,
    Complete,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Streaming => "streaming",
            MessageStatus::Complete => "complete",
            MessageStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MessageStatus::Pending),
            "streaming" => Some(MessageStatus::Streaming),
            "complete" => Some(MessageStatus::Complete),
            "failed" => Some(MessageStatus::Failed),
            _ => None,
        }
    }

    /// A finalized message no longer changes; the pagination watermark may
    /// advance past it.
    pub fn is_final(&self) -> bool {
        matches!(self, MessageStatus::Complete | MessageStatus::Failed)
    }
}

/// One entry in a thread's append-only log.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    /// Position in the thread's total order. Creation order, never reused.
    pub seq: i64,
    pub role: MessageRole,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: i64,
}

/// A page of messages in creation order plus the forward-only cursor for
/// the next fetch.
///
/// The cursor stops before the first non-finalized message, so a page whose
/// tail is still streaming stays "live": re-fetching from the same cursor
/// picks up the grown content.
#[derive(Debug, Clone, Serialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub next_cursor: i64,
    /// True when the page was cut short by `page_size`.
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_text() {
        for role in [MessageRole::User, MessageRole::Assistant] {
            assert_eq!(MessageRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(MessageRole::parse("system"), None);
    }

    #[test]
    fn only_complete_and_failed_are_final() {
        assert!(MessageStatus::Complete.is_final());
        assert!(MessageStatus::Failed.is_final());
        assert!(!MessageStatus::Pending.is_final());
        assert!(!MessageStatus::Streaming.is_final());
    }
}

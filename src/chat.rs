//! Conversation controller — optimistic sends over the authoritative log.
//!
//! The view it maintains is the authoritative prefix fetched from the
//! thread store concatenated with a speculative queue of not-yet-confirmed
//! sends. Reconciliation matches by submission order, never by content:
//! appends are serialized by the store, so the seq confirmed for each send
//! arrives in submission order, and a speculative entry is dropped exactly
//! when the authoritative pages cover its seq. Two identical consecutive
//! sends therefore cannot cross-match.
//!
//! Streaming assistant messages are rendered straight from the store's row
//! on each refresh; the controller buffers no tokens of its own.

use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{Message, MessageRole, MessageStatus};
use crate::thread::ThreadStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendState {
    /// Shown optimistically, not yet sent.
    Queued,
    /// The store confirmed this seq; waiting for a page fetch to cover it.
    Acked(i64),
    /// The send failed; kept visible until dismissed or resubmitted.
    Failed,
}

#[derive(Debug, Clone)]
struct Speculative {
    local_id: u64,
    text: String,
    state: SendState,
    created_at: i64,
}

pub struct ChatController {
    store: ThreadStore,
    thread_id: String,
    page_size: i64,
    max_message_chars: usize,
    authoritative: Vec<Message>,
    /// Forward-only cursor; everything at or below it is finalized.
    watermark: i64,
    speculative: Vec<Speculative>,
    next_local_id: u64,
    restored_input: Option<String>,
}

impl ChatController {
    pub fn new(
        store: ThreadStore,
        thread_id: impl Into<String>,
        page_size: i64,
        max_message_chars: usize,
    ) -> Self {
        Self {
            store,
            thread_id: thread_id.into(),
            page_size,
            max_message_chars,
            authoritative: Vec::new(),
            watermark: 0,
            speculative: Vec::new(),
            next_local_id: 1,
            restored_input: None,
        }
    }

    /// Validate and queue a send for optimistic display. Purely local: no
    /// I/O happens here, so a rejected message costs nothing.
    pub fn queue(&mut self, text: &str) -> Result<u64> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Error::Validation("message must not be empty".into()));
        }
        let chars = trimmed.chars().count();
        if chars > self.max_message_chars {
            return Err(Error::Validation(format!(
                "message is {} characters, limit is {}",
                chars, self.max_message_chars
            )));
        }

        let local_id = self.next_local_id;
        self.next_local_id += 1;
        self.speculative.push(Speculative {
            local_id,
            text: trimmed.to_string(),
            state: SendState::Queued,
            created_at: chrono::Utc::now().timestamp(),
        });
        Ok(local_id)
    }

    /// Send queued entries in submission order.
    ///
    /// On failure the entry becomes `failed`, the original text is parked
    /// for resubmission, and later queued entries are left queued so the
    /// submission order cannot invert. Nothing is retried automatically.
    pub async fn flush(&mut self) -> Result<()> {
        for i in 0..self.speculative.len() {
            if self.speculative[i].state != SendState::Queued {
                continue;
            }
            let text = self.speculative[i].text.clone();
            match self.store.append_user_message(&self.thread_id, &text).await {
                Ok(confirmed) => {
                    self.speculative[i].state = SendState::Acked(confirmed.seq);
                    debug!(
                        local_id = self.speculative[i].local_id,
                        seq = confirmed.seq,
                        "send confirmed"
                    );
                }
                Err(e) => {
                    self.speculative[i].state = SendState::Failed;
                    self.restored_input = Some(text);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Queue and send in one step.
    pub async fn submit(&mut self, text: &str) -> Result<u64> {
        let local_id = self.queue(text)?;
        self.flush().await?;
        Ok(local_id)
    }

    /// Pull new pages from the store, re-reading the live (non-finalized)
    /// tail, and drop speculative entries the authoritative log now covers.
    pub async fn refresh(&mut self) -> Result<()> {
        loop {
            let before = self.watermark;
            let page = self
                .store
                .list_messages(&self.thread_id, before, self.page_size)
                .await?;
            // Everything past the watermark may have changed since the last
            // fetch; replace it with the fresh read.
            self.authoritative.retain(|m| m.seq <= before);
            self.authoritative.extend(page.messages);
            self.watermark = page.next_cursor;
            self.reconcile();
            if !page.has_more || self.watermark == before {
                break;
            }
        }
        Ok(())
    }

    fn reconcile(&mut self) {
        let authoritative = &self.authoritative;
        self.speculative.retain(|entry| match entry.state {
            SendState::Acked(seq) => !authoritative.iter().any(|m| m.seq == seq),
            _ => true,
        });
    }

    /// The merged projection: authoritative messages in creation order,
    /// then speculative entries as local `pending`/`failed` user messages.
    pub fn view(&self) -> Vec<Message> {
        let mut view = self.authoritative.clone();
        let base_seq = view.last().map(|m| m.seq).unwrap_or(0);
        for (i, entry) in self.speculative.iter().enumerate() {
            view.push(Message {
                id: format!("local-{}", entry.local_id),
                thread_id: self.thread_id.clone(),
                seq: base_seq + 1 + i as i64,
                role: MessageRole::User,
                content: entry.text.clone(),
                status: match entry.state {
                    SendState::Failed => MessageStatus::Failed,
                    _ => MessageStatus::Pending,
                },
                created_at: entry.created_at,
            });
        }
        view
    }

    /// Text of the most recent failed send, for refilling the input field.
    /// Consumed on read.
    pub fn take_restored_input(&mut self) -> Option<String> {
        self.restored_input.take()
    }

    /// Remove a failed speculative entry (the user dismissed it or is
    /// resubmitting the restored text). Returns false for unknown ids or
    /// entries that are not failed.
    pub fn dismiss_failed(&mut self, local_id: u64) -> bool {
        let before = self.speculative.len();
        self.speculative
            .retain(|e| !(e.local_id == local_id && e.state == SendState::Failed));
        self.speculative.len() != before
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// True while the authoritative tail is still pending or streaming, or
    /// sends are awaiting confirmation — callers should keep polling
    /// [`refresh`](Self::refresh).
    pub fn is_live(&self) -> bool {
        self.authoritative
            .iter()
            .any(|m| !m.status.is_final())
            || self
                .speculative
                .iter()
                .any(|e| matches!(e.state, SendState::Queued | SendState::Acked(_)))
    }
}

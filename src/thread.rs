//! Conversation thread store.
//!
//! Per-document, append-only message log with cursor pagination and
//! streaming writes. All writes to a thread are serialized here: seq
//! assignment happens in a single `INSERT .. SELECT MAX(seq)+1` statement
//! with a unique index as backstop, so callers never lock.
//!
//! [`ThreadStore::append_user_message`] persists the user message and an
//! assistant placeholder in one transaction, then hands the reply off to
//! the [`Agent`] on a spawned task. Creating the placeholder up front pins
//! the reply's position in the log, so a later user send cannot interleave
//! ahead of a reply that is still streaming.

use std::sync::Arc;

use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use crate::agent::{Agent, ChatTurn};
use crate::error::{Error, Result};
use crate::models::{Message, MessagePage, MessageRole, MessageStatus};

#[derive(Clone)]
pub struct ThreadStore {
    pool: SqlitePool,
    agent: Arc<dyn Agent>,
    max_message_chars: usize,
}

impl ThreadStore {
    pub fn new(pool: SqlitePool, agent: Arc<dyn Agent>, max_message_chars: usize) -> Self {
        Self {
            pool,
            agent,
            max_message_chars,
        }
    }

    /// Fetch a page of messages in creation order, starting after `cursor`
    /// (0 for the beginning of the thread).
    ///
    /// The returned `next_cursor` is a forward-only watermark: it advances
    /// across finalized messages and stops before the first
    /// `pending`/`streaming` one, so re-fetching from it picks up content
    /// that streamed in since the last read (the "live page" rule).
    pub async fn list_messages(
        &self,
        thread_id: &str,
        cursor: i64,
        page_size: i64,
    ) -> Result<MessagePage> {
        self.require_thread(thread_id).await?;

        // One extra row to detect a cut-short page.
        let rows = sqlx::query(
            "SELECT id, thread_id, seq, role, content, status, created_at
             FROM messages WHERE thread_id = ? AND seq > ?
             ORDER BY seq ASC LIMIT ?",
        )
        .bind(thread_id)
        .bind(cursor)
        .bind(page_size + 1)
        .fetch_all(&self.pool)
        .await?;

        let has_more = rows.len() as i64 > page_size;
        let messages: Vec<Message> = rows
            .into_iter()
            .take(page_size as usize)
            .map(row_to_message)
            .collect::<Result<_>>()?;

        let mut next_cursor = cursor;
        for message in &messages {
            if !message.status.is_final() {
                break;
            }
            next_cursor = message.seq;
        }

        Ok(MessagePage {
            messages,
            next_cursor,
            has_more,
        })
    }

    /// Append a user message and kick off the assistant reply.
    ///
    /// Validates the text locally (non-empty after trimming, at most the
    /// configured character cap) before any I/O. On success the user
    /// message is already `complete` and the assistant placeholder is
    /// `pending`; the reply streams into the placeholder on a background
    /// task and the returned [`Message`] is the confirmed user entry.
    pub async fn append_user_message(&self, thread_id: &str, text: &str) -> Result<Message> {
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

        self.require_thread(thread_id).await?;

        let user_id = uuid::Uuid::new_v4().to_string();
        let assistant_id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await?;
        insert_message(
            &mut tx,
            &user_id,
            thread_id,
            MessageRole::User,
            trimmed,
            MessageStatus::Complete,
            now,
        )
        .await?;
        insert_message(
            &mut tx,
            &assistant_id,
            thread_id,
            MessageRole::Assistant,
            "",
            MessageStatus::Pending,
            now,
        )
        .await?;

        let user_seq: i64 = sqlx::query_scalar("SELECT seq FROM messages WHERE id = ?")
            .bind(&user_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(thread = %thread_id, seq = user_seq, "appended user message");

        let store = self.clone();
        let thread = thread_id.to_string();
        let prompt = trimmed.to_string();
        tokio::spawn(async move {
            store
                .run_agent(&thread, &assistant_id, user_seq, &prompt)
                .await;
        });

        Ok(Message {
            id: user_id,
            thread_id: thread_id.to_string(),
            seq: user_seq,
            role: MessageRole::User,
            content: trimmed.to_string(),
            status: MessageStatus::Complete,
            created_at: now,
        })
    }

    /// Drive one assistant reply: load the grounding document and prior
    /// transcript, stream deltas into the placeholder row, finalize as
    /// `complete` or `failed`. Failures mark only this message.
    async fn run_agent(&self, thread_id: &str, assistant_id: &str, user_seq: i64, prompt: &str) {
        let outcome = self
            .stream_reply(thread_id, assistant_id, user_seq, prompt)
            .await;

        let (status, full_text) = match outcome {
            Ok(full) => (MessageStatus::Complete, Some(full)),
            Err(e) => {
                warn!(thread = %thread_id, message = %assistant_id, error = %e, "agent run failed");
                (MessageStatus::Failed, None)
            }
        };

        let result = match full_text {
            // Authoritative full text on success; partial content stays as
            // streamed on failure.
            Some(full) => {
                sqlx::query("UPDATE messages SET content = ?, status = ? WHERE id = ?")
                    .bind(&full)
                    .bind(status.as_str())
                    .bind(assistant_id)
                    .execute(&self.pool)
                    .await
            }
            None => {
                sqlx::query("UPDATE messages SET status = ? WHERE id = ?")
                    .bind(status.as_str())
                    .bind(assistant_id)
                    .execute(&self.pool)
                    .await
            }
        };
        if let Err(e) = result {
            warn!(message = %assistant_id, error = %e, "failed to finalize assistant message");
        }
    }

    async fn stream_reply(
        &self,
        thread_id: &str,
        assistant_id: &str,
        user_seq: i64,
        prompt: &str,
    ) -> Result<String> {
        let document_text: String =
            sqlx::query_scalar("SELECT text FROM documents WHERE agent_thread_id = ?")
                .bind(thread_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| Error::NotFound(format!("document for thread {}", thread_id)))?;

        let transcript = self.transcript_before(thread_id, user_seq).await?;

        // Deltas arrive on a sync callback; a writer task applies them to
        // the placeholder row as they come in.
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let pool = self.pool.clone();
        let row_id = assistant_id.to_string();
        let writer = tokio::spawn(async move {
            while let Some(delta) = rx.recv().await {
                let written =
                    sqlx::query("UPDATE messages SET content = content || ?, status = ? WHERE id = ?")
                        .bind(&delta)
                        .bind(MessageStatus::Streaming.as_str())
                        .bind(&row_id)
                        .execute(&pool)
                        .await;
                if let Err(e) = written {
                    warn!(message = %row_id, error = %e, "failed to apply streamed delta");
                }
            }
        });

        let on_delta = move |delta: &str| {
            let _ = tx.send(delta.to_string());
        };
        let sent = self
            .agent
            .send(&document_text, &transcript, prompt, &on_delta)
            .await;

        // on_delta owns the sender; once `send` returns nothing else can
        // emit, so the writer drains and exits.
        drop(on_delta);
        let _ = writer.await;

        sent
    }

    /// Prior completed turns, oldest first, up to (excluding) `before_seq`.
    async fn transcript_before(&self, thread_id: &str, before_seq: i64) -> Result<Vec<ChatTurn>> {
        let rows = sqlx::query(
            "SELECT role, content FROM messages
             WHERE thread_id = ? AND seq < ? AND status = 'complete'
             ORDER BY seq ASC",
        )
        .bind(thread_id)
        .bind(before_seq)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let role: String = row.get("role");
                let role = MessageRole::parse(&role)
                    .ok_or_else(|| Error::Db(format!("unknown role '{}'", role)))?;
                Ok(ChatTurn {
                    role,
                    content: row.get("content"),
                })
            })
            .collect()
    }

    async fn require_thread(&self, thread_id: &str) -> Result<()> {
        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM threads WHERE id = ?")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(Error::NotFound(format!("thread {}", thread_id)));
        }
        Ok(())
    }
}

/// Insert a message with the next seq for its thread. The seq is assigned
/// inside the statement itself, so concurrent appends serialize on the
/// store rather than racing in the caller.
async fn insert_message(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    id: &str,
    thread_id: &str,
    role: MessageRole,
    content: &str,
    status: MessageStatus,
    created_at: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO messages (id, thread_id, seq, role, content, status, created_at)
         SELECT ?, ?, COALESCE(MAX(seq), 0) + 1, ?, ?, ?, ?
         FROM messages WHERE thread_id = ?",
    )
    .bind(id)
    .bind(thread_id)
    .bind(role.as_str())
    .bind(content)
    .bind(status.as_str())
    .bind(created_at)
    .bind(thread_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn row_to_message(row: sqlx::sqlite::SqliteRow) -> Result<Message> {
    let role: String = row.get("role");
    let status: String = row.get("status");
    Ok(Message {
        id: row.get("id"),
        thread_id: row.get("thread_id"),
        seq: row.get("seq"),
        role: MessageRole::parse(&role).ok_or_else(|| Error::Db(format!("unknown role '{}'", role)))?,
        content: row.get("content"),
        status: MessageStatus::parse(&status)
            .ok_or_else(|| Error::Db(format!("unknown status '{}'", status)))?,
        created_at: row.get("created_at"),
    })
}

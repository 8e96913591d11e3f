use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes. Idempotent; safe to run on every startup.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Conversation threads. Created only from within a document commit, so
    // a thread without a document is never visible.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS threads (
            id TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            storage_id TEXT NOT NULL,
            size INTEGER NOT NULL,
            text TEXT NOT NULL,
            agent_thread_id TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (agent_thread_id) REFERENCES threads(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only message log. seq is the per-thread total order; the
    // unique index is the backstop for serialized appends.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            thread_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
            content TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('pending', 'streaming', 'complete', 'failed')),
            created_at INTEGER NOT NULL,
            UNIQUE(thread_id, seq),
            FOREIGN KEY (thread_id) REFERENCES threads(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_thread_seq ON messages(thread_id, seq)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_created_at ON documents(created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

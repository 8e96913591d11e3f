//! Document registry — the authoritative record for uploaded files.
//!
//! [`DocumentRegistry::commit`] is the single point after which a document
//! is guaranteed fully formed: the conversation thread row and the document
//! row are written in one SQLite transaction, so no reader ever observes a
//! document without its thread, and no partial document ever appears in
//! listings. There is no separate create-thread step for callers.

use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::error::{Error, Result};
use crate::models::Document;

#[derive(Clone)]
pub struct DocumentRegistry {
    pool: SqlitePool,
}

impl DocumentRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Commit an uploaded document.
    ///
    /// Validates the caller-supplied fields (defense against inconsistent
    /// callers), then creates the thread and the document atomically.
    /// Returns the fully formed [`Document`].
    pub async fn commit(
        &self,
        name: &str,
        storage_id: &str,
        size: i64,
        text: &str,
    ) -> Result<Document> {
        if name.trim().is_empty() {
            return Err(Error::Validation("document name must not be empty".into()));
        }
        if storage_id.is_empty() {
            return Err(Error::Validation("storage id must not be empty".into()));
        }
        if size <= 0 {
            return Err(Error::Validation(format!(
                "document size must be positive, got {}",
                size
            )));
        }

        let doc_id = uuid::Uuid::new_v4().to_string();
        let thread_id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Commit(e.to_string()))?;

        sqlx::query("INSERT INTO threads (id, created_at) VALUES (?, ?)")
            .bind(&thread_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Commit(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, name, storage_id, size, text, agent_thread_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc_id)
        .bind(name)
        .bind(storage_id)
        .bind(size)
        .bind(text)
        .bind(&thread_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Commit(e.to_string()))?;

        tx.commit().await.map_err(|e| Error::Commit(e.to_string()))?;

        info!(document = %doc_id, thread = %thread_id, size, "committed document");

        Ok(Document {
            id: doc_id,
            name: name.to_string(),
            storage_id: storage_id.to_string(),
            size,
            text: text.to_string(),
            agent_thread_id: thread_id,
            created_at: now,
        })
    }

    pub async fn get(&self, id: &str) -> Result<Document> {
        let row = sqlx::query(
            "SELECT id, name, storage_id, size, text, agent_thread_id, created_at
             FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_document)
            .ok_or_else(|| Error::NotFound(format!("document {}", id)))
    }

    /// Look a document up by its conversation thread. Used by the agent run
    /// to load the grounding text for a thread.
    pub async fn get_by_thread(&self, thread_id: &str) -> Result<Document> {
        let row = sqlx::query(
            "SELECT id, name, storage_id, size, text, agent_thread_id, created_at
             FROM documents WHERE agent_thread_id = ?",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_document)
            .ok_or_else(|| Error::NotFound(format!("document for thread {}", thread_id)))
    }

    /// All documents, newest first.
    pub async fn list(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT id, name, storage_id, size, text, agent_thread_id, created_at
             FROM documents ORDER BY created_at DESC, id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_document).collect())
    }
}

fn row_to_document(row: sqlx::sqlite::SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        name: row.get("name"),
        storage_id: row.get("storage_id"),
        size: row.get("size"),
        text: row.get("text"),
        agent_thread_id: row.get("agent_thread_id"),
        created_at: row.get("created_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;

    async fn test_registry() -> (tempfile::TempDir, DocumentRegistry) {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("docchat.sqlite"))
            .await
            .unwrap();
        migrate::apply_schema(&pool).await.unwrap();
        (tmp, DocumentRegistry::new(pool))
    }

    #[tokio::test]
    async fn commit_creates_document_with_thread() {
        let (_tmp, registry) = test_registry().await;
        let doc = registry
            .commit("spec.pdf", "blob-1", 1234, "Hello world")
            .await
            .unwrap();
        assert!(!doc.agent_thread_id.is_empty());

        let fetched = registry.get(&doc.id).await.unwrap();
        assert_eq!(fetched.agent_thread_id, doc.agent_thread_id);
        assert_eq!(fetched.size, 1234);
        assert_eq!(fetched.text, "Hello world");
    }

    #[tokio::test]
    async fn commit_rejects_bad_fields() {
        let (_tmp, registry) = test_registry().await;
        for result in [
            registry.commit("", "blob-1", 1, "t").await,
            registry.commit("a.pdf", "", 1, "t").await,
            registry.commit("a.pdf", "blob-1", 0, "t").await,
            registry.commit("a.pdf", "blob-1", -5, "t").await,
        ] {
            assert!(matches!(result.unwrap_err(), Error::Validation(_)));
        }
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let (_tmp, registry) = test_registry().await;
        let err = registry.get("missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn list_returns_all_documents() {
        let (_tmp, registry) = test_registry().await;
        let a = registry.commit("a.pdf", "blob-a", 1, "").await.unwrap();
        let b = registry.commit("b.pdf", "blob-b", 2, "").await.unwrap();
        let docs = registry.list().await.unwrap();
        assert_eq!(docs.len(), 2);
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert!(ids.contains(&a.id.as_str()) && ids.contains(&b.id.as_str()));
    }
}

//! SQLite-backed [`DocumentStore`].
//!
//! Documents are kept as JSON text in the `documents` table, one row per
//! document, tagged with their collection name. Queries load the bodies of
//! one collection in insertion order and evaluate the [`Query`] in process,
//! so predicate semantics are exactly those of the in-memory store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use ems_metrics_core::filter::Query;
use ems_metrics_core::models::Document;
use ems_metrics_core::store::DocumentStore;

#[derive(Clone)]
pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Delete every document of `collection`; returns the number removed.
    pub async fn clear_collection(&self, collection: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = ?")
            .bind(collection)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Swap the contents of `collection` for `docs` in one transaction.
    /// Returns `(removed, inserted)`; on failure the old documents remain.
    pub async fn replace_collection(&self, collection: &str, docs: &[Document]) -> Result<(u64, usize)> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM documents WHERE collection = ?")
            .bind(collection)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let inserted = insert_rows(&mut tx, collection, docs).await?;
        tx.commit().await?;
        Ok((removed, inserted))
    }

    /// Document counts per collection, sorted by name.
    pub async fn collection_counts(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT collection, COUNT(*) AS n FROM documents GROUP BY collection ORDER BY collection",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("collection"), r.get::<i64, _>("n")))
            .collect())
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Document>> {
        let rows = sqlx::query("SELECT id, body FROM documents WHERE collection = ? ORDER BY id")
            .bind(collection)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("querying collection {collection}"))?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.get("id");
            let body: String = row.get("body");
            let doc: Document = serde_json::from_str(&body)
                .with_context(|| format!("malformed document {id} in {collection}"))?;
            docs.push(doc);
        }
        Ok(query.apply(docs))
    }

    async fn collection_names(&self) -> Result<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT collection FROM documents ORDER BY collection",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn insert_many(&self, collection: &str, docs: &[Document]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let inserted = insert_rows(&mut tx, collection, docs).await?;
        tx.commit().await?;
        Ok(inserted)
    }
}

async fn insert_rows(
    tx: &mut Transaction<'_, Sqlite>,
    collection: &str,
    docs: &[Document],
) -> Result<usize> {
    let now = Utc::now().timestamp();
    for doc in docs {
        sqlx::query("INSERT INTO documents (collection, body, imported_at) VALUES (?, ?, ?)")
            .bind(collection)
            .bind(serde_json::to_string(doc)?)
            .bind(now)
            .execute(&mut **tx)
            .await?;
    }
    Ok(docs.len())
}

//! Storage abstraction over named document collections.
//!
//! The [`DocumentStore`] trait is the only contract the normalizers have
//! with the document database: "give me the documents of this collection
//! matching this query". Backends (SQLite, in-memory) plug in behind it.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::filter::Query;
use crate::models::Document;

/// Abstract document storage.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`find`](DocumentStore::find) | Documents of a collection matching a query |
/// | [`collection_names`](DocumentStore::collection_names) | Collections holding at least one document |
/// | [`insert_many`](DocumentStore::insert_many) | Append documents to a collection |
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Documents of `collection` matching `query`, sorted and truncated as
    /// the query asks. An unknown collection yields an empty result.
    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Document>>;

    /// Names of all non-empty collections, sorted.
    async fn collection_names(&self) -> Result<Vec<String>>;

    /// Append documents; returns the number inserted.
    async fn insert_many(&self, collection: &str, docs: &[Document]) -> Result<usize>;

    async fn has_collection(&self, collection: &str) -> Result<bool> {
        Ok(self
            .collection_names()
            .await?
            .iter()
            .any(|name| name == collection))
    }
}

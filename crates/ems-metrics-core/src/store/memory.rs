//! In-memory [`DocumentStore`] for tests and embedding.
//!
//! Collections are `Vec`s behind a `std::sync::RwLock`, kept in insertion
//! order. Queries are evaluated with [`Query::apply`].

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::filter::Query;
use crate::models::Document;

use super::DocumentStore;

/// In-memory document store.
#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from `(collection, documents)` pairs.
    pub fn with_collections<I, D>(collections: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, D)>,
        D: IntoIterator<Item = Document>,
    {
        let map = collections
            .into_iter()
            .map(|(name, docs)| (name.to_string(), docs.into_iter().collect()))
            .collect();
        Self {
            collections: RwLock::new(map),
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Document>> {
        let collections = self
            .collections
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        let docs = collections.get(collection).cloned().unwrap_or_default();
        Ok(query.apply(docs))
    }

    async fn collection_names(&self) -> Result<Vec<String>> {
        let collections = self
            .collections
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        let mut names: Vec<String> = collections
            .iter()
            .filter(|(_, docs)| !docs.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn insert_many(&self, collection: &str, docs: &[Document]) -> Result<usize> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        collections
            .entry(collection.to_string())
            .or_default()
            .extend(docs.iter().cloned());
        Ok(docs.len())
    }
}

//! Category registry: the [`Normalizer`] trait and the tag → normalizer map.
//!
//! The registry is built once at startup ([`CategoryRegistry::with_builtins`]
//! plus any app-provided normalizers such as the partner API) and shared
//! read-only behind an `Arc`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::CategoryError;
use crate::models::{Request, Table};
use crate::normalize;
use crate::store::DocumentStore;

/// Where a category's data comes from. Drives the cache TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Database,
    PartnerApi,
    PublicFeed,
}

/// Turns one category's raw documents into a fixed-schema [`Table`].
#[async_trait]
pub trait Normalizer: Send + Sync {
    /// Registry tag, e.g. `"GCS"` or `"hf"`.
    fn category(&self) -> &str;

    /// Output schema. Every returned table carries exactly these columns.
    fn columns(&self) -> &'static [&'static str];

    /// Backing collection (or feed name for non-database sources).
    fn collection(&self) -> &str;

    fn source_kind(&self) -> SourceKind {
        SourceKind::Database
    }

    /// Query and normalize. Failures are reported, not absorbed.
    async fn fetch(
        &self,
        store: &dyn DocumentStore,
        request: &Request,
    ) -> Result<Table, CategoryError>;

    /// [`fetch`](Normalizer::fetch), with an unavailable source replaced by
    /// a zero-row table of [`columns`](Normalizer::columns).
    async fn load(
        &self,
        store: &dyn DocumentStore,
        request: &Request,
    ) -> Result<Table, CategoryError> {
        match self.fetch(store, request).await {
            Err(CategoryError::SourceUnavailable { collection, reason }) => {
                tracing::warn!(
                    category = self.category(),
                    %collection,
                    %reason,
                    "source unavailable, returning empty table"
                );
                Ok(self.empty())
            }
            other => other,
        }
    }

    fn empty(&self) -> Table {
        Table::empty(self.category(), self.columns())
    }
}

/// Summary of one registered category.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryInfo {
    pub category: String,
    pub collection: String,
    pub source: SourceKind,
    pub columns: Vec<String>,
}

/// Immutable map from category tag to normalizer.
#[derive(Default)]
pub struct CategoryRegistry {
    normalizers: BTreeMap<String, Arc<dyn Normalizer>>,
}

impl CategoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every database-backed category.
    ///
    /// `district` is the `EO_LANDKREIS` value the `ETÜ` category is
    /// restricted to.
    pub fn with_builtins(district: &str) -> Self {
        let mut registry = Self::new();
        for normalizer in normalize::builtins(district) {
            registry.register(normalizer);
        }
        registry
    }

    /// Add a normalizer, replacing any previous one with the same tag.
    pub fn register(&mut self, normalizer: Arc<dyn Normalizer>) {
        let tag = normalizer.category().to_string();
        if self.normalizers.insert(tag.clone(), normalizer).is_some() {
            tracing::debug!(category = %tag, "replaced registered normalizer");
        }
    }

    pub fn find(&self, category: &str) -> Option<Arc<dyn Normalizer>> {
        self.normalizers.get(category).cloned()
    }

    pub fn contains(&self, category: &str) -> bool {
        self.normalizers.contains_key(category)
    }

    /// Registered tags, sorted.
    pub fn categories(&self) -> Vec<&str> {
        self.normalizers.keys().map(String::as_str).collect()
    }

    pub fn describe(&self) -> Vec<CategoryInfo> {
        self.normalizers
            .values()
            .map(|n| CategoryInfo {
                category: n.category().to_string(),
                collection: n.collection().to_string(),
                source: n.source_kind(),
                columns: n.columns().iter().map(|c| c.to_string()).collect(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.normalizers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.normalizers.is_empty()
    }
}

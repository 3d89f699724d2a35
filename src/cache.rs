//! Time-bounded result cache keyed by the full load request.
//!
//! Each key owns an async [`OnceCell`]; concurrent callers for the same key
//! await the single in-flight load instead of starting their own. The
//! outer map lock is only held to look up or replace an entry, never
//! across an `.await`.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

use ems_metrics_core::models::{ProtocolFilter, Request, Table};

/// Which protocols a cached result covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    All,
    Years { start: i32, end: i32 },
    /// SHA-256 of the sorted, deduplicated id list.
    Ids { count: usize, digest: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub category: String,
    pub limit: usize,
    pub med_name: Option<String>,
    pub scope: Scope,
}

impl CacheKey {
    pub fn new(category: &str, request: &Request) -> Self {
        let scope = match &request.filter {
            None => Scope::All,
            Some(ProtocolFilter::YearRange { start, end }) => Scope::Years {
                start: *start,
                end: *end,
            },
            Some(ProtocolFilter::ProtocolIds(ids)) => {
                let mut sorted: Vec<&str> = ids.iter().map(String::as_str).collect();
                sorted.sort_unstable();
                sorted.dedup();
                let mut hasher = Sha256::new();
                for id in &sorted {
                    hasher.update(id.as_bytes());
                    hasher.update([0u8]);
                }
                Scope::Ids {
                    count: sorted.len(),
                    digest: hex::encode(hasher.finalize()),
                }
            }
        };
        Self {
            category: category.to_string(),
            limit: request.limit,
            med_name: request.med_name.clone(),
            scope,
        }
    }
}

struct Entry {
    created: Instant,
    ttl: Duration,
    cell: Arc<OnceCell<Arc<Table>>>,
}

impl Entry {
    fn is_fresh(&self) -> bool {
        self.created.elapsed() < self.ttl
    }
}

#[derive(Default)]
pub struct ResultCache {
    entries: Mutex<HashMap<CacheKey, Entry>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached table for `key`, running `load` when it is absent or older
    /// than `ttl`. A failed load is not cached.
    pub async fn get_or_load<F, Fut, E>(
        &self,
        key: CacheKey,
        ttl: Duration,
        load: F,
    ) -> Result<Arc<Table>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Table, E>>,
    {
        let cell = {
            let mut entries = self.entries();
            match entries.get(&key) {
                Some(entry) if entry.is_fresh() => entry.cell.clone(),
                _ => {
                    let cell = Arc::new(OnceCell::new());
                    entries.insert(
                        key.clone(),
                        Entry {
                            created: Instant::now(),
                            ttl,
                            cell: cell.clone(),
                        },
                    );
                    // Expired entries are evicted on every miss; the new
                    // entry stays even with a zero TTL until its load ends.
                    entries.retain(|_, e| e.is_fresh() || Arc::ptr_eq(&e.cell, &cell));
                    cell
                }
            }
        };

        let table = cell
            .get_or_try_init(move || async move {
                tracing::debug!(category = %key.category, "cache miss");
                load().await.map(Arc::new)
            })
            .await?;
        Ok(table.clone())
    }

    /// Drop every entry; returns how many held a loaded table.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries();
        let n = entries.values().filter(|e| e.cell.initialized()).count();
        entries.clear();
        n
    }

    /// Entries holding a loaded table.
    pub fn len(&self) -> usize {
        self.entries()
            .values()
            .filter(|e| e.cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

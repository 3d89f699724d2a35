//! Application-level loading: the full category registry, the coordinator
//! over the SQLite document store, and the result cache in front of it.

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;

use ems_metrics_core::coordinator::Coordinator;
use ems_metrics_core::error::CoordinatorError;
use ems_metrics_core::models::{ProtocolFilter, Request, Table};
use ems_metrics_core::registry::{CategoryRegistry, SourceKind};
use ems_metrics_core::store::DocumentStore;
use ems_metrics_core::temporal::HolidayCalendar;

use crate::cache::{CacheKey, ResultCache};
use crate::config::{CacheConfig, Config};
use crate::holidays::HolidayFeed;
use crate::partner_api::{self, PartnerApiClient};
use crate::sqlite_store::SqliteDocumentStore;
use crate::{db, migrate};

/// Every category: database normalizers, partner API, holiday feed.
pub fn build_registry(config: &Config) -> Result<CategoryRegistry> {
    let mut registry = CategoryRegistry::with_builtins(&config.query.district);

    let client = Arc::new(PartnerApiClient::from_config(&config.partner_api)?);
    if !client.is_configured() {
        tracing::warn!("partner API URL or key missing; transport categories will be empty");
    }
    for normalizer in partner_api::normalizers(client) {
        registry.register(normalizer);
    }
    registry.register(Arc::new(HolidayFeed::from_config(&config.holidays)?));
    Ok(registry)
}

/// Optional request parameters as they arrive from the CLI or HTTP query.
#[derive(Debug, Default, Clone)]
pub struct LoadParams {
    pub limit: Option<usize>,
    pub med_name: Option<String>,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
}

pub struct Loader {
    coordinator: Coordinator,
    cache: ResultCache,
    cache_config: CacheConfig,
    default_limit: usize,
}

impl Loader {
    pub fn new(coordinator: Coordinator, cache_config: CacheConfig, default_limit: usize) -> Self {
        Self {
            coordinator,
            cache: ResultCache::new(),
            cache_config,
            default_limit,
        }
    }

    /// Open (and migrate) the configured database and wire the registry.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::new(pool));
        let registry = Arc::new(build_registry(config)?);
        tracing::info!(categories = registry.len(), "category registry ready");
        Ok(Self::new(
            Coordinator::new(store, registry),
            config.cache.clone(),
            config.query.default_limit,
        ))
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn registry(&self) -> &CategoryRegistry {
        self.coordinator.registry()
    }

    /// Turn optional parameters into a [`Request`].
    ///
    /// A single year bound means that one year. `start_year > end_year`
    /// and a zero limit are rejected.
    pub fn request(&self, params: &LoadParams) -> Result<Request> {
        let limit = params.limit.unwrap_or(self.default_limit);
        if limit == 0 {
            bail!("limit must be > 0");
        }
        let filter = match (params.start_year, params.end_year) {
            (None, None) => None,
            (Some(start), None) => Some((start, start)),
            (None, Some(end)) => Some((end, end)),
            (Some(start), Some(end)) => Some((start, end)),
        };
        if let Some((start, end)) = filter {
            if start > end {
                bail!("start_year {start} is after end_year {end}");
            }
        }
        Ok(Request {
            limit,
            filter: filter.map(|(start, end)| ProtocolFilter::YearRange { start, end }),
            med_name: params
                .med_name
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string),
        })
    }

    fn ttl(&self, kind: SourceKind) -> Duration {
        match kind {
            SourceKind::Database => self.cache_config.database_ttl(),
            SourceKind::PartnerApi | SourceKind::PublicFeed => self.cache_config.api_ttl(),
        }
    }

    /// Load a category through the cache. Unknown categories fail before
    /// touching the cache.
    pub async fn load(&self, category: &str, request: &Request) -> Result<Arc<Table>, CoordinatorError> {
        let normalizer = self
            .registry()
            .find(category)
            .ok_or_else(|| CoordinatorError::UnknownCategory(category.to_string()))?;
        let ttl = self.ttl(normalizer.source_kind());
        self.cache
            .get_or_load(CacheKey::new(category, request), ttl, || {
                self.coordinator.load(category, request)
            })
            .await
    }

    /// Holiday calendar from the `Feiertage` category.
    pub async fn holidays(&self) -> HolidayCalendar {
        match self.load("Feiertage", &Request::with_limit(1_000)).await {
            Ok(table) => HolidayCalendar::from_table(&table),
            Err(e) => {
                tracing::warn!(error = %e, "holiday calendar unavailable");
                HolidayCalendar::default()
            }
        }
    }

    pub fn clear_cache(&self) -> usize {
        let n = self.cache.clear();
        tracing::info!(entries = n, "cache cleared");
        n
    }
}

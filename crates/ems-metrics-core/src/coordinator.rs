//! Filter/join coordinator.
//!
//! Resolves year ranges into protocol-id sets through the index, restricts
//! any category to such a set, and dispatches through the injected
//! [`CategoryRegistry`].

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::CoordinatorError;
use crate::models::{ProtocolFilter, Request, Table};
use crate::normalize::index::IndexNormalizer;
use crate::registry::{CategoryRegistry, Normalizer};
use crate::store::DocumentStore;

/// Categories whose query accepts a protocol-id predicate directly.
const ID_QUERY_CATEGORIES: &[&str] = &["Index", "Details"];

#[derive(Clone)]
pub struct Coordinator {
    store: Arc<dyn DocumentStore>,
    registry: Arc<CategoryRegistry>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn DocumentStore>, registry: Arc<CategoryRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &CategoryRegistry {
        &self.registry
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    fn normalizer(&self, category: &str) -> Result<Arc<dyn Normalizer>, CoordinatorError> {
        self.registry
            .find(category)
            .ok_or_else(|| CoordinatorError::UnknownCategory(category.to_string()))
    }

    /// Index rows with `missionDate` in the given years, plus their unique
    /// protocol ids in first-seen order.
    pub async fn resolve_time_range(
        &self,
        start_year: i32,
        end_year: i32,
        limit: usize,
    ) -> Result<(Table, Vec<String>), CoordinatorError> {
        let request = Request {
            limit,
            filter: Some(ProtocolFilter::YearRange {
                start: start_year,
                end: end_year,
            }),
            med_name: None,
        };
        let index = IndexNormalizer.load(self.store(), &request).await?;
        let ids = index.protocol_ids();
        tracing::debug!(start_year, end_year, missions = ids.len(), "resolved year range");
        Ok((index, ids))
    }

    /// Rows of `category` belonging to the given protocols.
    ///
    /// `Index` and `Details` receive the ids as a query predicate. Every
    /// other category is fetched in full and filtered afterwards; tables
    /// without a `protocolId` column come back unfiltered.
    pub async fn get_for_identifiers(
        &self,
        category: &str,
        ids: &[String],
        limit: usize,
        med_name: Option<&str>,
    ) -> Result<Table, CoordinatorError> {
        let normalizer = self.normalizer(category)?;
        let pushdown = ID_QUERY_CATEGORIES.contains(&category);
        let request = Request {
            limit,
            filter: pushdown.then(|| ProtocolFilter::ProtocolIds(ids.to_vec())),
            med_name: med_name.map(str::to_string),
        };
        let mut table = normalizer.load(self.store(), &request).await?;
        if !pushdown {
            let wanted: HashSet<String> = ids.iter().cloned().collect();
            table.retain_protocols(&wanted);
        }
        Ok(table)
    }

    /// Load a category for an arbitrary request.
    ///
    /// A year range is first resolved to protocol ids; a range matching no
    /// mission yields a zero-row table of the category's columns.
    pub async fn load(&self, category: &str, request: &Request) -> Result<Table, CoordinatorError> {
        let normalizer = self.normalizer(category)?;
        match &request.filter {
            None => Ok(normalizer.load(self.store(), request).await?),
            Some(ProtocolFilter::ProtocolIds(ids)) => {
                self.get_for_identifiers(category, ids, request.limit, request.med_name.as_deref())
                    .await
            }
            Some(ProtocolFilter::YearRange { start, end }) => {
                let (_, ids) = self.resolve_time_range(*start, *end, request.limit).await?;
                if ids.is_empty() {
                    return Ok(normalizer.empty());
                }
                self.get_for_identifiers(category, &ids, request.limit, request.med_name.as_deref())
                    .await
            }
        }
    }

    /// Positive resuscitations joined with their target destination.
    pub async fn reanimation_with_destination(&self, limit: usize) -> Result<Table, CoordinatorError> {
        self.load("Reanimation_mit_targetDestination", &Request::with_limit(limit))
            .await
    }
}

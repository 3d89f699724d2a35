//! Per-category normalizers.
//!
//! Every normalizer follows the same shape: build a category query,
//! fetch from its collection with the row limit applied, explode nested
//! `data` arrays, keep only the sub-records carrying the category's tag,
//! and project into a typed row struct.
//!
//! | Module | Collections |
//! |--------|-------------|
//! | [`index`] | `nida_index`, `protocols_details`, `protocols_freetexts`, `etu_leitstelle`, `rtm_vorhaltung` |
//! | [`findings`] | `protocols_findings` |
//! | [`measures`] | `protocols_measures` |
//! | [`results`] | `protocols_results` |
//! | [`vitals`] | `vitals_<code>` |

pub mod findings;
pub mod index;
pub mod measures;
pub mod results;
pub mod vitals;

use std::sync::Arc;

use crate::error::CategoryError;
use crate::filter::Query;
use crate::models::Document;
use crate::registry::Normalizer;
use crate::store::DocumentStore;

pub const INDEX_COLLECTION: &str = "nida_index";
pub const DETAILS_COLLECTION: &str = "protocols_details";
pub const FREETEXT_COLLECTION: &str = "protocols_freetexts";
pub const FINDINGS_COLLECTION: &str = "protocols_findings";
pub const MEASURES_COLLECTION: &str = "protocols_measures";
pub const RESULTS_COLLECTION: &str = "protocols_results";
pub const ETU_COLLECTION: &str = "etu_leitstelle";
pub const RTM_COLLECTION: &str = "rtm_vorhaltung";

/// Default district for the `ETÜ` category.
pub const DEFAULT_DISTRICT: &str = "Schleswig-Flensburg";

/// Run a query, mapping store failures to [`CategoryError::SourceUnavailable`].
pub(crate) async fn find_docs(
    store: &dyn DocumentStore,
    collection: &str,
    query: &Query,
) -> Result<Vec<Document>, CategoryError> {
    store
        .find(collection, query)
        .await
        .map_err(|e| CategoryError::unavailable(collection, format!("{e:#}")))
}

/// Fail with `SourceUnavailable` when `collection` does not exist.
pub(crate) async fn require_collection(
    store: &dyn DocumentStore,
    collection: &str,
) -> Result<(), CategoryError> {
    let exists = store
        .has_collection(collection)
        .await
        .map_err(|e| CategoryError::unavailable(collection, format!("{e:#}")))?;
    if exists {
        Ok(())
    } else {
        Err(CategoryError::unavailable(collection, "collection does not exist"))
    }
}

/// Every database-backed normalizer.
pub fn builtins(district: &str) -> Vec<Arc<dyn Normalizer>> {
    let mut all: Vec<Arc<dyn Normalizer>> = vec![
        Arc::new(index::IndexNormalizer),
        Arc::new(index::DetailsNormalizer),
        Arc::new(index::FreetextNormalizer),
        Arc::new(index::EtuNormalizer::new(district)),
        Arc::new(index::RtmVorhaltungNormalizer),
        Arc::new(findings::FindingMetric::new("GCS")),
        Arc::new(findings::FindingMetric::new("Schmerzen")),
        Arc::new(findings::NeurologicalSigns),
        Arc::new(findings::PupilStatus),
        Arc::new(measures::Medications),
        Arc::new(measures::Intubation),
        Arc::new(measures::TwelveLeadEcg),
        Arc::new(measures::Evm),
        Arc::new(results::Naca),
        Arc::new(results::SymptomOnset),
        Arc::new(results::Reanimation),
        Arc::new(results::ReanimationWithDestination),
    ];
    for code in vitals::VITAL_CODES {
        all.push(Arc::new(vitals::Vital::new(code)));
    }
    all
}

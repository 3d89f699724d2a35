//! Partner transport-booking REST API.
//!
//! Two categories are served from it: `Transports` and
//! `TransportStatusHistory`. Both endpoints are paginated DRF-style
//! (`{"results": [...], "next": <url | null>}`); a bare array or a single
//! object is accepted as well.
//!
//! Requests carry `Authorization: Api-Key <key>`. Missing credentials,
//! HTTP failures, timeouts, and undecodable bodies all surface as
//! [`CategoryError::SourceUnavailable`], which the registry's `load` turns
//! into a zero-row table with the documented columns.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ems_metrics_core::error::CategoryError;
use ems_metrics_core::models::{Document, Request, Table};
use ems_metrics_core::registry::{Normalizer, SourceKind};
use ems_metrics_core::store::DocumentStore;

use crate::config::PartnerApiConfig;

/// Upper bound on followed `next` links.
const MAX_PAGES: usize = 10_000;

pub const TRANSPORT_COLUMNS: &[&str] = &[
    "id",
    "krankenbeforderungsfahrt_kategorie",
    "doctor_name",
    "patient_name",
    "patient_weight",
    "patient_birth_date",
    "infectious_disease",
    "companion",
    "ktw_equipment",
    "medical_care",
    "pickup_station",
    "pickup_address",
    "pickup_housenumber",
    "pickup_postal_code",
    "pickup_city",
    "pickup_email",
    "pickup_phone",
    "contact_person_pickup",
    "pickup_datetime",
    "destination_station",
    "destination_address",
    "destination_housenumber",
    "destination_postal_code",
    "destination_city",
    "contact_person_destination",
    "destination_datetime",
    "created_at",
    "remark",
    "remark_transport",
    "status",
    "created_by_id",
    "destination_institute_id",
    "patient_insurance_company_id",
    "pickup_institute_id",
    "transport_type_id",
    "agreed_transport_datetime",
    "zustaendigkeit_id",
];

pub const STATUS_HISTORY_COLUMNS: &[&str] = &[
    "id",
    "old_status",
    "new_status",
    "changed_at",
    "changed_by_username",
    "transport_id",
];

pub struct PartnerApiClient {
    http: reqwest::Client,
    base_url: Option<String>,
    api_key: Option<String>,
}

impl PartnerApiClient {
    pub fn new(base_url: Option<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.map(|u| {
            if u.ends_with('/') {
                u
            } else {
                format!("{u}/")
            }
        });
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    pub fn from_config(config: &PartnerApiConfig) -> Result<Self> {
        Self::new(
            config.resolved_url(),
            config.api_key(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some() && self.api_key.is_some()
    }

    async fn get_json(&self, url: &str, api_key: &str) -> Result<Value> {
        let response = self
            .http
            .get(url)
            .header("Authorization", format!("Api-Key {api_key}"))
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("partner API error {status}: {body}");
        }
        response
            .json()
            .await
            .with_context(|| format!("decoding response of {url}"))
    }

    /// All records of `endpoint`, following pagination.
    pub async fn fetch_all(&self, endpoint: &str) -> Result<Vec<Document>> {
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| anyhow!("partner API URL is not configured"))?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("partner API key is not configured"))?;

        let first = format!("{base}{endpoint}");
        let mut url = first.clone();
        let mut seen = HashSet::from([first]);
        let mut records = Vec::new();

        for _ in 0..MAX_PAGES {
            match self.get_json(&url, api_key).await? {
                Value::Object(mut page) if page.contains_key("results") => {
                    match page.remove("results") {
                        Some(Value::Array(items)) => records.extend(items),
                        Some(Value::Null) | None => {}
                        Some(other) => bail!("unexpected results payload: {other}"),
                    }
                    // The next link's query string is replayed against the
                    // configured base so proxies rewriting hosts don't matter.
                    let Some(next) = page.get("next").and_then(Value::as_str) else {
                        return Ok(records);
                    };
                    let Some((_, query)) = next.split_once('?') else {
                        return Ok(records);
                    };
                    url = format!("{base}{endpoint}?{query}");
                    if !seen.insert(url.clone()) {
                        bail!("pagination loop at {url}");
                    }
                    tracing::debug!(endpoint, %url, fetched = records.len(), "following next page");
                }
                Value::Array(items) => return Ok(items),
                Value::Null => return Ok(records),
                single => {
                    records.push(single);
                    return Ok(records);
                }
            }
        }
        bail!("more than {MAX_PAGES} pages at {endpoint}")
    }
}

/// One partner-API category.
pub struct PartnerCategory {
    category: &'static str,
    endpoint: &'static str,
    columns: &'static [&'static str],
    client: Arc<PartnerApiClient>,
}

impl PartnerCategory {
    pub fn transports(client: Arc<PartnerApiClient>) -> Self {
        Self {
            category: "Transports",
            endpoint: "transports/",
            columns: TRANSPORT_COLUMNS,
            client,
        }
    }

    pub fn status_history(client: Arc<PartnerApiClient>) -> Self {
        Self {
            category: "TransportStatusHistory",
            endpoint: "transport-status-history/",
            columns: STATUS_HISTORY_COLUMNS,
            client,
        }
    }
}

/// Both partner-API categories sharing one client.
pub fn normalizers(client: Arc<PartnerApiClient>) -> Vec<Arc<dyn Normalizer>> {
    vec![
        Arc::new(PartnerCategory::transports(client.clone())),
        Arc::new(PartnerCategory::status_history(client)),
    ]
}

#[async_trait]
impl Normalizer for PartnerCategory {
    fn category(&self) -> &str {
        self.category
    }

    fn columns(&self) -> &'static [&'static str] {
        self.columns
    }

    fn collection(&self) -> &str {
        self.endpoint
    }

    fn source_kind(&self) -> SourceKind {
        SourceKind::PartnerApi
    }

    async fn fetch(
        &self,
        _store: &dyn DocumentStore,
        request: &Request,
    ) -> Result<Table, CategoryError> {
        let mut docs = self
            .client
            .fetch_all(self.endpoint)
            .await
            .map_err(|e| CategoryError::unavailable(self.endpoint, format!("{e:#}")))?;
        docs.truncate(request.limit);
        tracing::info!(category = self.category, records = docs.len(), "fetched from partner API");
        Ok(Table::from_documents(self.category, self.columns, docs))
    }
}

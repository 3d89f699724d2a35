//! Treatment measures from `protocols_measures`.
//!
//! Measure sub-records use positional slots: `value_1` is the measure
//! group, `value_2` the measure, and later slots carry details whose
//! meaning depends on the group.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::{find_docs, MEASURES_COLLECTION};
use crate::error::CategoryError;
use crate::filter::{Filter, Query};
use crate::flatten::{explode, to_number, SubRecord};
use crate::models::{Record, Request, Table};
use crate::registry::Normalizer;
use crate::store::DocumentStore;

async fn measures_matching(
    store: &dyn DocumentStore,
    elem: Filter,
    limit: usize,
) -> Result<Vec<SubRecord>, CategoryError> {
    let query = Query::new(Filter::elem_match("data", elem)).limit(limit);
    let docs = find_docs(store, MEASURES_COLLECTION, &query).await?;
    Ok(explode(docs, "data"))
}

// ═══════════════════════════════════════════════════════════════════════
// Medications
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct MedicationRow {
    #[serde(rename = "protocolId")]
    pub protocol_id: Value,
    pub metric: &'static str,
    pub med_name: Value,
    pub route: Value,
    pub dose: Value,
    pub dose_unit: Value,
    pub substance: Value,
    pub timestamp: Value,
    pub source: Value,
    pub collection: &'static str,
}

impl Record for MedicationRow {
    const COLUMNS: &'static [&'static str] = &[
        "protocolId",
        "metric",
        "med_name",
        "route",
        "dose",
        "dose_unit",
        "substance",
        "timestamp",
        "source",
        "collection",
    ];
}

/// Administered medications, optionally restricted to a name.
///
/// A name filter matches trade name (`value_2`) or substance (`value_6`)
/// case-insensitively, both in the query and again on the exploded rows.
pub struct Medications;

fn mentions(sub: &SubRecord, key: &str, needle_lower: &str) -> bool {
    sub.text(key)
        .is_some_and(|v| v.to_lowercase().contains(needle_lower))
}

#[async_trait]
impl Normalizer for Medications {
    fn category(&self) -> &str {
        "Medikamente"
    }

    fn columns(&self) -> &'static [&'static str] {
        MedicationRow::COLUMNS
    }

    fn collection(&self) -> &str {
        MEASURES_COLLECTION
    }

    async fn fetch(
        &self,
        store: &dyn DocumentStore,
        request: &Request,
    ) -> Result<Table, CategoryError> {
        let med_name = request.med_name.as_deref().filter(|m| !m.is_empty());

        let mut elem = Filter::eq("value_1", "Medikamente");
        if let Some(name) = med_name {
            let by_name = |path: &str| {
                Filter::contains_ci(path, name)
                    .map_err(|e| CategoryError::unavailable(MEASURES_COLLECTION, e))
            };
            elem = elem.and(Filter::Or(vec![by_name("value_2")?, by_name("value_6")?]));
        }

        let needle = med_name.map(str::to_lowercase);
        let rows = measures_matching(store, elem, request.limit)
            .await?
            .into_iter()
            .filter(|sub| sub.is("value_1", "Medikamente"))
            .filter(|sub| match &needle {
                Some(n) => mentions(sub, "value_2", n) || mentions(sub, "value_6", n),
                None => true,
            })
            .map(|sub| MedicationRow {
                protocol_id: sub.protocol_id(),
                metric: "Medikamente",
                med_name: sub.value("value_2"),
                route: sub.value("value_3"),
                dose: to_number(sub.get("value_4")),
                dose_unit: sub.value("value_5"),
                substance: sub.value("value_6"),
                timestamp: sub.own_value("timeStamp"),
                source: sub.own_value("source"),
                collection: MEASURES_COLLECTION,
            })
            .collect();
        Ok(Table::from_records(self.category(), rows))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Intubation
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct IntubationRow {
    #[serde(rename = "protocolId")]
    pub protocol_id: Value,
    pub metric: &'static str,
    #[serde(rename = "type")]
    pub kind: Value,
    pub size: Value,
    /// Who intubated: own crew or prior to arrival.
    pub applicant: Value,
    pub timestamp: Value,
    pub source: Value,
    pub collection: &'static str,
}

impl Record for IntubationRow {
    const COLUMNS: &'static [&'static str] = &[
        "protocolId",
        "metric",
        "type",
        "size",
        "applicant",
        "timestamp",
        "source",
        "collection",
    ];
}

pub struct Intubation;

#[async_trait]
impl Normalizer for Intubation {
    fn category(&self) -> &str {
        "Intubation"
    }

    fn columns(&self) -> &'static [&'static str] {
        IntubationRow::COLUMNS
    }

    fn collection(&self) -> &str {
        MEASURES_COLLECTION
    }

    async fn fetch(
        &self,
        store: &dyn DocumentStore,
        request: &Request,
    ) -> Result<Table, CategoryError> {
        let rows = measures_matching(store, Filter::eq("value_1", "Atemweg"), request.limit)
            .await?
            .into_iter()
            .filter(|sub| {
                sub.is("value_1", "Atemweg")
                    && sub.is("value_2", "Intubation")
                    && sub.get("value_3").is_some()
            })
            .map(|sub| IntubationRow {
                protocol_id: sub.protocol_id(),
                metric: "Intubation",
                kind: sub.value("value_3"),
                size: sub.value("value_4"),
                applicant: sub.value("value_8"),
                timestamp: sub.own_value("timeStamp"),
                source: sub.own_value("source"),
                collection: MEASURES_COLLECTION,
            })
            .collect();
        Ok(Table::from_records(self.category(), rows))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// 12-lead ECG
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct EcgRow {
    #[serde(rename = "protocolId")]
    pub protocol_id: Value,
    pub metric: &'static str,
    pub performed: bool,
    pub result: Value,
    pub timestamp: Value,
    pub source: Value,
    pub collection: &'static str,
}

impl Record for EcgRow {
    const COLUMNS: &'static [&'static str] = &[
        "protocolId",
        "metric",
        "performed",
        "result",
        "timestamp",
        "source",
        "collection",
    ];
}

/// Recorded 12-lead ECGs. A recorded ECG counts as performed.
pub struct TwelveLeadEcg;

#[async_trait]
impl Normalizer for TwelveLeadEcg {
    fn category(&self) -> &str {
        "12-Kanal-EKG"
    }

    fn columns(&self) -> &'static [&'static str] {
        EcgRow::COLUMNS
    }

    fn collection(&self) -> &str {
        MEASURES_COLLECTION
    }

    async fn fetch(
        &self,
        store: &dyn DocumentStore,
        request: &Request,
    ) -> Result<Table, CategoryError> {
        let elem = Filter::eq("value_1", "Monitoring").and(Filter::eq("value_2", "12-Kanal-EKG"));
        let rows = measures_matching(store, elem, request.limit)
            .await?
            .into_iter()
            .filter(|sub| sub.is("value_1", "Monitoring") && sub.is("value_2", "12-Kanal-EKG"))
            .map(|sub| EcgRow {
                protocol_id: sub.protocol_id(),
                metric: "12-Kanal-EKG",
                performed: true,
                result: sub.value("value_3"),
                timestamp: sub.own_value("timeStamp"),
                source: sub.own_value("source"),
                collection: MEASURES_COLLECTION,
            })
            .collect();
        Ok(Table::from_records(self.category(), rows))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// EVM (extended care measures)
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct EvmRow {
    #[serde(rename = "protocolId")]
    pub protocol_id: Value,
    pub metric: &'static str,
    #[serde(rename = "type")]
    pub kind: Value,
    pub description: Value,
    pub applicant: Value,
    pub timestamp: Value,
    pub source: Value,
    pub collection: &'static str,
}

impl Record for EvmRow {
    const COLUMNS: &'static [&'static str] = &[
        "protocolId",
        "metric",
        "type",
        "description",
        "applicant",
        "timestamp",
        "source",
        "collection",
    ];
}

pub struct Evm;

#[async_trait]
impl Normalizer for Evm {
    fn category(&self) -> &str {
        "EVM"
    }

    fn columns(&self) -> &'static [&'static str] {
        EvmRow::COLUMNS
    }

    fn collection(&self) -> &str {
        MEASURES_COLLECTION
    }

    async fn fetch(
        &self,
        store: &dyn DocumentStore,
        request: &Request,
    ) -> Result<Table, CategoryError> {
        let rows = measures_matching(store, Filter::eq("value_11", "EVM"), request.limit)
            .await?
            .into_iter()
            .filter(|sub| sub.is("value_11", "EVM"))
            .map(|sub| EvmRow {
                protocol_id: sub.protocol_id(),
                metric: "EVM",
                kind: sub.value("value_1"),
                description: sub.value("value_2"),
                applicant: sub.value("value_10"),
                timestamp: sub.own_value("timeStamp"),
                source: sub.own_value("source"),
                collection: MEASURES_COLLECTION,
            })
            .collect();
        Ok(Table::from_records(self.category(), rows))
    }
}

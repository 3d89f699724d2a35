//! Structured findings from `protocols_findings`: scores (GCS, pain),
//! neurological signs, and pupil reaction.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::{find_docs, FINDINGS_COLLECTION};
use crate::error::CategoryError;
use crate::filter::{Filter, Query};
use crate::flatten::{explode, to_number, SubRecord};
use crate::models::{id_string, Record, Request, Table};
use crate::registry::Normalizer;
use crate::store::DocumentStore;

/// Sub-records of `protocols_findings` whose `description` is one of `tags`.
async fn findings_with(
    store: &dyn DocumentStore,
    tags: &[&str],
    limit: usize,
) -> Result<Vec<SubRecord>, CategoryError> {
    let query = Query::new(Filter::elem_match(
        "data",
        Filter::is_in("description", tags.iter().copied()),
    ))
    .limit(limit);
    let docs = find_docs(store, FINDINGS_COLLECTION, &query).await?;
    Ok(explode(docs, "data")
        .into_iter()
        .filter(|sub| tags.iter().any(|tag| sub.is("description", tag)))
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct FindingMetricRow {
    #[serde(rename = "protocolId")]
    pub protocol_id: Value,
    pub metric: String,
    pub value_num: Value,
    #[serde(rename = "type")]
    pub kind: Value,
    pub timestamp: Value,
    pub source: Value,
    pub collection: &'static str,
}

impl Record for FindingMetricRow {
    const COLUMNS: &'static [&'static str] = &[
        "protocolId",
        "metric",
        "value_num",
        "type",
        "timestamp",
        "source",
        "collection",
    ];
}

/// A numeric score recorded as a finding (`GCS`, `Schmerzen`).
pub struct FindingMetric {
    metric: String,
}

impl FindingMetric {
    pub fn new(metric: &str) -> Self {
        Self {
            metric: metric.to_string(),
        }
    }
}

#[async_trait]
impl Normalizer for FindingMetric {
    fn category(&self) -> &str {
        &self.metric
    }

    fn columns(&self) -> &'static [&'static str] {
        FindingMetricRow::COLUMNS
    }

    fn collection(&self) -> &str {
        FINDINGS_COLLECTION
    }

    async fn fetch(
        &self,
        store: &dyn DocumentStore,
        request: &Request,
    ) -> Result<Table, CategoryError> {
        let rows = findings_with(store, &[self.metric.as_str()], request.limit)
            .await?
            .into_iter()
            .map(|sub| FindingMetricRow {
                protocol_id: sub.protocol_id(),
                metric: self.metric.clone(),
                value_num: to_number(sub.get("valueInteger")),
                kind: sub.value("type"),
                timestamp: sub.own_value("timeStamp"),
                source: sub.own_value("source"),
                collection: FINDINGS_COLLECTION,
            })
            .collect();
        Ok(Table::from_records(self.category(), rows))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Neurological signs
// ═══════════════════════════════════════════════════════════════════════

/// Both spellings occur in the source data.
const NEURO_TAGS: &[&str] = &["Auffäligkeiten", "Auffälligkeiten"];

#[derive(Debug, Clone, Serialize)]
pub struct NeurologicalSignRow {
    #[serde(rename = "protocolId")]
    pub protocol_id: Value,
    pub metric: &'static str,
    pub finding: Option<String>,
    pub lateralization: Option<bool>,
    pub speech_disorder: Option<bool>,
    pub timestamp: Value,
    pub source: Value,
    pub collection: &'static str,
}

impl Record for NeurologicalSignRow {
    const COLUMNS: &'static [&'static str] = &[
        "protocolId",
        "metric",
        "finding",
        "lateralization",
        "speech_disorder",
        "timestamp",
        "source",
        "collection",
    ];
}

/// Lateralization signs and speech disorders.
pub struct NeurologicalSigns;

#[async_trait]
impl Normalizer for NeurologicalSigns {
    fn category(&self) -> &str {
        "Neurologische_Auffälligkeiten"
    }

    fn columns(&self) -> &'static [&'static str] {
        NeurologicalSignRow::COLUMNS
    }

    fn collection(&self) -> &str {
        FINDINGS_COLLECTION
    }

    async fn fetch(
        &self,
        store: &dyn DocumentStore,
        request: &Request,
    ) -> Result<Table, CategoryError> {
        let rows = findings_with(store, NEURO_TAGS, request.limit)
            .await?
            .into_iter()
            .map(|sub| {
                let finding = sub.text("valueString");
                let lower = finding.as_deref().map(str::to_lowercase);
                NeurologicalSignRow {
                    protocol_id: sub.protocol_id(),
                    metric: "Neurologische_Auffälligkeiten",
                    lateralization: lower.as_deref().map(|f| f.contains("seitenzeichen")),
                    speech_disorder: lower.as_deref().map(|f| f.contains("sprachstörung")),
                    finding,
                    timestamp: sub.own_value("timeStamp"),
                    source: sub.own_value("source"),
                    collection: FINDINGS_COLLECTION,
                }
            })
            .collect();
        Ok(Table::from_records(self.category(), rows))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Pupil status
// ═══════════════════════════════════════════════════════════════════════

const LEFT_TAG: &str = "Lichtreaktion links";
const RIGHT_TAG: &str = "Lichtreaktion rechts";

#[derive(Debug, Clone, Serialize)]
pub struct PupilStatusRow {
    #[serde(rename = "protocolId")]
    pub protocol_id: Value,
    pub metric: &'static str,
    pub left_reaction: Value,
    pub right_reaction: Value,
    pub timestamp: Value,
    pub source: Value,
    pub collection: &'static str,
}

impl Record for PupilStatusRow {
    const COLUMNS: &'static [&'static str] = &[
        "protocolId",
        "metric",
        "left_reaction",
        "right_reaction",
        "timestamp",
        "source",
        "collection",
    ];
}

/// First sub-record per protocol, in first-seen order.
fn first_per_protocol(subs: Vec<SubRecord>) -> Vec<(String, Value, SubRecord)> {
    let mut seen = std::collections::HashSet::new();
    subs.into_iter()
        .filter_map(|sub| {
            let raw = sub.protocol_id();
            let id = id_string(&raw)?;
            seen.insert(id.clone()).then_some((id, raw, sub))
        })
        .collect()
}

/// Left and right light reaction, outer-combined per protocol.
///
/// Each side is queried on its own and reduced to its first row per
/// protocol. Protocols appear in order: left-side ids first, then ids seen
/// only on the right. `timestamp` and `source` come from the left side.
pub struct PupilStatus;

#[async_trait]
impl Normalizer for PupilStatus {
    fn category(&self) -> &str {
        "Pupillenstatus"
    }

    fn columns(&self) -> &'static [&'static str] {
        PupilStatusRow::COLUMNS
    }

    fn collection(&self) -> &str {
        FINDINGS_COLLECTION
    }

    async fn fetch(
        &self,
        store: &dyn DocumentStore,
        request: &Request,
    ) -> Result<Table, CategoryError> {
        let left = first_per_protocol(findings_with(store, &[LEFT_TAG], request.limit).await?);
        let right = first_per_protocol(findings_with(store, &[RIGHT_TAG], request.limit).await?);

        let mut right_by_id: HashMap<String, (Value, SubRecord)> = HashMap::new();
        let mut right_order = Vec::new();
        for (id, raw, sub) in right {
            right_order.push(id.clone());
            right_by_id.insert(id, (raw, sub));
        }

        let mut rows = Vec::with_capacity(left.len() + right_by_id.len());
        for (id, raw, sub) in left {
            let right_reaction = right_by_id
                .remove(&id)
                .map(|(_, r)| r.value("valueString"))
                .unwrap_or(Value::Null);
            rows.push(PupilStatusRow {
                protocol_id: raw,
                metric: "Pupillenstatus",
                left_reaction: sub.value("valueString"),
                right_reaction,
                timestamp: sub.own_value("timeStamp"),
                source: sub.own_value("source"),
                collection: FINDINGS_COLLECTION,
            });
        }
        for id in right_order {
            if let Some((raw, sub)) = right_by_id.remove(&id) {
                rows.push(PupilStatusRow {
                    protocol_id: raw,
                    metric: "Pupillenstatus",
                    left_reaction: Value::Null,
                    right_reaction: sub.value("valueString"),
                    timestamp: Value::Null,
                    source: Value::Null,
                    collection: FINDINGS_COLLECTION,
                });
            }
        }
        Ok(Table::from_records(self.category(), rows))
    }
}

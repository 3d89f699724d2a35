//! Mission outcomes from `protocols_results`: NACA score, symptom onset,
//! and resuscitation.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::index::IndexNormalizer;
use super::{find_docs, RESULTS_COLLECTION};
use crate::error::CategoryError;
use crate::filter::{compare_values, Filter, Query};
use crate::flatten::{explode, SubRecord};
use crate::models::{id_string, Record, Request, Row, Table};
use crate::registry::Normalizer;
use crate::store::DocumentStore;

async fn results_matching(
    store: &dyn DocumentStore,
    elem: Filter,
    limit: usize,
) -> Result<Vec<SubRecord>, CategoryError> {
    let query = Query::new(Filter::elem_match("data", elem)).limit(limit);
    let docs = find_docs(store, RESULTS_COLLECTION, &query).await?;
    Ok(explode(docs, "data"))
}

// ═══════════════════════════════════════════════════════════════════════
// NACA
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct NacaRow {
    #[serde(rename = "protocolId")]
    pub protocol_id: Value,
    pub metric: &'static str,
    #[serde(rename = "NACA-Score")]
    pub naca_score: Value,
    pub timestamp: Value,
    pub source: Value,
    pub collection: &'static str,
}

impl Record for NacaRow {
    const COLUMNS: &'static [&'static str] = &[
        "protocolId",
        "metric",
        "NACA-Score",
        "timestamp",
        "source",
        "collection",
    ];
}

pub struct Naca;

#[async_trait]
impl Normalizer for Naca {
    fn category(&self) -> &str {
        "NACA"
    }

    fn columns(&self) -> &'static [&'static str] {
        NacaRow::COLUMNS
    }

    fn collection(&self) -> &str {
        RESULTS_COLLECTION
    }

    async fn fetch(
        &self,
        store: &dyn DocumentStore,
        request: &Request,
    ) -> Result<Table, CategoryError> {
        let rows = results_matching(store, Filter::eq("value_1", "NACA"), request.limit)
            .await?
            .into_iter()
            .filter(|sub| sub.is("value_1", "NACA"))
            .map(|sub| NacaRow {
                protocol_id: sub.protocol_id(),
                metric: "NACA",
                naca_score: sub.value("value_2"),
                timestamp: sub.own_value("timeStamp"),
                source: sub.own_value("source"),
                collection: RESULTS_COLLECTION,
            })
            .collect();
        Ok(Table::from_records(self.category(), rows))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Symptom onset
// ═══════════════════════════════════════════════════════════════════════

const ONSET_TAG: &str = "Symptombeginn";
const SPEC_TAG: &str = "Spezifikation Symptombeginn";

#[derive(Debug, Clone, Serialize)]
pub struct SymptomOnsetRow {
    #[serde(rename = "protocolId")]
    pub protocol_id: Value,
    pub metric: &'static str,
    pub onset_time: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub specification: Option<String>,
    pub timestamp: Value,
    pub source: Value,
    pub collection: &'static str,
}

impl Record for SymptomOnsetRow {
    const COLUMNS: &'static [&'static str] = &[
        "protocolId",
        "metric",
        "onset_time",
        "date",
        "time",
        "specification",
        "timestamp",
        "source",
        "collection",
    ];
}

#[derive(Default)]
struct Onset {
    raw_id: Value,
    date: Option<String>,
    time: Option<String>,
    timestamp: Option<Value>,
    source: Option<Value>,
}

struct Specification {
    raw_id: Value,
    text: String,
    timestamp: Option<Value>,
    source: Option<Value>,
}

/// What a symptom-onset value string holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnsetPart {
    Date,
    Time,
}

/// `DD.MM.YYYY`-like values are dates, values with a colon are times.
pub fn sniff_onset_part(value: &str) -> Option<OnsetPart> {
    if value.contains('.') && value.chars().count() >= 8 {
        Some(OnsetPart::Date)
    } else if value.contains(':') {
        Some(OnsetPart::Time)
    } else {
        None
    }
}

/// Onset date and time combined with the free-text specification.
///
/// Date and time arrive as separate `Symptombeginn` sub-records; later
/// values overwrite earlier ones per protocol. Protocols are reported in
/// first-seen order: onset ids first, then ids with only a specification.
pub struct SymptomOnset;

#[async_trait]
impl Normalizer for SymptomOnset {
    fn category(&self) -> &str {
        "Symptombeginn"
    }

    fn columns(&self) -> &'static [&'static str] {
        SymptomOnsetRow::COLUMNS
    }

    fn collection(&self) -> &str {
        RESULTS_COLLECTION
    }

    async fn fetch(
        &self,
        store: &dyn DocumentStore,
        request: &Request,
    ) -> Result<Table, CategoryError> {
        let onset_subs = results_matching(store, Filter::eq("value_1", ONSET_TAG), request.limit).await?;
        let spec_subs = results_matching(store, Filter::eq("value_1", SPEC_TAG), request.limit).await?;

        let mut order: Vec<String> = Vec::new();
        let mut onsets: HashMap<String, Onset> = HashMap::new();
        for sub in onset_subs {
            let raw_id = sub.protocol_id();
            let Some(id) = id_string(&raw_id) else {
                continue;
            };
            let onset = onsets.entry(id.clone()).or_insert_with(|| {
                order.push(id);
                Onset {
                    raw_id,
                    source: sub.parent.get("source").filter(|v| !v.is_null()).cloned(),
                    ..Onset::default()
                }
            });
            if !sub.is("value_1", ONSET_TAG) {
                continue;
            }
            if let Some(value) = sub.text("value_2").filter(|v| !v.is_empty()) {
                match sniff_onset_part(&value) {
                    Some(OnsetPart::Date) => onset.date = Some(value),
                    Some(OnsetPart::Time) => onset.time = Some(value),
                    None => {}
                }
            }
            if let Some(source) = sub.get("source") {
                onset.source = Some(source.clone());
            }
            if let Some(ts) = sub.item.as_ref().and_then(|i| i.get("timeStamp")).filter(|v| !v.is_null()) {
                onset.timestamp = Some(ts.clone());
            }
        }

        let mut specs: HashMap<String, Specification> = HashMap::new();
        for sub in spec_subs {
            if !sub.is("value_1", SPEC_TAG) {
                continue;
            }
            let raw_id = sub.protocol_id();
            let Some(id) = id_string(&raw_id) else {
                continue;
            };
            let Some(text) = sub.text("value_2").filter(|v| !v.is_empty()) else {
                continue;
            };
            if !onsets.contains_key(&id) && !specs.contains_key(&id) {
                order.push(id.clone());
            }
            specs.insert(
                id,
                Specification {
                    raw_id,
                    text,
                    timestamp: sub
                        .item
                        .as_ref()
                        .and_then(|i| i.get("timeStamp"))
                        .filter(|v| !v.is_null())
                        .cloned(),
                    source: sub.get("source").cloned(),
                },
            );
        }

        let rows = order
            .into_iter()
            .map(|id| {
                let onset = onsets.remove(&id);
                let spec = specs.remove(&id);
                let raw_id = onset
                    .as_ref()
                    .map(|o| o.raw_id.clone())
                    .or_else(|| spec.as_ref().map(|s| s.raw_id.clone()))
                    .unwrap_or(Value::Null);
                let (date, time, onset_ts, onset_source) = match onset {
                    Some(o) => (o.date, o.time, o.timestamp, o.source),
                    None => (None, None, None, None),
                };
                let onset_time = match (&date, &time) {
                    (Some(d), Some(t)) => Some(format!("{d} {t}")),
                    (Some(d), None) => Some(d.clone()),
                    (None, Some(t)) => Some(t.clone()),
                    (None, None) => None,
                };
                let (specification, spec_ts, spec_source) = match spec {
                    Some(s) => (Some(s.text), s.timestamp, s.source),
                    None => (None, None, None),
                };
                SymptomOnsetRow {
                    protocol_id: raw_id,
                    metric: "Symptombeginn",
                    onset_time,
                    date,
                    time,
                    specification,
                    timestamp: onset_ts.or(spec_ts).unwrap_or(Value::Null),
                    source: onset_source.or(spec_source).unwrap_or(Value::Null),
                    collection: RESULTS_COLLECTION,
                }
            })
            .collect();
        Ok(Table::from_records(self.category(), rows))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Reanimation
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct ReanimationRow {
    #[serde(rename = "protocolId")]
    pub protocol_id: Value,
    pub metric: &'static str,
    pub rea_status: bool,
    pub source_metric: &'static str,
    pub timestamp: Value,
    pub source: Value,
    pub collection: &'static str,
}

impl Record for ReanimationRow {
    const COLUMNS: &'static [&'static str] = &[
        "protocolId",
        "metric",
        "rea_status",
        "source_metric",
        "timestamp",
        "source",
        "collection",
    ];
}

/// Resuscitations: every `NACA 6` result plus every explicit
/// `Rea durchgeführt` field.
pub struct Reanimation;

#[async_trait]
impl Normalizer for Reanimation {
    fn category(&self) -> &str {
        "Reanimation"
    }

    fn columns(&self) -> &'static [&'static str] {
        ReanimationRow::COLUMNS
    }

    fn collection(&self) -> &str {
        RESULTS_COLLECTION
    }

    async fn fetch(
        &self,
        store: &dyn DocumentStore,
        request: &Request,
    ) -> Result<Table, CategoryError> {
        let naca_elem = Filter::eq("value_1", "NACA").and(Filter::eq("value_2", "6"));
        let naca = results_matching(store, naca_elem, request.limit).await?;
        let rea = results_matching(store, Filter::eq("value_1", "Rea durchgeführt"), request.limit).await?;

        let row = |sub: &SubRecord, status: bool, source_metric: &'static str| ReanimationRow {
            protocol_id: sub.protocol_id(),
            metric: "Reanimation",
            rea_status: status,
            source_metric,
            timestamp: sub.own_value("timeStamp"),
            source: sub.own_value("source"),
            collection: RESULTS_COLLECTION,
        };

        let mut rows: Vec<ReanimationRow> = naca
            .iter()
            .filter(|sub| sub.is("value_1", "NACA") && sub.is("value_2", "6"))
            .map(|sub| row(sub, true, "NACA 6"))
            .collect();
        rows.extend(
            rea.iter()
                .filter(|sub| sub.is("value_1", "Rea durchgeführt"))
                .map(|sub| {
                    let done = sub
                        .text("value_2")
                        .is_some_and(|v| v.trim().eq_ignore_ascii_case("ja"));
                    row(sub, done, "Reanimation field")
                }),
        );
        Ok(Table::from_records(self.category(), rows))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Reanimation with target destination
// ═══════════════════════════════════════════════════════════════════════

pub const REANIMATION_DESTINATION_COLUMNS: &[&str] = &[
    "protocolId",
    "metric",
    "rea_status",
    "source_metric",
    "timestamp",
    "source",
    "collection",
    "targetDestination",
];

/// Positive resuscitations, one per protocol, joined with the index.
///
/// Keeps rows with `rea_status == true` and a protocol id, reduces them to
/// the most recent row per protocol (first seen when no row carries a
/// timestamp), and attaches `targetDestination` from the index. A protocol
/// with more than one index row aborts the join.
pub fn join_destination(reanimation: &Table, index: &Table) -> Result<Table, CategoryError> {
    let mut positive: Vec<&Row> = reanimation
        .rows
        .iter()
        .filter(|row| row.get("rea_status") == Some(&Value::Bool(true)))
        .filter(|row| row.get("protocolId").and_then(id_string).is_some())
        .collect();

    let has_timestamps = positive
        .iter()
        .any(|row| row.get("timestamp").is_some_and(|v| !v.is_null()));
    if has_timestamps {
        positive.sort_by(|a, b| {
            let ta = a.get("timestamp").filter(|v| !v.is_null());
            let tb = b.get("timestamp").filter(|v| !v.is_null());
            match (ta, tb) {
                (Some(x), Some(y)) => compare_values(y, x).unwrap_or(std::cmp::Ordering::Equal),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
        });
    }

    let mut seen = HashSet::new();
    let latest: Vec<(String, &Row)> = positive
        .into_iter()
        .filter_map(|row| {
            let id = row.get("protocolId").and_then(id_string)?;
            seen.insert(id.clone()).then_some((id, row))
        })
        .collect();

    let mut destinations: HashMap<String, Vec<&Value>> = HashMap::new();
    for row in &index.rows {
        if let Some(id) = row.get("protocolId").and_then(id_string) {
            destinations
                .entry(id)
                .or_default()
                .push(row.get("targetDestination").unwrap_or(&Value::Null));
        }
    }

    let mut out = Table::empty("Reanimation_mit_targetDestination", REANIMATION_DESTINATION_COLUMNS);
    for (id, row) in latest {
        let destination = match destinations.get(&id).map(Vec::as_slice) {
            None | Some([]) => Value::Null,
            Some([single]) => (*single).clone(),
            Some(many) => {
                return Err(CategoryError::AmbiguousJoin {
                    protocol_id: id,
                    matches: many.len(),
                })
            }
        };
        let mut joined = row.clone();
        joined.insert("protocolId".to_string(), Value::String(id));
        joined.insert("targetDestination".to_string(), destination);
        out.rows.push(joined);
    }
    Ok(out)
}

pub struct ReanimationWithDestination;

#[async_trait]
impl Normalizer for ReanimationWithDestination {
    fn category(&self) -> &str {
        "Reanimation_mit_targetDestination"
    }

    fn columns(&self) -> &'static [&'static str] {
        REANIMATION_DESTINATION_COLUMNS
    }

    fn collection(&self) -> &str {
        RESULTS_COLLECTION
    }

    async fn fetch(
        &self,
        store: &dyn DocumentStore,
        request: &Request,
    ) -> Result<Table, CategoryError> {
        let reanimation = Reanimation.load(store, &Request::with_limit(request.limit)).await?;
        let index = IndexNormalizer
            .load(store, &Request::with_limit(request.limit))
            .await?;
        join_destination(&reanimation, &index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::testutil::{assert_schema, column};
    use crate::normalize::INDEX_COLLECTION;
    use crate::store::memory::InMemoryStore;
    use serde_json::json;

    fn results() -> Vec<Value> {
        vec![
            json!({"protocolId": "p1", "source": "doc-src", "data": [
                {"value_1": "NACA", "value_2": "6", "timeStamp": "2024-01-01T10:00:00"},
                {"value_1": "Symptombeginn", "value_2": "01.01.2024"},
                {"value_1": "Symptombeginn", "value_2": "00:50:00", "timeStamp": "2024-01-01T01:00:00"}
            ]}),
            json!({"protocolId": "p2", "data": [
                {"value_1": "NACA", "value_2": "3"},
                {"value_1": "Rea durchgeführt", "value_2": "Ja", "timeStamp": "2024-02-01T10:00:00"},
                {"value_1": "Spezifikation Symptombeginn", "value_2": "plötzlich", "source": "spec-src", "timeStamp": "2024-02-01T09:00:00"}
            ]}),
            json!({"protocolId": "p3", "data": [
                {"value_1": "Rea durchgeführt", "value_2": "nein"},
                {"value_1": "Symptombeginn", "value_2": "14:30"},
                {"value_1": "Symptombeginn", "value_2": "unbekannt"}
            ]}),
            json!({"protocolId": "p1", "data": [
                {"value_1": "Rea durchgeführt", "value_2": "ja", "timeStamp": "2024-01-01T11:00:00"}
            ]}),
        ]
    }

    fn store_with_index(index: Vec<Value>) -> InMemoryStore {
        InMemoryStore::with_collections([(RESULTS_COLLECTION, results()), (INDEX_COLLECTION, index)])
    }

    #[tokio::test]
    async fn test_naca_scores() {
        let table = Naca.fetch(&store_with_index(vec![]), &Request::default()).await.unwrap();
        assert_schema(&table, NacaRow::COLUMNS);
        assert_eq!(column(&table, "NACA-Score"), vec![json!("6"), json!("3")]);
        // p1 carries `source` on the document only.
        assert_eq!(column(&table, "source"), vec![Value::Null, Value::Null]);
        assert_eq!(column(&table, "timestamp")[0], json!("2024-01-01T10:00:00"));
    }

    #[test]
    fn test_sniff_onset_part() {
        assert_eq!(sniff_onset_part("01.01.2023"), Some(OnsetPart::Date));
        assert_eq!(sniff_onset_part("00:50:00"), Some(OnsetPart::Time));
        assert_eq!(sniff_onset_part("1.1.23"), None);
        assert_eq!(sniff_onset_part("morgens"), None);
    }

    #[tokio::test]
    async fn test_symptom_onset_combines_streams() {
        let table = SymptomOnset
            .fetch(&store_with_index(vec![]), &Request::default())
            .await
            .unwrap();
        assert_schema(&table, SymptomOnsetRow::COLUMNS);
        assert_eq!(table.protocol_ids(), vec!["p1", "p3", "p2"]);

        let p1 = &table.rows[0];
        assert_eq!(p1["onset_time"], json!("01.01.2024 00:50:00"));
        assert_eq!(p1["timestamp"], json!("2024-01-01T01:00:00"));
        assert_eq!(p1["source"], json!("doc-src"));
        assert_eq!(p1["specification"], Value::Null);

        let p3 = &table.rows[1];
        assert_eq!(p3["onset_time"], json!("14:30"));
        assert_eq!(p3["date"], Value::Null);

        let p2 = &table.rows[2];
        assert_eq!(p2["onset_time"], Value::Null);
        assert_eq!(p2["specification"], json!("plötzlich"));
        assert_eq!(p2["source"], json!("spec-src"));
        assert_eq!(p2["timestamp"], json!("2024-02-01T09:00:00"));
    }

    #[tokio::test]
    async fn test_reanimation_union() {
        let table = Reanimation
            .fetch(&store_with_index(vec![]), &Request::default())
            .await
            .unwrap();
        assert_schema(&table, ReanimationRow::COLUMNS);
        assert_eq!(
            column(&table, "source_metric"),
            vec![
                json!("NACA 6"),
                json!("Reanimation field"),
                json!("Reanimation field"),
                json!("Reanimation field")
            ]
        );
        assert_eq!(
            column(&table, "rea_status"),
            vec![json!(true), json!(true), json!(false), json!(true)]
        );
    }

    #[tokio::test]
    async fn test_destination_join_dedupes_to_latest() {
        let store = store_with_index(vec![
            json!({"protocolId": "p1", "targetDestination": "UKSH Kiel"}),
            json!({"protocolId": "p3", "targetDestination": "DIAKO"}),
        ]);
        let table = ReanimationWithDestination
            .fetch(&store, &Request::default())
            .await
            .unwrap();
        assert_schema(&table, REANIMATION_DESTINATION_COLUMNS);
        assert_eq!(table.protocol_ids(), vec!["p2", "p1"]);
        assert_eq!(table.rows[0]["targetDestination"], Value::Null);
        assert_eq!(table.rows[1]["targetDestination"], json!("UKSH Kiel"));
        // Latest p1 row is the explicit field at 11:00.
        assert_eq!(table.rows[1]["source_metric"], json!("Reanimation field"));
    }

    #[tokio::test]
    async fn test_destination_join_rejects_duplicate_index_rows() {
        let store = store_with_index(vec![
            json!({"protocolId": "p1", "targetDestination": "A"}),
            json!({"protocolId": "p1", "targetDestination": "B"}),
            json!({"protocolId": "p2", "targetDestination": "C"}),
        ]);
        let err = ReanimationWithDestination
            .fetch(&store, &Request::default())
            .await
            .unwrap_err();
        match err {
            CategoryError::AmbiguousJoin { protocol_id, matches } => {
                assert_eq!(protocol_id, "p1");
                assert_eq!(matches, 2);
            }
            other => panic!("expected ambiguous join, got {other:?}"),
        }
    }

    #[test]
    fn test_join_without_timestamps_keeps_first() {
        let rea = Table::from_documents(
            "Reanimation",
            ReanimationRow::COLUMNS,
            vec![
                json!({"protocolId": "x", "rea_status": true, "source_metric": "NACA 6"}),
                json!({"protocolId": "x", "rea_status": true, "source_metric": "Reanimation field"}),
                json!({"protocolId": null, "rea_status": true}),
            ],
        );
        let index = Table::empty("Index", &["protocolId", "targetDestination"]);
        let out = join_destination(&rea, &index).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.rows[0]["source_metric"], json!("NACA 6"));
    }
}

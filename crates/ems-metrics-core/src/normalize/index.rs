//! Mission-level categories: index, details, free texts, dispatch-centre
//! records (`ETÜ`), and vehicle availability.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};

use super::{
    find_docs, require_collection, DETAILS_COLLECTION, ETU_COLLECTION, FREETEXT_COLLECTION,
    INDEX_COLLECTION, RTM_COLLECTION,
};
use crate::error::CategoryError;
use crate::filter::{Filter, Query};
use crate::flatten::{flatten_object, ja_nein_to_bool};
use crate::models::{id_string, ProtocolFilter, Record, Request, Table};
use crate::registry::Normalizer;
use crate::store::DocumentStore;
use crate::temporal::{combine_date_time, format_timestamp, value_to_timestamp};

/// `[Jan 1 start 00:00:00, Dec 31 end 23:59:59]` on `missionDate`.
pub fn mission_year_filter(start: i32, end: i32) -> Filter {
    Filter::range(
        "missionDate",
        Some(json!(format!("{start:04}-01-01T00:00:00"))),
        Some(json!(format!("{end:04}-12-31T23:59:59"))),
    )
}

fn timestamp_field(value: Option<&Value>) -> Option<String> {
    value.and_then(value_to_timestamp).map(format_timestamp)
}

fn field(doc: &Map<String, Value>, key: &str) -> Value {
    doc.get(key).cloned().unwrap_or(Value::Null)
}

// ═══════════════════════════════════════════════════════════════════════
// Index
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRow {
    pub protocol_id: Value,
    pub mission_date: Option<String>,
    pub mission_number: Value,
    pub call_sign: Value,
    pub mission_type: Value,
    pub target_destination: Value,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl Record for IndexRow {
    const COLUMNS: &'static [&'static str] = &[
        "protocolId",
        "missionDate",
        "missionNumber",
        "callSign",
        "missionType",
        "targetDestination",
        "createdAt",
        "updatedAt",
    ];
}

/// One row per mission from `nida_index`, newest first.
pub struct IndexNormalizer;

#[async_trait]
impl Normalizer for IndexNormalizer {
    fn category(&self) -> &str {
        "Index"
    }

    fn columns(&self) -> &'static [&'static str] {
        IndexRow::COLUMNS
    }

    fn collection(&self) -> &str {
        INDEX_COLLECTION
    }

    async fn fetch(
        &self,
        store: &dyn DocumentStore,
        request: &Request,
    ) -> Result<Table, CategoryError> {
        let filter = match &request.filter {
            Some(ProtocolFilter::YearRange { start, end }) => mission_year_filter(*start, *end),
            Some(ProtocolFilter::ProtocolIds(ids)) => Filter::is_in("protocolId", ids.clone()),
            None => Filter::All,
        };
        let query = Query::new(filter)
            .sort_desc("missionDate")
            .limit(request.limit);
        let docs = find_docs(store, INDEX_COLLECTION, &query).await?;

        let rows = docs
            .into_iter()
            .filter_map(|doc| match doc {
                Value::Object(doc) => Some(IndexRow {
                    protocol_id: field(&doc, "protocolId"),
                    mission_date: timestamp_field(doc.get("missionDate")),
                    mission_number: field(&doc, "missionNumber"),
                    call_sign: field(&doc, "callSign"),
                    mission_type: field(&doc, "missionType"),
                    target_destination: field(&doc, "targetDestination"),
                    created_at: timestamp_field(doc.get("createdAt")),
                    updated_at: timestamp_field(doc.get("updatedAt")),
                }),
                _ => None,
            })
            .collect();
        Ok(Table::from_records(self.category(), rows))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Details
// ═══════════════════════════════════════════════════════════════════════

/// Status timestamps assembled from split `dateStatusX` / `timeStatusX` fields.
const STATUS_FIELDS: &[&str] = &[
    "StatusAlarm",
    "Status1",
    "Status2",
    "Status3",
    "Status4",
    "Status4b",
    "Status7",
    "Status8",
    "Status8b",
    "StatusEnd",
];

#[derive(Debug, Clone, Serialize)]
pub struct DetailsRow {
    #[serde(rename = "protocolId")]
    pub protocol_id: Value,
    #[serde(rename = "callSign")]
    pub call_sign: Value,
    #[serde(rename = "missionType")]
    pub mission_type: Value,
    #[serde(rename = "StatusAlarm")]
    pub status_alarm: Option<String>,
    #[serde(rename = "Status1")]
    pub status_1: Option<String>,
    #[serde(rename = "Status2")]
    pub status_2: Option<String>,
    #[serde(rename = "Status3")]
    pub status_3: Option<String>,
    #[serde(rename = "Status4")]
    pub status_4: Option<String>,
    #[serde(rename = "Status4b")]
    pub status_4b: Option<String>,
    #[serde(rename = "Status7")]
    pub status_7: Option<String>,
    #[serde(rename = "Status8")]
    pub status_8: Option<String>,
    #[serde(rename = "Status8b")]
    pub status_8b: Option<String>,
    #[serde(rename = "StatusEnd")]
    pub status_end: Option<String>,
    #[serde(rename = "flashingLights")]
    pub flashing_lights: Value,
    #[serde(rename = "transportFlashingLights")]
    pub transport_flashing_lights: Value,
    #[serde(rename = "nachforderungNA")]
    pub nachforderung_na: Value,
}

impl Record for DetailsRow {
    const COLUMNS: &'static [&'static str] = &[
        "protocolId",
        "callSign",
        "missionType",
        "StatusAlarm",
        "Status1",
        "Status2",
        "Status3",
        "Status4",
        "Status4b",
        "Status7",
        "Status8",
        "Status8b",
        "StatusEnd",
        "flashingLights",
        "transportFlashingLights",
        "nachforderungNA",
    ];
}

impl DetailsRow {
    fn from_document(doc: &Value) -> Self {
        let flat = flatten_object(doc, "_");
        // Fields live under `content` in current exports; older ones are flat.
        let get = |name: &str| -> Value {
            flat.get(&format!("content_{name}"))
                .or_else(|| flat.get(name))
                .cloned()
                .unwrap_or(Value::Null)
        };
        let text = |name: &str| -> Option<String> {
            match get(name) {
                Value::String(s) => Some(s),
                _ => None,
            }
        };

        let mut statuses = STATUS_FIELDS.iter().map(|status| {
            combine_date_time(
                text(&format!("date{status}")).as_deref(),
                text(&format!("time{status}")).as_deref(),
            )
            .map(format_timestamp)
        });
        let mut next = || statuses.next().flatten();

        DetailsRow {
            protocol_id: get("protocolId"),
            call_sign: get("callSign"),
            mission_type: get("missionType"),
            status_alarm: next(),
            status_1: next(),
            status_2: next(),
            status_3: next(),
            status_4: next(),
            status_4b: next(),
            status_7: next(),
            status_8: next(),
            status_8b: next(),
            status_end: next(),
            flashing_lights: ja_nein_to_bool(&get("flashingLights")),
            transport_flashing_lights: ja_nein_to_bool(&get("transportFlashingLights")),
            nachforderung_na: ja_nein_to_bool(&get("nachforderungNA")),
        }
    }
}

/// Per-mission status times and flags from `protocols_details`, newest
/// alarm first.
pub struct DetailsNormalizer;

#[async_trait]
impl Normalizer for DetailsNormalizer {
    fn category(&self) -> &str {
        "Details"
    }

    fn columns(&self) -> &'static [&'static str] {
        DetailsRow::COLUMNS
    }

    fn collection(&self) -> &str {
        DETAILS_COLLECTION
    }

    async fn fetch(
        &self,
        store: &dyn DocumentStore,
        request: &Request,
    ) -> Result<Table, CategoryError> {
        let filter = match request.protocol_ids() {
            Some(ids) => Filter::is_in("protocolId", ids.to_vec()),
            None => Filter::All,
        };
        let query = Query::new(filter)
            .sort_desc("content.dateStatusAlarm")
            .limit(request.limit);
        let docs = find_docs(store, DETAILS_COLLECTION, &query).await?;
        let rows = docs.iter().map(DetailsRow::from_document).collect();
        Ok(Table::from_records(self.category(), rows))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Free texts
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct FreetextRow {
    #[serde(rename = "protocolId")]
    pub protocol_id: Value,
    pub content: Value,
    pub timestamp: Value,
    pub source: Value,
    pub collection: &'static str,
}

impl Record for FreetextRow {
    const COLUMNS: &'static [&'static str] =
        &["protocolId", "content", "timestamp", "source", "collection"];
}

pub struct FreetextNormalizer;

#[async_trait]
impl Normalizer for FreetextNormalizer {
    fn category(&self) -> &str {
        "Freetext"
    }

    fn columns(&self) -> &'static [&'static str] {
        FreetextRow::COLUMNS
    }

    fn collection(&self) -> &str {
        FREETEXT_COLLECTION
    }

    async fn fetch(
        &self,
        store: &dyn DocumentStore,
        request: &Request,
    ) -> Result<Table, CategoryError> {
        let query = Query::default().limit(request.limit);
        let docs = find_docs(store, FREETEXT_COLLECTION, &query).await?;
        let rows = docs
            .into_iter()
            .filter_map(|doc| match doc {
                Value::Object(doc) => {
                    let or = |a: &str, b: &str| {
                        doc.get(a)
                            .filter(|v| !v.is_null())
                            .or_else(|| doc.get(b))
                            .cloned()
                            .unwrap_or(Value::Null)
                    };
                    Some(FreetextRow {
                        protocol_id: field(&doc, "protocolId"),
                        content: or("content", "text"),
                        timestamp: or("timeStamp", "timestamp"),
                        source: field(&doc, "source"),
                        collection: FREETEXT_COLLECTION,
                    })
                }
                _ => None,
            })
            .collect();
        Ok(Table::from_records(self.category(), rows))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// ETÜ (dispatch centre export)
// ═══════════════════════════════════════════════════════════════════════

pub const ETU_COLUMNS: &[&str] = &[
    "EINSATZ_NR",
    "EINSATZMITTEL",
    "EINSATZBEGINN",
    "ALARMIERT",
    "ZEIT_AN_E",
    "ZEIT_AB_E",
    "ZEIT_AN_Z",
    "SOSI",
    "SOSI_ZO",
    "EO_LANDKREIS",
];

/// Dispatch-centre records of one district, newest first.
pub struct EtuNormalizer {
    district: String,
}

impl EtuNormalizer {
    pub fn new(district: &str) -> Self {
        Self {
            district: district.to_string(),
        }
    }
}

#[async_trait]
impl Normalizer for EtuNormalizer {
    fn category(&self) -> &str {
        "ETÜ"
    }

    fn columns(&self) -> &'static [&'static str] {
        ETU_COLUMNS
    }

    fn collection(&self) -> &str {
        ETU_COLLECTION
    }

    async fn fetch(
        &self,
        store: &dyn DocumentStore,
        request: &Request,
    ) -> Result<Table, CategoryError> {
        require_collection(store, ETU_COLLECTION).await?;
        let query = Query::new(Filter::eq("EO_LANDKREIS", self.district.as_str()))
            .sort_desc("EINSATZBEGINN")
            .limit(request.limit);
        let docs = find_docs(store, ETU_COLLECTION, &query).await?;
        Ok(Table::from_documents(self.category(), ETU_COLUMNS, docs))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// RTM_Vorhaltung (vehicle availability)
// ═══════════════════════════════════════════════════════════════════════

pub const RTM_COLUMNS: &[&str] = &[
    "_id",
    "vehicle_identifier",
    "vehicle_type",
    "station",
    "valid_from",
    "valid_to",
    "availability",
    "total_week_hours",
];

pub struct RtmVorhaltungNormalizer;

#[async_trait]
impl Normalizer for RtmVorhaltungNormalizer {
    fn category(&self) -> &str {
        "RTM_Vorhaltung"
    }

    fn columns(&self) -> &'static [&'static str] {
        RTM_COLUMNS
    }

    fn collection(&self) -> &str {
        RTM_COLLECTION
    }

    async fn fetch(
        &self,
        store: &dyn DocumentStore,
        request: &Request,
    ) -> Result<Table, CategoryError> {
        require_collection(store, RTM_COLLECTION).await?;
        let query = Query::default().limit(request.limit);
        let mut docs = find_docs(store, RTM_COLLECTION, &query).await?;
        for doc in &mut docs {
            if let Some(id) = doc.get("_id").and_then(id_string) {
                doc["_id"] = Value::String(id);
            }
        }
        Ok(Table::from_documents(self.category(), RTM_COLUMNS, docs))
    }
}

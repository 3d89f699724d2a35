//! Vital signs, one collection per sign (`vitals_<code>`).

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::find_docs;
use crate::error::CategoryError;
use crate::filter::Query;
use crate::flatten::explode;
use crate::models::{Record, Request, Table};
use crate::registry::Normalizer;
use crate::store::DocumentStore;

/// Registered vital-sign short codes.
pub const VITAL_CODES: [&str; 10] = [
    "af", "bd", "bz", "co2", "co", "hb", "hf", "puls", "spo2", "temp",
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalRow {
    pub protocol_id: Value,
    pub metric: String,
    pub value: Value,
    pub unit: Value,
    pub o2_administration: Value,
    pub description: Value,
    pub timestamp: Value,
    pub source: Value,
    pub collection: String,
}

impl Record for VitalRow {
    const COLUMNS: &'static [&'static str] = &[
        "protocolId",
        "metric",
        "value",
        "unit",
        "o2Administration",
        "description",
        "timestamp",
        "source",
        "collection",
    ];
}

/// One vital sign. Documents may carry readings directly or in a `data`
/// array; both shapes yield one row per reading.
pub struct Vital {
    code: String,
    collection: String,
}

impl Vital {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            collection: format!("vitals_{code}"),
        }
    }
}

#[async_trait]
impl Normalizer for Vital {
    fn category(&self) -> &str {
        &self.code
    }

    fn columns(&self) -> &'static [&'static str] {
        VitalRow::COLUMNS
    }

    fn collection(&self) -> &str {
        &self.collection
    }

    async fn fetch(
        &self,
        store: &dyn DocumentStore,
        request: &Request,
    ) -> Result<Table, CategoryError> {
        let query = Query::default().limit(request.limit);
        let docs = find_docs(store, &self.collection, &query).await?;
        let rows = explode(docs, "data")
            .into_iter()
            .map(|sub| VitalRow {
                protocol_id: sub.protocol_id(),
                metric: self.code.clone(),
                value: sub.value("value"),
                // Some exports carry the unit in a column literally named "%".
                unit: sub.get("unit").or_else(|| sub.get("%")).cloned().unwrap_or(Value::Null),
                o2_administration: sub.value("o2Administration"),
                description: sub.value("description"),
                timestamp: sub.get("timeStamp").or_else(|| sub.get("timestamp")).cloned().unwrap_or(Value::Null),
                source: sub.value("source"),
                collection: self.collection.clone(),
            })
            .collect();
        Ok(Table::from_records(self.category(), rows))
    }
}

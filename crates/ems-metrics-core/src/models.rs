//! Core data types shared by the normalizers, the coordinator, and the
//! analytics functions.
//!
//! Raw records arrive as [`Document`]s (schemaless JSON objects). Every
//! category normalizer turns them into typed rows implementing [`Record`]
//! and projects those rows into a [`Table`], the flat, fixed-schema unit
//! handed to callers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A raw record from a source collection.
pub type Document = Value;

/// A flat row: column name → value.
pub type Row = Map<String, Value>;

/// Default number of documents fetched per category query.
pub const DEFAULT_LIMIT: usize = 10_000;

/// A typed output row with a fixed, ordered column set.
///
/// Implementors serialize to a JSON object whose keys are exactly
/// [`COLUMNS`](Record::COLUMNS).
pub trait Record: Serialize {
    const COLUMNS: &'static [&'static str];
}

/// Restricts a category query to a set of missions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolFilter {
    /// Missions whose `missionDate` falls in `[Jan 1 start, Dec 31 end]`.
    YearRange { start: i32, end: i32 },
    /// Missions with one of these protocol identifiers.
    ProtocolIds(Vec<String>),
}

/// Parameters of one category query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Request {
    pub limit: usize,
    pub filter: Option<ProtocolFilter>,
    /// Case-insensitive medication name filter (`Medikamente` only).
    pub med_name: Option<String>,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            filter: None,
            med_name: None,
        }
    }
}

impl Request {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn protocol_ids(&self) -> Option<&[String]> {
        match &self.filter {
            Some(ProtocolFilter::ProtocolIds(ids)) => Some(ids),
            _ => None,
        }
    }
}

/// A flat, fixed-schema result table.
///
/// Every row carries exactly the keys listed in `columns`. A table with
/// zero rows still carries its full column list, so downstream code can
/// concatenate and merge results without special-casing empty sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub category: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    /// A zero-row table with the given columns.
    pub fn empty(category: &str, columns: &[&str]) -> Self {
        Self {
            category: category.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Project typed records into a table with `R::COLUMNS`.
    pub fn from_records<R: Record>(category: &str, records: Vec<R>) -> Self {
        let mut table = Self::empty(category, R::COLUMNS);
        for record in records {
            let value = serde_json::to_value(&record).unwrap_or(Value::Null);
            table.push_projected(value);
        }
        table
    }

    /// Project schemaless documents onto a fixed column list.
    ///
    /// Missing fields become `null`; fields outside `columns` are dropped.
    pub fn from_documents(category: &str, columns: &[&str], docs: Vec<Document>) -> Self {
        let mut table = Self::empty(category, columns);
        for doc in docs {
            table.push_projected(doc);
        }
        table
    }

    fn push_projected(&mut self, value: Value) {
        let mut source = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let row: Row = self
            .columns
            .iter()
            .map(|c| (c.clone(), source.remove(c).unwrap_or(Value::Null)))
            .collect();
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Values of one column, `Null` for rows that lack it.
    pub fn column<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.rows
            .iter()
            .map(move |row| row.get(name).unwrap_or(&Value::Null))
    }

    /// Unique, non-null `protocolId`s in first-seen order.
    pub fn protocol_ids(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.column("protocolId")
            .filter_map(id_string)
            .filter(|id| seen.insert(id.clone()))
            .collect()
    }

    /// Keep only rows whose `protocolId` is in `ids`.
    ///
    /// Tables without a `protocolId` column are left untouched.
    pub fn retain_protocols(&mut self, ids: &std::collections::HashSet<String>) {
        if !self.has_column("protocolId") {
            return;
        }
        self.rows.retain(|row| {
            row.get("protocolId")
                .and_then(id_string)
                .is_some_and(|id| ids.contains(&id))
        });
    }

    /// Append a column, filling each row via `f`.
    pub fn add_column(&mut self, name: &str, mut f: impl FnMut(&Row) -> Value) {
        for row in &mut self.rows {
            let value = f(row);
            row.insert(name.to_string(), value);
        }
        if !self.has_column(name) {
            self.columns.push(name.to_string());
        }
    }
}

/// Render an identifier (string or number) as a string.
///
/// MongoDB exports wrap object ids as `{"$oid": "..."}`; those are unwrapped.
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map.get("$oid").and_then(id_string),
        _ => None,
    }
}

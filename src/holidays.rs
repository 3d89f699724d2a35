//! Public-holiday feed (`Feiertage`).
//!
//! The feed answers `{"feiertage": [{"date": "2024-10-03", "fname": ...}, ...]}`.
//! Each entry becomes a row of `date`, `name`, and the English weekday
//! name of the date.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use ems_metrics_core::error::CategoryError;
use ems_metrics_core::models::{Document, Request, Table};
use ems_metrics_core::registry::{Normalizer, SourceKind};
use ems_metrics_core::store::DocumentStore;
use ems_metrics_core::temporal::parse_date;

use crate::config::HolidayFeedConfig;

pub const HOLIDAY_COLUMNS: &[&str] = &["date", "name", "weekday"];

/// Rows of a holiday feed response. Entries without a parseable date keep
/// a null `weekday`.
pub fn parse_feed(body: &Value) -> Vec<Document> {
    let Some(entries) = body.get("feiertage").and_then(Value::as_array) else {
        return Vec::new();
    };
    entries
        .iter()
        .map(|entry| {
            let date = entry.get("date").cloned().unwrap_or(Value::Null);
            let weekday = date
                .as_str()
                .and_then(parse_date)
                .map(|d| Value::String(d.format("%A").to_string()))
                .unwrap_or(Value::Null);
            json!({
                "date": date,
                "name": entry.get("fname").cloned().unwrap_or(Value::Null),
                "weekday": weekday,
            })
        })
        .collect()
}

pub struct HolidayFeed {
    http: reqwest::Client,
    url: String,
}

impl HolidayFeed {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
            url: url.into(),
        })
    }

    pub fn from_config(config: &HolidayFeedConfig) -> Result<Self> {
        Self::new(config.url.clone(), Duration::from_secs(config.timeout_secs))
    }

    async fn get(&self) -> Result<Value> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("GET {}", self.url))?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl Normalizer for HolidayFeed {
    fn category(&self) -> &str {
        "Feiertage"
    }

    fn columns(&self) -> &'static [&'static str] {
        HOLIDAY_COLUMNS
    }

    fn collection(&self) -> &str {
        &self.url
    }

    fn source_kind(&self) -> SourceKind {
        SourceKind::PublicFeed
    }

    async fn fetch(
        &self,
        _store: &dyn DocumentStore,
        request: &Request,
    ) -> Result<Table, CategoryError> {
        let body = self
            .get()
            .await
            .map_err(|e| CategoryError::unavailable(&self.url, format!("{e:#}")))?;
        let mut docs = parse_feed(&body);
        docs.truncate(request.limit);
        Ok(Table::from_documents(self.category(), HOLIDAY_COLUMNS, docs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ems_metrics_core::store::memory::InMemoryStore;
    use ems_metrics_core::temporal::HolidayCalendar;

    #[test]
    fn test_parse_feed() {
        let body = json!({
            "status": "success",
            "feiertage": [
                {"date": "2024-10-03", "fname": "Tag der Deutschen Einheit", "sh": "1"},
                {"date": "2024-12-25", "fname": "1. Weihnachtstag"},
                {"date": "bogus", "fname": "Kaputt"}
            ]
        });
        let rows = parse_feed(&body);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["weekday"], json!("Thursday"));
        assert_eq!(rows[1]["name"], json!("1. Weihnachtstag"));
        assert_eq!(rows[2]["weekday"], Value::Null);

        let table = Table::from_documents("Feiertage", HOLIDAY_COLUMNS, rows);
        let calendar = HolidayCalendar::from_table(&table);
        assert_eq!(calendar.len(), 2);
    }

    #[test]
    fn test_parse_feed_without_array() {
        assert!(parse_feed(&json!({"status": "error"})).is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_feed_is_empty() {
        let feed = HolidayFeed::new("http://127.0.0.1:9/", Duration::from_secs(2)).unwrap();
        let table = feed
            .load(&InMemoryStore::new(), &Request::default())
            .await
            .unwrap();
        assert!(table.is_empty());
        assert_eq!(table.columns, vec!["date", "name", "weekday"]);
    }
}

//! Date/time parsing, weekday/holiday bucketing, and status-sequence
//! duration analysis.
//!
//! Source systems store dates in several shapes: ISO 8601 strings, German
//! `DD.MM.YYYY` dates with a separate `HH:MM:SS` time field, and MongoDB
//! extended JSON (`{"$date": ...}`). All parsers here return `Option`:
//! a value that cannot be parsed becomes `None`, never an error.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{id_string, Table};

const DATE_FORMATS: &[&str] = &["%d.%m.%Y", "%Y-%m-%d", "%d.%m.%y", "%Y/%m/%d"];
const TIME_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M:%S%.f", "%H:%M"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
];

/// Output format for timestamps written into tables.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
        .or_else(|| parse_timestamp(s).map(|dt| dt.date()))
}

pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    TIME_FORMATS
        .iter()
        .find_map(|f| NaiveTime::parse_from_str(s, f).ok())
}

/// Parse a timestamp string.
///
/// Offsets (`Z`, `+01:00`) are converted to UTC and dropped. Date-only
/// strings resolve to midnight.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.naive_utc());
    }
    if let Some(dt) = DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
    {
        return Some(dt);
    }
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Interpret a JSON value as a timestamp.
///
/// Accepts strings, `{"$date": <string | millis | {"$numberLong": ..}>}`,
/// and bare epoch milliseconds.
pub fn value_to_timestamp(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => n
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .map(|dt| dt.naive_utc()),
        Value::Object(map) => match map.get("$date").or_else(|| map.get("$numberLong"))? {
            Value::String(s) => parse_timestamp(s).or_else(|| {
                s.parse::<i64>()
                    .ok()
                    .and_then(DateTime::from_timestamp_millis)
                    .map(|dt| dt.naive_utc())
            }),
            other => value_to_timestamp(other),
        },
        _ => None,
    }
}

pub fn format_timestamp(dt: NaiveDateTime) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}

/// Combine a date-only and a time-only value into one timestamp.
///
/// Either part missing or unparseable yields `None`.
pub fn combine_date_time(date: Option<&str>, time: Option<&str>) -> Option<NaiveDateTime> {
    let date = parse_date(date?)?;
    let time = parse_time(time?)?;
    Some(date.and_time(time))
}

// ═══════════════════════════════════════════════════════════════════════
// Weekday / holiday buckets
// ═══════════════════════════════════════════════════════════════════════

/// Public holidays for one region, keyed by calendar date.
#[derive(Debug, Clone, Default)]
pub struct HolidayCalendar {
    names: HashMap<NaiveDate, String>,
}

impl HolidayCalendar {
    pub fn new(entries: impl IntoIterator<Item = (NaiveDate, String)>) -> Self {
        Self {
            names: entries.into_iter().collect(),
        }
    }

    /// Build from a `Feiertage` table (`date`, `name` columns).
    pub fn from_table(table: &Table) -> Self {
        Self::new(table.rows.iter().filter_map(|row| {
            let date = row.get("date").and_then(Value::as_str).and_then(parse_date)?;
            let name = row
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Some((date, name))
        }))
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.names.contains_key(&date)
    }

    pub fn name(&self, date: NaiveDate) -> Option<&str> {
        self.names.get(&date).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Demand-pattern bucket of a calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeekdayGroup {
    MonThu,
    Fri,
    Sat,
    Sun,
    Holiday,
}

impl WeekdayGroup {
    /// Display order used by every cross tabulation.
    pub const ALL: [WeekdayGroup; 5] = [
        WeekdayGroup::MonThu,
        WeekdayGroup::Fri,
        WeekdayGroup::Sat,
        WeekdayGroup::Sun,
        WeekdayGroup::Holiday,
    ];

    /// Holiday membership takes precedence over the weekday.
    pub fn classify(date: NaiveDate, holidays: &HolidayCalendar) -> Self {
        if holidays.contains(date) {
            return WeekdayGroup::Holiday;
        }
        match date.weekday() {
            Weekday::Mon | Weekday::Tue | Weekday::Wed | Weekday::Thu => WeekdayGroup::MonThu,
            Weekday::Fri => WeekdayGroup::Fri,
            Weekday::Sat => WeekdayGroup::Sat,
            Weekday::Sun => WeekdayGroup::Sun,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            WeekdayGroup::MonThu => "Mo-Do",
            WeekdayGroup::Fri => "Fr",
            WeekdayGroup::Sat => "Sa",
            WeekdayGroup::Sun => "So",
            WeekdayGroup::Holiday => "Wochenfeiertag",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Status sequences
// ═══════════════════════════════════════════════════════════════════════

/// One status change of a transport booking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    pub transport_id: String,
    pub old_status: Option<String>,
    pub new_status: String,
    pub changed_at: NaiveDateTime,
}

impl StatusEvent {
    /// Read events from a `TransportStatusHistory` table.
    ///
    /// Rows without a transport id, a new status, or a parseable
    /// `changed_at` are skipped.
    pub fn from_table(table: &Table) -> Vec<StatusEvent> {
        table
            .rows
            .iter()
            .filter_map(|row| {
                Some(StatusEvent {
                    transport_id: row.get("transport_id").and_then(id_string)?,
                    old_status: row
                        .get("old_status")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    new_status: row.get("new_status").and_then(Value::as_str)?.to_string(),
                    changed_at: row.get("changed_at").and_then(value_to_timestamp)?,
                })
            })
            .collect()
    }
}

/// The ordered statuses a complete flow must pass through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFlow {
    pub start: String,
    pub intermediates: Vec<String>,
    pub terminal: String,
}

impl Default for StatusFlow {
    fn default() -> Self {
        Self {
            start: "offen".to_string(),
            intermediates: vec!["angenommen".to_string(), "disponiert".to_string()],
            terminal: "abgeschlossen".to_string(),
        }
    }
}

impl StatusFlow {
    /// All statuses in flow order.
    pub fn statuses(&self) -> Vec<&str> {
        std::iter::once(self.start.as_str())
            .chain(self.intermediates.iter().map(String::as_str))
            .chain(std::iter::once(self.terminal.as_str()))
            .collect()
    }

    /// Labels of the consecutive steps, e.g. `"offen → angenommen"`.
    pub fn step_labels(&self) -> Vec<String> {
        self.statuses()
            .windows(2)
            .map(|w| format!("{} → {}", w[0], w[1]))
            .collect()
    }
}

/// Elapsed times of one transport that completed the whole flow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowDurations {
    pub transport_id: String,
    /// Matched event time per status, in flow order.
    pub times: Vec<NaiveDateTime>,
    /// Minutes between consecutive matched events.
    pub step_minutes: Vec<f64>,
    pub total_minutes: f64,
}

fn minutes_between(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    (to - from).num_milliseconds() as f64 / 60_000.0
}

/// Match one transport's time-ordered events against `flow`.
///
/// Takes the first occurrence of the start status, then, scanning forward,
/// the first occurrence of each intermediate status and the last
/// occurrence of the terminal status. Returns `None` unless every status
/// is found after the start.
pub fn match_flow(sorted: &[&StatusEvent], flow: &StatusFlow) -> Option<Vec<NaiveDateTime>> {
    let start = sorted.iter().position(|e| e.new_status == flow.start)?;
    let mut times = vec![sorted[start].changed_at];
    let mut cursor = start;

    for status in &flow.intermediates {
        let offset = sorted[cursor + 1..]
            .iter()
            .position(|e| &e.new_status == status)?;
        cursor += 1 + offset;
        times.push(sorted[cursor].changed_at);
    }

    let terminal = sorted[cursor + 1..]
        .iter()
        .rposition(|e| e.new_status == flow.terminal)?;
    times.push(sorted[cursor + 1 + terminal].changed_at);
    Some(times)
}

/// Durations for every transport that exhibits the full `flow`.
///
/// Transports are reported in first-seen order; incomplete flows
/// contribute nothing.
pub fn status_flow_durations(events: &[StatusEvent], flow: &StatusFlow) -> Vec<FlowDurations> {
    let mut order: Vec<&str> = Vec::new();
    let mut by_transport: HashMap<&str, Vec<&StatusEvent>> = HashMap::new();
    for event in events {
        let id = event.transport_id.as_str();
        by_transport
            .entry(id)
            .or_insert_with(|| {
                order.push(id);
                Vec::new()
            })
            .push(event);
    }

    let mut result = Vec::new();
    for id in order {
        let mut sorted = by_transport.remove(id).unwrap_or_default();
        sorted.sort_by_key(|e| e.changed_at);

        let Some(times) = match_flow(&sorted, flow) else {
            continue;
        };
        let step_minutes = times
            .windows(2)
            .map(|w| minutes_between(w[0], w[1]))
            .collect();
        let total_minutes = minutes_between(times[0], times[times.len() - 1]);
        result.push(FlowDurations {
            transport_id: id.to_string(),
            times,
            step_minutes,
            total_minutes,
        });
    }
    result
}

/// Distinct calendar dates present in `dates`.
pub fn distinct_days(dates: impl IntoIterator<Item = NaiveDate>) -> usize {
    dates.into_iter().collect::<HashSet<_>>().len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ts(s: &str) -> NaiveDateTime {
        parse_timestamp(s).unwrap()
    }

    fn event(id: &str, status: &str, at: &str) -> StatusEvent {
        StatusEvent {
            transport_id: id.to_string(),
            old_status: None,
            new_status: status.to_string(),
            changed_at: ts(at),
        }
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(
            parse_timestamp("2024-03-05T10:15:00Z"),
            parse_timestamp("2024-03-05 10:15:00")
        );
        assert_eq!(
            parse_timestamp("2024-03-05T11:15:00+01:00"),
            parse_timestamp("2024-03-05T10:15:00")
        );
        assert_eq!(
            parse_timestamp("05.03.2024 10:15"),
            parse_timestamp("2024-03-05T10:15")
        );
        assert_eq!(
            parse_timestamp("2024-03-05"),
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(parse_timestamp("not a date"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_value_to_timestamp_extended_json() {
        let expected = parse_timestamp("2023-01-01T00:00:00");
        assert_eq!(
            value_to_timestamp(&json!({"$date": "2023-01-01T00:00:00Z"})),
            expected
        );
        assert_eq!(
            value_to_timestamp(&json!({"$date": {"$numberLong": "1672531200000"}})),
            expected
        );
        assert_eq!(value_to_timestamp(&json!(1672531200000i64)), expected);
        assert_eq!(value_to_timestamp(&json!(true)), None);
    }

    #[test]
    fn test_combine_date_time() {
        assert_eq!(
            combine_date_time(Some("01.02.2024"), Some("13:45:10")),
            parse_timestamp("2024-02-01T13:45:10")
        );
        assert_eq!(
            combine_date_time(Some("2024-02-01"), Some("13:45")),
            parse_timestamp("2024-02-01T13:45:00")
        );
        assert_eq!(combine_date_time(Some("01.02.2024"), None), None);
        assert_eq!(combine_date_time(None, Some("13:45")), None);
        assert_eq!(combine_date_time(Some("garbage"), Some("13:45")), None);
        assert_eq!(combine_date_time(Some("01.02.2024"), Some("25:99")), None);
    }

    #[test]
    fn test_weekday_groups() {
        let none = HolidayCalendar::default();
        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();
        assert_eq!(WeekdayGroup::classify(d(2024, 10, 1), &none), WeekdayGroup::MonThu);
        assert_eq!(WeekdayGroup::classify(d(2024, 10, 4), &none), WeekdayGroup::Fri);
        assert_eq!(WeekdayGroup::classify(d(2024, 10, 5), &none), WeekdayGroup::Sat);
        assert_eq!(WeekdayGroup::classify(d(2024, 10, 6), &none), WeekdayGroup::Sun);
    }

    #[test]
    fn test_holiday_beats_weekday() {
        // 2024-12-24 is a Tuesday.
        let date = NaiveDate::from_ymd_opt(2024, 12, 24).unwrap();
        assert_eq!(date.weekday(), Weekday::Tue);
        let holidays = HolidayCalendar::new([(date, "Heiligabend".to_string())]);
        assert_eq!(WeekdayGroup::classify(date, &holidays), WeekdayGroup::Holiday);
        assert_eq!(WeekdayGroup::Holiday.label(), "Wochenfeiertag");
    }

    #[test]
    fn test_holiday_calendar_from_table() {
        let table = Table::from_documents(
            "Feiertage",
            &["date", "name", "weekday"],
            vec![
                json!({"date": "2024-10-03", "name": "Tag der Deutschen Einheit"}),
                json!({"date": null, "name": "kaputt"}),
            ],
        );
        let calendar = HolidayCalendar::from_table(&table);
        assert_eq!(calendar.len(), 1);
        assert_eq!(
            calendar.name(NaiveDate::from_ymd_opt(2024, 10, 3).unwrap()),
            Some("Tag der Deutschen Einheit")
        );
    }

    #[test]
    fn test_full_flow_durations() {
        let events = vec![
            event("t1", "abgeschlossen", "2024-01-01T10:40:00"),
            event("t1", "offen", "2024-01-01T10:00:00"),
            event("t1", "angenommen", "2024-01-01T10:05:00"),
            event("t1", "disponiert", "2024-01-01T10:15:00"),
        ];
        let flows = status_flow_durations(&events, &StatusFlow::default());
        assert_eq!(flows.len(), 1);
        let f = &flows[0];
        assert_eq!(f.transport_id, "t1");
        assert_eq!(f.step_minutes, vec![5.0, 10.0, 25.0]);
        assert_eq!(f.total_minutes, 40.0);
    }

    #[test]
    fn test_missing_intermediate_excluded() {
        let events = vec![
            event("t1", "offen", "2024-01-01T10:00:00"),
            event("t1", "angenommen", "2024-01-01T10:05:00"),
            event("t1", "abgeschlossen", "2024-01-01T10:40:00"),
        ];
        assert!(status_flow_durations(&events, &StatusFlow::default()).is_empty());
    }

    #[test]
    fn test_statuses_before_start_do_not_count() {
        let events = vec![
            event("t1", "angenommen", "2024-01-01T09:00:00"),
            event("t1", "offen", "2024-01-01T10:00:00"),
            event("t1", "disponiert", "2024-01-01T10:15:00"),
            event("t1", "abgeschlossen", "2024-01-01T10:40:00"),
        ];
        assert!(status_flow_durations(&events, &StatusFlow::default()).is_empty());
    }

    #[test]
    fn test_last_terminal_occurrence_wins() {
        let events = vec![
            event("t1", "offen", "2024-01-01T10:00:00"),
            event("t1", "angenommen", "2024-01-01T10:01:00"),
            event("t1", "disponiert", "2024-01-01T10:02:00"),
            event("t1", "abgeschlossen", "2024-01-01T10:10:00"),
            event("t1", "abgeschlossen", "2024-01-01T10:30:00"),
            event("t2", "offen", "2024-01-01T11:00:00"),
        ];
        let flows = status_flow_durations(&events, &StatusFlow::default());
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].step_minutes[2], 28.0);
        assert_eq!(flows[0].total_minutes, 30.0);
    }

    #[test]
    fn test_step_labels() {
        assert_eq!(
            StatusFlow::default().step_labels(),
            vec![
                "offen → angenommen",
                "angenommen → disponiert",
                "disponiert → abgeschlossen"
            ]
        );
    }

    #[test]
    fn test_distinct_days() {
        let dates = [
            ts("2024-03-01T08:00:00").date(),
            ts("2024-03-01T23:59:00").date(),
            ts("2024-03-02T00:01:00").date(),
        ];
        assert_eq!(distinct_days(dates), 2);
        assert_eq!(distinct_days(Vec::new()), 0);
    }

    #[test]
    fn test_status_events_from_table() {
        let table = Table::from_documents(
            "TransportStatusHistory",
            &["id", "old_status", "new_status", "changed_at", "transport_id"],
            vec![
                json!({"id": 1, "old_status": null, "new_status": "offen",
                       "changed_at": "2024-01-01T10:00:00Z", "transport_id": 7}),
                json!({"id": 2, "new_status": "offen", "changed_at": "kaputt", "transport_id": 7}),
            ],
        );
        let events = StatusEvent::from_table(&table);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].transport_id, "7");
    }
}

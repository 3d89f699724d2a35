//! Derived metrics over normalized tables: cross tabulations, heatmaps,
//! process-flow statistics, special-rights drives, and vehicle workload.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::Serialize;
use serde_json::{json, Value};

use crate::models::{Row, Table};
use crate::stats::{describe, Summary};
use crate::temporal::{
    distinct_days, status_flow_durations, value_to_timestamp, HolidayCalendar, StatusEvent, StatusFlow,
    WeekdayGroup,
};

pub const UNKNOWN_MISSION_TYPE: &str = "Unbekannter Missionstyp";
pub const UNKNOWN_CATEGORY: &str = "Unbekannt";
pub const TOTAL_LABEL: &str = "Gesamt";

fn row_timestamp(row: &Row, column: &str) -> Option<NaiveDateTime> {
    row.get(column).and_then(value_to_timestamp)
}

fn label_or(row: &Row, column: &str, fallback: &str) -> String {
    match row.get(column) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => fallback.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Cross tabulation
// ═══════════════════════════════════════════════════════════════════════

/// Counts of a row label × weekday group, with `Gesamt` margins.
///
/// `counts[i][j]` is the count for `rows[i]` and `columns[j]`; the last
/// row and the last column hold the totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Crosstab {
    pub rows: Vec<String>,
    pub columns: Vec<String>,
    pub counts: Vec<Vec<usize>>,
}

impl Crosstab {
    fn from_pairs(pairs: impl IntoIterator<Item = (String, WeekdayGroup)>) -> Self {
        let groups = WeekdayGroup::ALL;
        let mut by_label: BTreeMap<String, [usize; 5]> = BTreeMap::new();
        for (label, group) in pairs {
            let slot = groups.iter().position(|g| *g == group).unwrap_or(0);
            by_label.entry(label).or_default()[slot] += 1;
        }

        let mut rows = Vec::with_capacity(by_label.len() + 1);
        let mut counts = Vec::with_capacity(by_label.len() + 1);
        let mut totals = vec![0usize; groups.len() + 1];
        for (label, cells) in by_label {
            let mut line: Vec<usize> = cells.to_vec();
            line.push(cells.iter().sum());
            for (t, c) in totals.iter_mut().zip(&line) {
                *t += c;
            }
            rows.push(label);
            counts.push(line);
        }
        rows.push(TOTAL_LABEL.to_string());
        counts.push(totals);

        let mut columns: Vec<String> = groups.iter().map(|g| g.label().to_string()).collect();
        columns.push(TOTAL_LABEL.to_string());
        Self {
            rows,
            columns,
            counts,
        }
    }

    /// Count for a row and column label.
    pub fn get(&self, row: &str, column: &str) -> Option<usize> {
        let i = self.rows.iter().position(|r| r == row)?;
        let j = self.columns.iter().position(|c| c == column)?;
        Some(self.counts[i][j])
    }

    pub fn total(&self) -> usize {
        self.counts
            .last()
            .and_then(|r| r.last())
            .copied()
            .unwrap_or(0)
    }

    /// Render as a table whose first column is named `row_header`.
    pub fn to_table(&self, category: &str, row_header: &str) -> Table {
        let mut columns = vec![row_header.to_string()];
        columns.extend(self.columns.iter().cloned());
        let rows = self
            .rows
            .iter()
            .zip(&self.counts)
            .map(|(label, line)| {
                let mut row = Row::new();
                row.insert(row_header.to_string(), json!(label));
                for (col, count) in self.columns.iter().zip(line) {
                    row.insert(col.clone(), json!(count));
                }
                row
            })
            .collect();
        Table {
            category: category.to_string(),
            columns,
            rows,
        }
    }
}

/// Mission type × weekday group of `Status1` over a `Details` table.
///
/// Missing or blank mission types count as `Unbekannter Missionstyp`.
/// Missions without a `Status1` timestamp are skipped.
pub fn mission_type_crosstab(details: &Table, holidays: &HolidayCalendar) -> Crosstab {
    Crosstab::from_pairs(details.rows.iter().filter_map(|row| {
        let status1 = row_timestamp(row, "Status1")?;
        Some((
            label_or(row, "missionType", UNKNOWN_MISSION_TYPE),
            WeekdayGroup::classify(status1.date(), holidays),
        ))
    }))
}

/// Transport category × weekday group of the agreed transport time
/// (falling back to `created_at`).
pub fn category_weekday_crosstab(transports: &Table, holidays: &HolidayCalendar) -> Crosstab {
    Crosstab::from_pairs(transports.rows.iter().filter_map(|row| {
        let at = row_timestamp(row, "agreed_transport_datetime")
            .or_else(|| row_timestamp(row, "created_at"))?;
        Some((
            label_or(row, "krankenbeforderungsfahrt_kategorie", UNKNOWN_CATEGORY),
            WeekdayGroup::classify(at.date(), holidays),
        ))
    }))
}

// ═══════════════════════════════════════════════════════════════════════
// Weekday × hour heatmap
// ═══════════════════════════════════════════════════════════════════════

pub const WEEKDAY_NAMES: [&str; 7] = [
    "Montag",
    "Dienstag",
    "Mittwoch",
    "Donnerstag",
    "Freitag",
    "Samstag",
    "Sonntag",
];

/// Event counts by weekday (Monday first) and hour of day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Heatmap {
    pub weekdays: [&'static str; 7],
    pub counts: [[usize; 24]; 7],
}

impl Heatmap {
    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    /// Busiest hour summed over all weekdays; `None` when empty.
    pub fn peak_hour(&self) -> Option<(u32, usize)> {
        (0..24)
            .map(|h| (h as u32, self.counts.iter().map(|day| day[h]).sum::<usize>()))
            .filter(|(_, n)| *n > 0)
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
    }
}

/// 7 × 24 counts of the timestamps in `column`. Unparseable values are
/// skipped.
pub fn weekday_hour_heatmap(table: &Table, column: &str) -> Heatmap {
    let mut counts = [[0usize; 24]; 7];
    for at in table.column(column).filter_map(value_to_timestamp) {
        let day = at.weekday().num_days_from_monday() as usize;
        counts[day][at.hour() as usize] += 1;
    }
    Heatmap {
        weekdays: WEEKDAY_NAMES,
        counts,
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Process flow
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct StepStatistics {
    pub step: String,
    pub minutes: Summary,
}

/// Duration statistics of the status flow across transports.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessFlowReport {
    pub flow: StatusFlow,
    /// Transports present in the history.
    pub transports: usize,
    /// Transports that passed through the whole flow.
    pub complete: usize,
    pub steps: Vec<StepStatistics>,
    pub total_minutes: Option<Summary>,
}

/// Run [`status_flow_durations`] over a `TransportStatusHistory` table and
/// summarize each step.
pub fn process_flow_report(history: &Table, flow: &StatusFlow) -> ProcessFlowReport {
    let events = StatusEvent::from_table(history);
    let transports = events
        .iter()
        .map(|e| e.transport_id.as_str())
        .collect::<HashSet<_>>()
        .len();
    let durations = status_flow_durations(&events, flow);

    let steps = flow
        .step_labels()
        .into_iter()
        .enumerate()
        .filter_map(|(i, step)| {
            let values: Vec<f64> = durations.iter().map(|d| d.step_minutes[i]).collect();
            describe(&values).map(|minutes| StepStatistics { step, minutes })
        })
        .collect();
    let totals: Vec<f64> = durations.iter().map(|d| d.total_minutes).collect();

    ProcessFlowReport {
        flow: flow.clone(),
        transports,
        complete: durations.len(),
        steps,
        total_minutes: describe(&totals),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Special-rights drives (ETÜ)
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveKind {
    /// Alarm to arrival at the scene.
    Approach,
    /// Departure from the scene to arrival at the destination.
    Transport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Drive {
    pub mission: Value,
    pub vehicle: Value,
    pub kind: DriveKind,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub minutes: f64,
    pub special_rights: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DriveSummary {
    pub approaches: usize,
    pub approaches_with_special_rights: usize,
    pub transports: usize,
    pub transports_with_special_rights: usize,
    pub mean_approach_minutes: Option<f64>,
}

fn flag_set(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Number(n)) => n.as_f64() == Some(1.0),
        Some(Value::String(s)) => s.trim() == "1",
        Some(Value::Bool(b)) => *b,
        _ => false,
    }
}

/// Approach and transport drives of dispatch-centre records.
///
/// A drive is reported only when both of its timestamps parse. The
/// special-rights flag is `SOSI` for approaches and `SOSI_ZO` for
/// transports, set when equal to 1.
pub fn special_rights_drives(etu: &Table) -> (Vec<Drive>, DriveSummary) {
    let legs = [
        (DriveKind::Approach, "ALARMIERT", "ZEIT_AN_E", "SOSI"),
        (DriveKind::Transport, "ZEIT_AB_E", "ZEIT_AN_Z", "SOSI_ZO"),
    ];

    let mut drives = Vec::new();
    for row in &etu.rows {
        for (kind, from, to, flag) in legs {
            let (Some(start), Some(end)) = (row_timestamp(row, from), row_timestamp(row, to)) else {
                continue;
            };
            drives.push(Drive {
                mission: row.get("EINSATZ_NR").cloned().unwrap_or(Value::Null),
                vehicle: row.get("EINSATZMITTEL").cloned().unwrap_or(Value::Null),
                kind,
                start,
                end,
                minutes: (end - start).num_seconds() as f64 / 60.0,
                special_rights: flag_set(row.get(flag)),
            });
        }
    }

    let mut summary = DriveSummary::default();
    let mut approach_minutes = Vec::new();
    for d in &drives {
        match d.kind {
            DriveKind::Approach => {
                summary.approaches += 1;
                summary.approaches_with_special_rights += usize::from(d.special_rights);
                approach_minutes.push(d.minutes);
            }
            DriveKind::Transport => {
                summary.transports += 1;
                summary.transports_with_special_rights += usize::from(d.special_rights);
            }
        }
    }
    summary.mean_approach_minutes = describe(&approach_minutes).map(|s| s.mean);
    (drives, summary)
}

// ═══════════════════════════════════════════════════════════════════════
// Vehicle working time
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleWorkload {
    pub call_sign: String,
    pub missions: usize,
    /// Share of all missions of the selected vehicles, in percent.
    pub share_percent: f64,
    /// Distinct calendar days with a `Status1`.
    pub active_days: usize,
    /// Summed `Status1 → StatusEnd` time of missions with both timestamps.
    pub working_hours: f64,
}

/// Mission counts and working time per call sign of a `Details` table.
///
/// With an empty `call_signs` every call sign is reported, in first-seen
/// order; otherwise the listed ones in the given order.
pub fn vehicle_working_time(details: &Table, call_signs: &[String]) -> Vec<VehicleWorkload> {
    let mut order: Vec<String> = Vec::new();
    let mut by_sign: HashMap<String, Vec<&Row>> = HashMap::new();
    for row in &details.rows {
        let Some(Value::String(sign)) = row.get("callSign") else {
            continue;
        };
        if !call_signs.is_empty() && !call_signs.contains(sign) {
            continue;
        }
        by_sign
            .entry(sign.clone())
            .or_insert_with(|| {
                order.push(sign.clone());
                Vec::new()
            })
            .push(row);
    }
    if !call_signs.is_empty() {
        order = call_signs.to_vec();
    }

    let total: usize = by_sign.values().map(Vec::len).sum();
    order
        .into_iter()
        .map(|sign| {
            let rows = by_sign.get(&sign).map(Vec::as_slice).unwrap_or_default();
            let active_days = distinct_days(
                rows.iter()
                    .filter_map(|r| row_timestamp(r, "Status1"))
                    .map(|t| t.date()),
            );
            let working_hours = rows
                .iter()
                .filter_map(|r| Some((row_timestamp(r, "Status1")?, row_timestamp(r, "StatusEnd")?)))
                .map(|(start, end)| (end - start).num_seconds())
                .filter(|secs| *secs >= 0)
                .map(|secs| secs as f64 / 3600.0)
                .sum();
            VehicleWorkload {
                missions: rows.len(),
                share_percent: if total == 0 {
                    0.0
                } else {
                    rows.len() as f64 * 100.0 / total as f64
                },
                active_days,
                working_hours,
                call_sign: sign,
            }
        })
        .collect()
}

//! CLI report commands: category listing, table dumps, and the derived
//! analytics. Everything prints to stdout.

use anyhow::{bail, Result};
use serde::Serialize;
use serde_json::Value;

use ems_metrics_core::analytics::{
    category_weekday_crosstab, mission_type_crosstab, process_flow_report, special_rights_drives,
    vehicle_working_time, weekday_hour_heatmap, Crosstab,
};
use ems_metrics_core::classify::{analyze_freetexts, classify_requirements, classify_requirements_strict};
use ems_metrics_core::models::Table;
use ems_metrics_core::stats::Summary;
use ems_metrics_core::temporal::StatusFlow;

use crate::config::Config;
use crate::loader::{build_registry, LoadParams, Loader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CrosstabKind {
    /// `Details.missionType` by weekday group of `Status1`.
    MissionType,
    /// Partner transport category by weekday group.
    TransportCategory,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.replace(['\t', '\n'], " "),
        other => other.to_string(),
    }
}

/// Tab-separated rendering with a header line.
pub fn render_table(table: &Table) -> String {
    let mut out = table.columns.join("\t");
    out.push('\n');
    for row in &table.rows {
        let line: Vec<String> = table
            .columns
            .iter()
            .map(|c| row.get(c).map(cell).unwrap_or_default())
            .collect();
        out.push_str(&line.join("\t"));
        out.push('\n');
    }
    out
}

fn print_table(table: &Table, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&table.rows),
        OutputFormat::Table => {
            print!("{}", render_table(table));
            Ok(())
        }
    }
}

pub fn run_categories(config: &Config) -> Result<()> {
    let registry = build_registry(config)?;
    println!("{:<36} {:<12} {:<28} COLUMNS", "CATEGORY", "SOURCE", "COLLECTION");
    for info in registry.describe() {
        let source = serde_json::to_value(info.source)?;
        println!(
            "{:<36} {:<12} {:<28} {}",
            info.category,
            source.as_str().unwrap_or_default(),
            info.collection,
            info.columns.len()
        );
    }
    println!("\n{} categories", registry.len());
    Ok(())
}

pub async fn run_load(
    config: &Config,
    category: &str,
    params: LoadParams,
    format: OutputFormat,
) -> Result<()> {
    let loader = Loader::from_config(config).await?;
    let request = loader.request(&params)?;
    let table = loader.load(category, &request).await?;
    tracing::info!(category, rows = table.len(), "loaded");
    print_table(&table, format)
}

fn print_summary_line(label: &str, s: &Summary) {
    println!(
        "  {:<32} n={:<6} mean={:>8.1} median={:>8.1} q1={:>8.1} q3={:>8.1} min={:>8.1} max={:>8.1}",
        label, s.count, s.mean, s.median, s.q1, s.q3, s.min, s.max
    );
}

pub async fn run_process_flow(config: &Config, statuses: Option<Vec<String>>, format: OutputFormat) -> Result<()> {
    let flow = match statuses {
        None => StatusFlow::default(),
        Some(s) if s.len() >= 2 => StatusFlow {
            start: s[0].clone(),
            intermediates: s[1..s.len() - 1].to_vec(),
            terminal: s[s.len() - 1].clone(),
        },
        Some(_) => bail!("a status flow needs at least a start and a terminal status"),
    };

    let loader = Loader::from_config(config).await?;
    let request = loader.request(&LoadParams::default())?;
    let history = loader.load("TransportStatusHistory", &request).await?;
    let report = process_flow_report(&history, &flow);

    if format == OutputFormat::Json {
        return print_json(&report);
    }
    println!("process flow {}", flow.statuses().join(" → "));
    println!("  transports: {}", report.transports);
    println!("  complete flows: {}", report.complete);
    for step in &report.steps {
        print_summary_line(&step.step, &step.minutes);
    }
    if let Some(total) = &report.total_minutes {
        print_summary_line("total", total);
    }
    Ok(())
}

fn print_crosstab(ct: &Crosstab, header: &str, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(ct),
        OutputFormat::Table => {
            print!("{}", render_table(&ct.to_table("Crosstab", header)));
            Ok(())
        }
    }
}

pub async fn run_crosstab(
    config: &Config,
    kind: CrosstabKind,
    params: LoadParams,
    format: OutputFormat,
) -> Result<()> {
    let loader = Loader::from_config(config).await?;
    let request = loader.request(&params)?;
    let holidays = loader.holidays().await;
    match kind {
        CrosstabKind::MissionType => {
            let details = loader.load("Details", &request).await?;
            print_crosstab(&mission_type_crosstab(&details, &holidays), "missionType", format)
        }
        CrosstabKind::TransportCategory => {
            let transports = loader.load("Transports", &request).await?;
            print_crosstab(
                &category_weekday_crosstab(&transports, &holidays),
                "krankenbeforderungsfahrt_kategorie",
                format,
            )
        }
    }
}

pub async fn run_heatmap(config: &Config, category: &str, column: &str, params: LoadParams) -> Result<()> {
    let loader = Loader::from_config(config).await?;
    let request = loader.request(&params)?;
    let table = loader.load(category, &request).await?;
    if !table.has_column(column) {
        bail!("category {category} has no column {column}");
    }
    let heatmap = weekday_hour_heatmap(&table, column);

    let hours: Vec<String> = (0..24).map(|h| format!("{h:>3}")).collect();
    println!("{:<11}{}", "", hours.join(""));
    for (day, counts) in heatmap.weekdays.iter().zip(&heatmap.counts) {
        let line: Vec<String> = counts.iter().map(|n| format!("{n:>3}")).collect();
        println!("{:<11}{}", day, line.join(""));
    }
    if let Some((hour, n)) = heatmap.peak_hour() {
        println!("\npeak hour: {hour:02}:00 ({n} events)");
    }
    Ok(())
}

pub async fn run_drives(config: &Config, format: OutputFormat) -> Result<()> {
    let loader = Loader::from_config(config).await?;
    let request = loader.request(&LoadParams::default())?;
    let etu = loader.load("ETÜ", &request).await?;
    let (drives, summary) = special_rights_drives(&etu);

    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({ "summary": summary, "drives": drives }));
    }
    println!("special-rights drives");
    println!(
        "  approaches: {} ({} with special rights)",
        summary.approaches, summary.approaches_with_special_rights
    );
    println!(
        "  transports: {} ({} with special rights)",
        summary.transports, summary.transports_with_special_rights
    );
    match summary.mean_approach_minutes {
        Some(m) => println!("  mean approach: {m:.1} min"),
        None => println!("  mean approach: -"),
    }
    Ok(())
}

pub async fn run_vehicles(
    config: &Config,
    call_signs: Vec<String>,
    params: LoadParams,
    format: OutputFormat,
) -> Result<()> {
    let loader = Loader::from_config(config).await?;
    let request = loader.request(&params)?;
    let details = loader.load("Details", &request).await?;
    let workload = vehicle_working_time(&details, &call_signs);

    if format == OutputFormat::Json {
        return print_json(&workload);
    }
    println!("{:<16} {:>8} {:>8} {:>6} {:>10}", "CALL SIGN", "MISSIONS", "SHARE%", "DAYS", "HOURS");
    for w in &workload {
        println!(
            "{:<16} {:>8} {:>8.1} {:>6} {:>10.1}",
            w.call_sign, w.missions, w.share_percent, w.active_days, w.working_hours
        );
    }
    Ok(())
}

/// Classify one text, printing both the keyword and the exact-sentence
/// assessment.
pub fn run_classify_text(text: &str) -> Result<()> {
    print_json(&serde_json::json!({
        "keyword": classify_requirements(Some(text)),
        "strict": classify_requirements_strict(Some(text)),
    }))
}

/// Classify every stored free text.
pub async fn run_classify_freetexts(config: &Config, params: LoadParams, format: OutputFormat) -> Result<()> {
    let loader = Loader::from_config(config).await?;
    let request = loader.request(&params)?;
    let freetexts = loader.load("Freetext", &request).await?;
    print_table(&analyze_freetexts(&freetexts, None), format)
}

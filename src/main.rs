//! # EMS metrics CLI (`emx`)
//!
//! ## Usage
//!
//! ```bash
//! emx --config ./config/emx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `emx init` | Create the SQLite database and run schema migrations |
//! | `emx import <collection> <file>` | Load a JSON / JSON Lines export into a collection |
//! | `emx categories` | List registered categories |
//! | `emx load <category>` | Print a normalized category table |
//! | `emx process-flow` | Status-flow duration statistics of partner transports |
//! | `emx crosstab` | Weekday-group cross tabulation |
//! | `emx heatmap <category> <column>` | Weekday × hour counts of a timestamp column |
//! | `emx drives` | Special-rights drive summary from dispatch-centre records |
//! | `emx vehicles` | Missions and working time per call sign |
//! | `emx classify [text]` | Transport-requirement classification |
//! | `emx serve` | Start the reporting HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! emx init
//! emx import protocols_findings ./exports/protocols_findings.jsonl
//! emx load GCS --start-year 2023 --end-year 2024 --format table
//! emx load Medikamente --med-name heparin
//! emx crosstab --by mission-type --start-year 2024
//! emx serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use ems_metrics::loader::LoadParams;
use ems_metrics::report::{self, CrosstabKind, OutputFormat};
use ems_metrics::{config, import, migrate, server};

/// EMS metrics: record normalization and reporting over emergency medical
/// services operations data.
#[derive(Parser)]
#[command(name = "emx", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/emx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Restriction shared by the table-producing commands.
#[derive(clap::Args, Debug)]
struct Scope {
    /// Maximum number of source documents per query.
    #[arg(long)]
    limit: Option<usize>,

    /// First mission year (inclusive).
    #[arg(long)]
    start_year: Option<i32>,

    /// Last mission year (inclusive).
    #[arg(long)]
    end_year: Option<i32>,
}

impl Scope {
    fn params(self, med_name: Option<String>) -> LoadParams {
        LoadParams {
            limit: self.limit,
            med_name,
            start_year: self.start_year,
            end_year: self.end_year,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Import a JSON array or JSON Lines export into a collection.
    Import {
        /// Target collection, e.g. `protocols_findings` or `vitals_hf`.
        collection: String,
        file: PathBuf,
        /// Remove the collection's existing documents first.
        #[arg(long)]
        replace: bool,
    },

    /// List registered categories with their source and column count.
    Categories,

    /// Load and print one category.
    Load {
        category: String,
        #[command(flatten)]
        scope: Scope,
        /// Medication name filter (`Medikamente` only).
        #[arg(long)]
        med_name: Option<String>,
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Status-flow durations of partner transports.
    ProcessFlow {
        /// Comma-separated statuses, start first and terminal last.
        #[arg(long, value_delimiter = ',')]
        flow: Option<Vec<String>>,
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Cross tabulation by weekday group (Mo-Do, Fr, Sa, So, holidays).
    Crosstab {
        #[arg(long, value_enum, default_value = "mission-type")]
        by: CrosstabKind,
        #[command(flatten)]
        scope: Scope,
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Weekday × hour counts of a timestamp column.
    Heatmap {
        category: String,
        column: String,
        #[command(flatten)]
        scope: Scope,
    },

    /// Approach and transport drives with special rights.
    Drives {
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Missions and working time per call sign.
    Vehicles {
        /// Call signs to report; all when omitted.
        #[arg(long = "call-sign")]
        call_signs: Vec<String>,
        #[command(flatten)]
        scope: Scope,
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Classify a transport-requirement text, or all stored free texts.
    Classify {
        /// Text to classify. Without it, stored free texts are classified.
        text: Option<String>,
        #[command(flatten)]
        scope: Scope,
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Start the reporting HTTP API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Classifying a literal text needs no configuration.
    if let Commands::Classify { text: Some(text), .. } = &cli.command {
        return report::run_classify_text(text);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import {
            collection,
            file,
            replace,
        } => {
            import::run_import(&cfg, &collection, &file, replace).await?;
        }
        Commands::Categories => {
            report::run_categories(&cfg)?;
        }
        Commands::Load {
            category,
            scope,
            med_name,
            format,
        } => {
            report::run_load(&cfg, &category, scope.params(med_name), format).await?;
        }
        Commands::ProcessFlow { flow, format } => {
            report::run_process_flow(&cfg, flow, format).await?;
        }
        Commands::Crosstab { by, scope, format } => {
            report::run_crosstab(&cfg, by, scope.params(None), format).await?;
        }
        Commands::Heatmap {
            category,
            column,
            scope,
        } => {
            report::run_heatmap(&cfg, &category, &column, scope.params(None)).await?;
        }
        Commands::Drives { format } => {
            report::run_drives(&cfg, format).await?;
        }
        Commands::Vehicles {
            call_signs,
            scope,
            format,
        } => {
            report::run_vehicles(&cfg, call_signs, scope.params(None), format).await?;
        }
        Commands::Classify { text, scope, format } => match text {
            Some(text) => report::run_classify_text(&text)?,
            None => report::run_classify_freetexts(&cfg, scope.params(None), format).await?,
        },
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

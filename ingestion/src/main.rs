//! covid-ingest CLI - retrieve, normalize and save public COVID-19 datasets
//!
//! # Main Commands
//!
//! ```bash
//! covid-ingest run --config config/ingest.toml   # Run every configured pipeline
//! covid-ingest merge states --output data        # Build the merged state table
//! covid-ingest merge lga --output data           # Build the merged NSW LGA table
//! ```
//!
//! # Debug Commands
//!
//! ```bash
//! covid-ingest validate config/ingest.toml       # Validate a configuration file
//! covid-ingest sources                           # List modules and their options
//! covid-ingest parse input.csv                   # Parse a CSV file to JSON
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use covid_ingest::{
    load_configuration, parse_csv_file_auto, retrieve_and_merge, run_configuration, Context,
    Covid19File, MergePreset, NswResource, PipelineError, SinkConfig, SinkKind, SinkMode,
    SourceConfig, VaxCollection,
};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "covid-ingest")]
#[command(about = "Retrieve, normalize, validate and save public COVID-19 datasets", long_about = None)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipelines listed in a configuration file
    Run {
        /// Configuration file (.toml, .json, .yaml or .yml)
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Process a preset's sources, save each, then save the merged table
    Merge {
        /// Which merged table to build
        #[arg(value_enum)]
        preset: Preset,

        /// Sink type
        #[arg(long, value_enum, default_value = "csv")]
        sink: SinkArg,

        /// Name prefix: output directory for CSV, table prefix (ending in `_`) for SQL
        #[arg(short, long, default_value = "")]
        output: String,

        /// What to do with existing targets
        #[arg(long, value_enum, default_value = "replace")]
        mode: ModeArg,

        /// Environment variable holding the database URL
        #[arg(long, default_value = "POSTGRESQL")]
        uri_env: String,
    },

    /// Validate a configuration file without running it
    Validate {
        /// Configuration file (.toml, .json, .yaml or .yml)
        config: PathBuf,
    },

    /// List source modules and their accepted options
    Sources,

    /// Parse a CSV file and output JSON records
    Parse {
        /// Input CSV file
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Preset {
    States,
    Lga,
}

#[derive(Clone, Copy, ValueEnum)]
enum SinkArg {
    Csv,
    Postgres,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Fail,
    Replace,
    Append,
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(if cli.debug { "debug" } else { "info" });

    match execute(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute(command: Commands) -> Result<(), PipelineError> {
    match command {
        Commands::Run { config } => {
            let entries = load_configuration(&config)?;
            info!("Loaded {} pipelines from {}", entries.len(), config.display());
            let ctx = Context::new()?;
            for summary in run_configuration(&entries, &ctx).await? {
                match &summary.saved {
                    Some(report) => info!(
                        "{}: {} rows retrieved, {} saved to {}",
                        summary.source, summary.rows_retrieved, report.rows, report.location
                    ),
                    None => info!(
                        "{}: {} rows retrieved, {} processed, not saved",
                        summary.source, summary.rows_retrieved, summary.rows_processed
                    ),
                }
            }
        }

        Commands::Merge { preset, sink, output, mode, uri_env } => {
            let preset = match preset {
                Preset::States => MergePreset::states(),
                Preset::Lga => MergePreset::lga(),
            };
            let sink = SinkConfig {
                kind: match sink {
                    SinkArg::Csv => SinkKind::Csv,
                    SinkArg::Postgres => SinkKind::Postgres,
                },
                name: output,
                mode: match mode {
                    ModeArg::Fail => SinkMode::Fail,
                    ModeArg::Replace => SinkMode::Replace,
                    ModeArg::Append => SinkMode::Append,
                },
                chunksize: None,
                uri_env,
            };
            let ctx = Context::new()?;
            for report in retrieve_and_merge(&preset, &sink, &ctx).await? {
                info!("Saved {} rows to {}", report.rows, report.location);
            }
        }

        Commands::Validate { config } => {
            let entries = load_configuration(&config)?;
            for (i, entry) in entries.iter().enumerate() {
                println!(
                    "{:>3}. {:<16} {:?} -> {}",
                    i + 1,
                    entry.source.module(),
                    entry.source,
                    entry.sink_name().unwrap_or("<no sink>")
                );
            }
            println!("{} pipelines OK", entries.len());
        }

        Commands::Sources => print_sources(),

        Commands::Parse { input, output } => {
            let parsed = parse_csv_file_auto(&input)?;
            info!(
                "Parsed {} rows (encoding {}, delimiter {:?})",
                parsed.table.len(),
                parsed.encoding,
                parsed.delimiter
            );
            let json = serde_json::to_string_pretty(parsed.table.rows())?;
            match output {
                Some(path) => fs::write(&path, json)?,
                None => println!("{}", json),
            }
        }
    }
    Ok(())
}

fn print_sources() {
    println!("Source modules:\n");
    for module in SourceConfig::MODULES {
        let (key, values): (&str, Vec<&str>) = match module {
            "covid19data" => ("filename", Covid19File::ALL.iter().map(|v| v.as_str()).collect()),
            "nsw_government" => (
                "resource_type",
                NswResource::ALL.iter().map(|v| v.as_str()).collect(),
            ),
            _ => ("collection", VaxCollection::ALL.iter().map(|v| v.as_str()).collect()),
        };
        println!("  {}", module);
        for v in values {
            println!("      {} = \"{}\"", key, v);
        }
    }
    println!("\nMerge presets: {}", MergePreset::NAMES.join(", "));
}

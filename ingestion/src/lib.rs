//! # covid-ingest - public COVID-19 data pipelines
//!
//! Retrieves Australian COVID-19 datasets (case and death counts, NSW tests
//! and cases by location, vaccination uptake), normalizes them into one
//! tabular shape, validates them and saves them to CSV files or SQL tables
//! for a dashboard.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Source    │────▶│   Process   │────▶│    Keys     │────▶│  Validate   │────▶│    Sink     │
//! │ (CSV / SQL  │     │  (rename,   │     │ (dims id,   │     │ (JSON       │     │ (CSV file / │
//! │  API / xlsx)│     │   count)    │     │  diffs)     │     │  Schema)    │     │  SQL table) │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use covid_ingest::{load_configuration, run_configuration, Context};
//!
//! #[tokio::main]
//! async fn main() {
//!     let entries = load_configuration("config/ingest.toml".as_ref()).unwrap();
//!     run_configuration(&entries, &Context::new().unwrap()).await.unwrap();
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`config`] - Pipeline configuration files
//! - [`models`] - States, age groups, sex labels
//! - [`table`] - The common tabular shape, keys and diffs
//! - [`parser`] - CSV parsing with encoding detection
//! - [`sources`] - Source adapters
//! - [`validation`] - JSON Schema validation
//! - [`sink`] - CSV and SQL sinks
//! - [`pipeline`] - Single pipelines and merged tables

// Core modules
pub mod error;
pub mod models;

// Configuration
pub mod config;

// Data
pub mod parser;
pub mod table;

// Sources
pub mod sources;

// Validation
pub mod validation;

// Output
pub mod sink;

// Orchestration
pub mod pipeline;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError, CsvError, ExcelError, FetchError, PipelineError, PipelineResult, SinkError,
    TableError, ValidationError,
};

// =============================================================================
// Re-exports - Configuration
// =============================================================================

pub use config::{
    load_configuration, Covid19File, IngestConfig, NswResource, SinkConfig, SinkKind, SinkMode,
    SourceConfig, VaxCollection,
};

// =============================================================================
// Re-exports - Models and tables
// =============================================================================

pub use models::{AgeGroup, State, COUNTRY};
pub use table::{JoinKind, Record, Table};

// =============================================================================
// Re-exports - CSV Parsing
// =============================================================================

pub use parser::{
    decode_content, detect_delimiter, detect_encoding, parse_bytes_auto, parse_csv,
    parse_csv_file_auto, ParseResult,
};

// =============================================================================
// Re-exports - Sources
// =============================================================================

pub use sources::{Context, DataSource, HttpClient, Source};

// =============================================================================
// Re-exports - Validation
// =============================================================================

pub use validation::{infer_schema, is_valid, validate, validate_table};

// =============================================================================
// Re-exports - Sinks and pipelines
// =============================================================================

pub use pipeline::merge::{retrieve_and_merge, MergePreset};
pub use pipeline::{run_configuration, run_pipelines, Ingest, IngestSummary};
pub use sink::SaveReport;

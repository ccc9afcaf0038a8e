//! Error types for the ingestion pipeline.
//!
//! Each layer owns one error enum:
//!
//! - [`ConfigError`] - Configuration file loading and validation
//! - [`FetchError`] - HTTP retrieval from remote sources
//! - [`CsvError`] - CSV decoding and parsing
//! - [`ExcelError`] - Spreadsheet attachment parsing
//! - [`TableError`] - Tabular operations (missing columns, bad values)
//! - [`ValidationError`] - Schema validation
//! - [`SinkError`] - CSV and SQL writers
//! - [`PipelineError`] - Top-level orchestration
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use std::path::PathBuf;

use thiserror::Error;

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors while loading pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML syntax or shape error.
    #[error("Invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON syntax or shape error.
    #[error("Invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML syntax or shape error.
    #[error("Invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// File extension is not `.toml`, `.json`, `.yaml` or `.yml`.
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// Unknown source module.
    #[error("Unknown source module '{0}'")]
    UnknownModule(String),

    /// A field is present but its value is not allowed.
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    /// A required environment variable is not set.
    #[error("Environment variable {0} is not set")]
    MissingEnv(String),
}

// =============================================================================
// Fetch Errors
// =============================================================================

/// Errors while retrieving data over HTTP.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level failure.
    #[error("HTTP request to {url} failed: {message}")]
    Request { url: String, message: String },

    /// Server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    /// Response body could not be decoded.
    #[error("Invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    /// The SQL API reported a failure.
    #[error("Datastore query failed: {0}")]
    Api(String),

    /// A truncated page returned nothing new, so paging cannot advance.
    #[error("Pagination stalled on '{field}' at '{value}'")]
    PaginationStalled { field: String, value: String },

    /// A listing page did not contain the expected markup.
    #[error("Expected markup not found: {0}")]
    MarkupNotFound(String),

    /// A link could not be resolved to an absolute URL.
    #[error("Invalid URL '{href}' (base {base}): {message}")]
    InvalidUrl {
        base: String,
        href: String,
        message: String,
    },
}

// =============================================================================
// CSV Errors
// =============================================================================

/// Errors during CSV parsing.
#[derive(Debug, Error)]
pub enum CsvError {
    /// Failed to read file.
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid CSV format.
    #[error("Invalid CSV format: {0}")]
    ParseError(#[from] csv::Error),

    /// Empty file.
    #[error("CSV file is empty")]
    EmptyFile,

    /// No headers found.
    #[error("No headers found in CSV")]
    NoHeaders,
}

// =============================================================================
// Excel Errors
// =============================================================================

/// Errors while reading spreadsheet attachments.
#[derive(Debug, Error)]
pub enum ExcelError {
    /// Workbook could not be opened.
    #[error("Cannot open workbook: {0}")]
    Open(String),

    /// Workbook has no worksheet.
    #[error("Workbook has no worksheet")]
    NoSheet,

    /// Header row index is past the end of the sheet.
    #[error("Header row {0} is past the end of the sheet")]
    MissingHeader(usize),

    /// Link does not carry a publication date.
    #[error("No date found in link '{0}'")]
    NoDate(String),
}

// =============================================================================
// Table Errors
// =============================================================================

/// Errors from tabular operations.
#[derive(Debug, Error)]
pub enum TableError {
    /// A referenced column does not exist.
    #[error("Missing column: {0}")]
    MissingColumn(String),

    /// A value could not be interpreted.
    #[error("Invalid value in column '{column}': {message}")]
    InvalidValue { column: String, message: String },
}

// =============================================================================
// Validation Errors
// =============================================================================

/// Errors during schema validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The schema itself is not valid JSON Schema.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// One or more rows failed validation.
    #[error("{invalid} of {total} rows failed validation (first: {})", first_error(.rows))]
    Rows {
        invalid: usize,
        total: usize,
        rows: Vec<(usize, Vec<String>)>,
    },
}

fn first_error(rows: &[(usize, Vec<String>)]) -> String {
    rows.first()
        .map(|(i, errs)| format!("row {}: {}", i, errs.join("; ")))
        .unwrap_or_default()
}

// =============================================================================
// Sink Errors
// =============================================================================

/// Errors while writing a table to its sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Filesystem failure.
    #[error("Sink IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV writer failure.
    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),

    /// Database failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Target exists and the mode is `fail`.
    #[error("Sink target '{0}' already exists")]
    AlreadyExists(String),

    /// Database URL is missing.
    #[error("Database URL not configured: {0}")]
    Config(#[from] ConfigError),
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level pipeline orchestration errors.
///
/// This is the error type returned by [`crate::pipeline::Ingest::run`] and the
/// merge entry points. It wraps all lower-level errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Retrieval error.
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// CSV parsing error.
    #[error("CSV error: {0}")]
    Csv(#[from] CsvError),

    /// Spreadsheet parsing error.
    #[error("Excel error: {0}")]
    Excel(#[from] ExcelError),

    /// Tabular operation error.
    #[error("Table error: {0}")]
    Table(#[from] TableError),

    /// Validation error.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Sink error.
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Nothing was retrieved.
    #[error("Source '{0}' returned no records")]
    EmptyInput(String),

    /// Output could not be written.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON output could not be produced.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for HTTP retrieval.
pub type FetchResult<T> = Result<T, FetchError>;

/// Result type for CSV operations.
pub type CsvResult<T> = Result<T, CsvError>;

/// Result type for table operations.
pub type TableResult<T> = Result<T, TableError>;

/// Result type for sink operations.
pub type SinkResult<T> = Result<T, SinkError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

//! Retrieve, process, key, validate and save one configured source.
//!
//! ```text
//! retrieve ──▶ process ──▶ dimensions_id / diffs ──▶ validate ──▶ save
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use covid_ingest::{load_configuration, run_configuration, Context};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let entries = load_configuration(Path::new("config/ingest.toml"))?;
//!     let summaries = run_configuration(&entries, &Context::new()?).await?;
//!     println!("{} pipelines done", summaries.len());
//!     Ok(())
//! }
//! ```

pub mod merge;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{IngestConfig, SinkConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::sink::{self, SaveReport};
use crate::sources::{Context, DataSource, Source};
use crate::table::{sanitize_column_name, Table};
use crate::validation::{infer_schema, validate_table, validate_table_str};

/// Column the diff columns are ordered by.
pub const DATE_COLUMN: &str = "date";

/// What one pipeline did.
#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub source: &'static str,
    pub rows_retrieved: usize,
    pub rows_processed: usize,
    pub saved: Option<SaveReport>,
}

/// Add `dimensions_id` and the source's diff columns.
pub fn add_keys<S: Source>(source: &S, table: &mut Table) {
    let dimensions = source.dimensions();
    table.with_dimensions_id(dimensions);

    let measures: Vec<String> = source
        .diff_measures()
        .iter()
        .map(|m| sanitize_column_name(m))
        .collect();
    if !measures.is_empty() {
        let measures: Vec<&str> = measures.iter().map(String::as_str).collect();
        table.with_diff_columns(dimensions, DATE_COLUMN, &measures);
    }
}

/// Validate against the source's schema, or an inferred one.
pub fn validate<S: Source>(source: &S, table: &Table) -> PipelineResult<()> {
    match source.schema() {
        Some(schema) => validate_table_str(table, schema)?,
        None => {
            warn!("No schema for {}, inferring one", source.name());
            validate_table(table, &infer_schema(table))?
        }
    }
    info!("Validated {} rows", table.len());
    Ok(())
}

/// Retrieve and process, returning the raw row count and the processed table.
pub async fn retrieve_processed<S: Source>(
    source: &S,
    ctx: &Context,
) -> PipelineResult<(usize, Table)> {
    info!("Retrieving {}", source.name());
    let raw = source.retrieve(ctx).await?;
    if raw.is_empty() {
        return Err(PipelineError::EmptyInput(source.name().to_string()));
    }
    let retrieved = raw.len();
    info!("Retrieved {} rows", retrieved);

    let processed = source.process(ctx, raw).await?;
    info!("Processed into {} rows", processed.len());
    Ok((retrieved, processed))
}

/// Run the whole chain for `source`.
pub async fn run_source<S: Source>(
    source: &S,
    sink: Option<&SinkConfig>,
    ctx: &Context,
) -> PipelineResult<IngestSummary> {
    let (rows_retrieved, mut table) = retrieve_processed(source, ctx).await?;
    add_keys(source, &mut table);
    validate(source, &table)?;

    let rows_processed = table.len();
    let saved = match sink {
        Some(sink) => Some(sink::save(table, sink).await?),
        None => {
            warn!("No sink configured for {}, skipping save", source.name());
            None
        }
    };

    Ok(IngestSummary {
        source: source.name(),
        rows_retrieved,
        rows_processed,
        saved,
    })
}

/// One configured pipeline.
#[derive(Debug, Clone)]
pub struct Ingest {
    source: DataSource,
    sink: Option<SinkConfig>,
}

impl Ingest {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            source: DataSource::from(&config.source),
            sink: config.sink.clone(),
        }
    }

    pub fn source(&self) -> &DataSource {
        &self.source
    }

    pub async fn run(&self, ctx: &Context) -> PipelineResult<IngestSummary> {
        run_source(&self.source, self.sink.as_ref(), ctx).await
    }
}

/// Run every entry in order, stopping at the first failure.
pub async fn run_configuration(
    entries: &[IngestConfig],
    ctx: &Context,
) -> PipelineResult<Vec<IngestSummary>> {
    let pipelines: Vec<(DataSource, Option<SinkConfig>)> = entries
        .iter()
        .map(|e| (DataSource::from(&e.source), e.sink.clone()))
        .collect();
    run_pipelines(&pipelines, ctx).await
}

/// Run `(source, sink)` pairs in order; the first error ends the run.
pub async fn run_pipelines<S: Source>(
    pipelines: &[(S, Option<SinkConfig>)],
    ctx: &Context,
) -> PipelineResult<Vec<IngestSummary>> {
    let mut summaries = Vec::with_capacity(pipelines.len());
    for (i, (source, sink)) in pipelines.iter().enumerate() {
        info!(
            "Pipeline {}/{}: {} -> {}",
            i + 1,
            pipelines.len(),
            source.name(),
            sink.as_ref().map(|s| s.name.as_str()).unwrap_or("<no sink>")
        );
        summaries.push(run_source(source, sink.as_ref(), ctx).await?);
    }
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SinkMode, SourceConfig, VaxCollection};
    use crate::error::ValidationError;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves a fixed table.
    struct Fixed {
        rows: Vec<Value>,
        schema: Option<&'static str>,
        retrieved: AtomicUsize,
    }

    impl Fixed {
        fn new(rows: Vec<Value>, schema: Option<&'static str>) -> Self {
            Self {
                rows,
                schema,
                retrieved: AtomicUsize::new(0),
            }
        }
    }

    impl Source for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn dimensions(&self) -> &'static [&'static str] {
            &["date", "lga_name"]
        }

        fn diff_measures(&self) -> &'static [&'static str] {
            &["vax_1_dose_15+"]
        }

        fn schema(&self) -> Option<&'static str> {
            self.schema
        }

        async fn retrieve(&self, _ctx: &Context) -> PipelineResult<Table> {
            self.retrieved.fetch_add(1, Ordering::SeqCst);
            Ok(Table::from_values(self.rows.clone()))
        }

        async fn process(&self, _ctx: &Context, mut raw: Table) -> PipelineResult<Table> {
            raw.sanitize_column_names();
            Ok(raw)
        }
    }

    fn rows() -> Vec<Value> {
        vec![
            json!({ "date": "2021-10-13", "lga_name": "Albury (C)", "vax_1_dose_15+": 40850 }),
            json!({ "date": "2021-10-06", "lga_name": "Albury (C)", "vax_1_dose_15+": 40000 }),
            json!({ "date": "2021-10-06", "lga_name": "Sydney (C)", "vax_1_dose_15+": 150000 }),
        ]
    }

    #[tokio::test]
    async fn test_run_source_saves_keyed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SinkConfig::csv(dir.path().join("fixed").to_string_lossy());
        let source = Fixed::new(rows(), None);
        let ctx = Context::new().unwrap();

        let summary = run_source(&source, Some(&sink), &ctx).await.unwrap();
        assert_eq!(summary.rows_retrieved, 3);
        assert_eq!(summary.rows_processed, 3);

        let saved = crate::parser::parse_csv_file_auto(dir.path().join("fixed.csv")).unwrap();
        let t = saved.table;
        assert!(t.has_column("dimensions_id"));
        assert!(t.has_column("saved_date"));
        let latest = t.rows().iter().find(|r| r["date"] == "2021-10-13").unwrap();
        assert_eq!(latest["vax_1_dose_15_diff"], 850);
    }

    #[tokio::test]
    async fn test_run_without_sink() {
        let source = Fixed::new(rows(), None);
        let summary = run_source(&source, None, &Context::new().unwrap()).await.unwrap();
        assert!(summary.saved.is_none());
    }

    #[tokio::test]
    async fn test_empty_input_is_an_error() {
        let source = Fixed::new(vec![], None);
        let err = run_source(&source, None, &Context::new().unwrap()).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmptyInput(_)));
    }

    #[tokio::test]
    async fn test_schema_failure_stops_before_save() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = SinkConfig::csv(dir.path().join("never").to_string_lossy());
        sink.mode = SinkMode::Fail;
        let schema = r#"{ "type": "object", "properties": { "vax_1_dose_15": { "maximum": 100000 } } }"#;
        let source = Fixed::new(rows(), Some(schema));

        let err = run_source(&source, Some(&sink), &Context::new().unwrap()).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::Rows { invalid: 1, .. })
        ));
        assert!(!dir.path().join("never.csv").exists());
    }

    #[tokio::test]
    async fn test_run_pipelines_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let first = SinkConfig::csv(dir.path().join("first").to_string_lossy());
        let last = SinkConfig::csv(dir.path().join("last").to_string_lossy());
        let pipelines = vec![
            (Fixed::new(rows(), None), Some(first)),
            (Fixed::new(vec![], None), None),
            (Fixed::new(rows(), None), Some(last)),
        ];

        let err = run_pipelines(&pipelines, &Context::new().unwrap()).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmptyInput(_)));

        let retrieved: Vec<usize> = pipelines
            .iter()
            .map(|(s, _)| s.retrieved.load(Ordering::SeqCst))
            .collect();
        assert_eq!(retrieved, [1, 1, 0]);
        assert!(dir.path().join("first.csv").exists());
        assert!(!dir.path().join("last.csv").exists());
    }

    #[tokio::test]
    async fn test_run_pipelines_summaries_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let pipelines = vec![
            (Fixed::new(rows(), None), Some(SinkConfig::csv(dir.path().join("a").to_string_lossy()))),
            (Fixed::new(rows()[..1].to_vec(), None), None),
        ];
        let summaries = run_pipelines(&pipelines, &Context::new().unwrap()).await.unwrap();
        let counts: Vec<usize> = summaries.iter().map(|s| s.rows_retrieved).collect();
        assert_eq!(counts, [3, 1]);
        assert!(summaries[0].saved.is_some());
        assert!(summaries[1].saved.is_none());
    }

    #[test]
    fn test_ingest_from_config() {
        let ingest = Ingest::new(&IngestConfig {
            source: SourceConfig::Vaccinations { collection: VaxCollection::VaccinationData },
            sink: None,
        });
        assert_eq!(ingest.source().name(), "covid_au_vaccination_data");
    }
}

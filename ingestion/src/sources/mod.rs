//! Source adapters.
//!
//! Each adapter knows how to fetch one upstream dataset and reshape it into
//! the common [`Table`] form. The [`DataSource`] enum dispatches over the
//! configured adapter.

pub mod covid19data;
pub mod excel;
pub mod html;
pub mod http;
pub mod nsw_government;
pub mod vaccinations;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::future::Future;
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::{NswResource, SourceConfig};
use crate::error::{FetchResult, PipelineResult, TableError, TableResult};
use crate::table::Table;

pub use covid19data::Covid19DataSource;
pub use http::HttpClient;
pub use nsw_government::NswGovSource;
pub use vaccinations::VaxSource;

/// Date layouts seen upstream, tried in order.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y"];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"];

/// State shared by the sources of one run.
pub struct Context {
    pub http: HttpClient,
    lga_lhd_map: OnceCell<Table>,
}

impl Context {
    pub fn new() -> FetchResult<Self> {
        Ok(Self::with_client(HttpClient::new()?))
    }

    pub fn with_client(http: HttpClient) -> Self {
        Self {
            http,
            lga_lhd_map: OnceCell::new(),
        }
    }

    /// LGA to LHD lookup, retrieved from NSW cases-by-location on first use.
    pub async fn lga_lhd_map(&self) -> PipelineResult<&Table> {
        self.lga_lhd_map_with(|| async {
            let source = NswGovSource::new(NswResource::CasesByLocation);
            let raw = source.retrieve(self).await?;
            let cases = source.process(self, raw).await?;
            nsw_government::lga_lhd_map(&cases)
        })
        .await
    }

    /// The cached LGA to LHD lookup, built by `load` unless already present.
    /// A failed load is not cached.
    pub async fn lga_lhd_map_with<F, Fut>(&self, load: F) -> PipelineResult<&Table>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PipelineResult<Table>>,
    {
        self.lga_lhd_map
            .get_or_try_init(|| async {
                info!("Building LGA to LHD map");
                load().await
            })
            .await
    }
}

/// A dataset adapter.
#[allow(async_fn_in_trait)]
pub trait Source {
    /// Table name the processed data is known by.
    fn name(&self) -> &'static str;

    /// Columns identifying a row; hashed into `dimensions_id`.
    fn dimensions(&self) -> &'static [&'static str];

    /// Measures that get a `_diff` column.
    fn diff_measures(&self) -> &'static [&'static str] {
        &[]
    }

    /// Embedded JSON Schema for processed rows, if any.
    fn schema(&self) -> Option<&'static str> {
        None
    }

    /// Fetch the raw upstream data.
    async fn retrieve(&self, ctx: &Context) -> PipelineResult<Table>;

    /// Reshape raw data into the published form.
    async fn process(&self, ctx: &Context, raw: Table) -> PipelineResult<Table>;
}

/// The configured adapter.
#[derive(Debug, Clone)]
pub enum DataSource {
    Covid19Data(Covid19DataSource),
    NswGovernment(NswGovSource),
    Vaccinations(VaxSource),
}

impl From<&SourceConfig> for DataSource {
    fn from(config: &SourceConfig) -> Self {
        match config {
            SourceConfig::Covid19Data { filename } => {
                Self::Covid19Data(Covid19DataSource::new(*filename))
            }
            SourceConfig::NswGovernment { resource_type } => {
                Self::NswGovernment(NswGovSource::new(*resource_type))
            }
            SourceConfig::Vaccinations { collection } => {
                Self::Vaccinations(VaxSource::new(*collection))
            }
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $s:ident => $e:expr) => {
        match $self {
            DataSource::Covid19Data($s) => $e,
            DataSource::NswGovernment($s) => $e,
            DataSource::Vaccinations($s) => $e,
        }
    };
}

impl Source for DataSource {
    fn name(&self) -> &'static str {
        dispatch!(self, s => s.name())
    }

    fn dimensions(&self) -> &'static [&'static str] {
        dispatch!(self, s => s.dimensions())
    }

    fn diff_measures(&self) -> &'static [&'static str] {
        dispatch!(self, s => s.diff_measures())
    }

    fn schema(&self) -> Option<&'static str> {
        dispatch!(self, s => s.schema())
    }

    async fn retrieve(&self, ctx: &Context) -> PipelineResult<Table> {
        dispatch!(self, s => s.retrieve(ctx).await)
    }

    /// Adapter processing, then column names made SQL-safe.
    async fn process(&self, ctx: &Context, raw: Table) -> PipelineResult<Table> {
        let mut table = dispatch!(self, s => s.process(ctx, raw).await)?;
        table.sanitize_column_names();
        Ok(table)
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(text, f).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
                .map(|dt| dt.date())
        })
}

/// Rewrite `column` as `YYYY-MM-DD` strings. Nulls stay null.
pub fn normalize_date_column(table: &mut Table, column: &str) -> TableResult<()> {
    if !table.has_column(column) {
        return Ok(());
    }
    table.map_column(column, |v| match v {
        Value::Null => Ok(Value::Null),
        Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
        Value::String(s) => parse_date(s)
            .map(|d| Value::from(d.format("%Y-%m-%d").to_string()))
            .ok_or_else(|| TableError::InvalidValue {
                column: column.to_string(),
                message: format!("unrecognised date '{}'", s),
            }),
        other => Err(TableError::InvalidValue {
            column: column.to_string(),
            message: format!("expected a date, got {}", other),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Covid19File, VaxCollection};
    use crate::error::FetchError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_lga_lhd_map_built_once() {
        let ctx = Context::new().unwrap();
        let counter = AtomicUsize::new(0);
        let loads = &counter;
        let load = move || async move {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(Table::from_values(vec![
                json!({ "lhd_code": "X700", "lhd_name": "Sydney", "lga_code": "17200", "lga_name": "Sydney (C)" }),
            ]))
        };

        let first = ctx.lga_lhd_map_with(load).await.unwrap().len();
        let second = ctx.lga_lhd_map_with(load).await.unwrap().len();
        // Later calls through the network path hit the cache as well
        let cached = ctx.lga_lhd_map().await.unwrap().len();

        assert_eq!((first, second, cached), (1, 1, 1));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lga_lhd_map_failure_not_cached() {
        let ctx = Context::new().unwrap();
        let err = ctx
            .lga_lhd_map_with(|| async { Err(FetchError::Api("down".into()).into()) })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("down"));

        let map = ctx
            .lga_lhd_map_with(|| async { Ok(Table::new(["lga_name"])) })
            .await
            .unwrap();
        assert!(map.has_column("lga_name"));
    }

    #[test]
    fn test_normalize_date_column() {
        let mut t = Table::from_values(vec![
            json!({ "date": "2020-03-01T00:00:00" }),
            json!({ "date": "05/09/2021" }),
            json!({ "date": null }),
            json!({ "date": "2021-10-13" }),
        ]);
        normalize_date_column(&mut t, "date").unwrap();
        let dates: Vec<&Value> = t.rows().iter().map(|r| &r["date"]).collect();
        assert_eq!(dates, [&json!("2020-03-01"), &json!("2021-09-05"), &Value::Null, &json!("2021-10-13")]);
    }

    #[test]
    fn test_normalize_date_rejects_garbage() {
        let mut t = Table::from_values(vec![json!({ "date": "yesterday" })]);
        assert!(normalize_date_column(&mut t, "date").is_err());

        let mut untouched = Table::from_values(vec![json!({ "day": "yesterday" })]);
        assert!(normalize_date_column(&mut untouched, "date").is_ok());
    }

    #[test]
    fn test_dispatch_from_config() {
        let source = DataSource::from(&SourceConfig::Covid19Data {
            filename: Covid19File::Deaths,
        });
        assert_eq!(source.name(), "covid_au_death_data");
        assert!(source.dimensions().contains(&"age_group"));
        assert!(source.diff_measures().is_empty());

        let lga = DataSource::from(&SourceConfig::Vaccinations {
            collection: VaxCollection::LgaRates,
        });
        assert_eq!(lga.name(), "covid_vaccination_by_lga");
        assert_eq!(lga.diff_measures(), ["vax_1_dose_15+", "vax_2_dose_15+"]);
    }

    #[test]
    fn test_every_source_schema_is_json() {
        let configs = [
            SourceConfig::Covid19Data { filename: Covid19File::State },
            SourceConfig::Covid19Data { filename: Covid19File::Deaths },
            SourceConfig::NswGovernment { resource_type: NswResource::TestsByLocation },
            SourceConfig::NswGovernment { resource_type: NswResource::CasesByLocation },
            SourceConfig::NswGovernment { resource_type: NswResource::CasesByAgeRange },
            SourceConfig::Vaccinations { collection: VaxCollection::VaccinationData },
            SourceConfig::Vaccinations { collection: VaxCollection::LgaRates },
        ];
        for config in &configs {
            let source = DataSource::from(config);
            let schema = source.schema().unwrap();
            let parsed: Value = serde_json::from_str(schema).unwrap();
            assert_eq!(parsed["type"], "object", "{}", source.name());
        }
    }
}

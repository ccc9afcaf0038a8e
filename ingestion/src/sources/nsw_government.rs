//! NSW Government open data: tests and cases by location and age range.
//!
//! The datastore exposes a SQL endpoint that silently truncates large
//! results. Pages are requested in `(date, _id)` order and each resumes
//! after the last row returned, skipping records already seen.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use tracing::{debug, info};

use super::{normalize_date_column, Context, Source};
use crate::config::NswResource;
use crate::error::{FetchError, FetchResult, PipelineResult};
use crate::models::{AgeGroup, State};
use crate::table::{Record, Table};

const SQL_ENDPOINT: &str = "https://data.nsw.gov.au/data/api/3/action/datastore_search_sql";

const LOCATION_RENAMES: &[(&str, &str)] = &[
    ("lhd_2010_code", "lhd_code"),
    ("lhd_2010_name", "lhd_name"),
    ("lga_code19", "lga_code"),
    ("lga_name19", "lga_name"),
];

/// Columns of the LGA to LHD lookup.
pub const LGA_LHD_COLUMNS: &[&str] = &["lhd_code", "lhd_name", "lga_code", "lga_name"];

impl NswResource {
    /// Datastore resource id.
    pub fn resource_id(&self) -> &'static str {
        match self {
            Self::TestsByLocation => "fb95de01-ad82-4716-ab9a-e15cf2c78556",
            Self::CasesByLocation => "21304414-1ff1-4243-a5d2-f52778048b29",
            Self::CasesByAgeRange => "24b34cb5-8b01-4008-9d93-d14cf5518aec",
        }
    }

    /// Column holding the record date upstream.
    pub fn date_field(&self) -> &'static str {
        match self {
            Self::TestsByLocation => "test_date",
            Self::CasesByLocation | Self::CasesByAgeRange => "notification_date",
        }
    }
}

/// `result` object of a `datastore_search_sql` answer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SqlPage {
    #[serde(default)]
    pub records: Vec<Record>,
    #[serde(default)]
    pub records_truncated: bool,
}

#[derive(Debug, Deserialize)]
struct SqlResponse {
    success: bool,
    #[serde(default)]
    result: Option<SqlPage>,
    #[serde(default)]
    error: Option<Value>,
}

fn quote_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// SQL for the first page.
pub fn first_page_sql(resource_id: &str, date_field: &str) -> String {
    format!(
        r#"SELECT * FROM "{}" ORDER BY "{}", "_id""#,
        resource_id, date_field
    )
}

/// SQL for the page following the row `(last_date, last_id)` in
/// `(date, _id)` order. A null date sorts after every other date.
pub fn next_page_sql(
    resource_id: &str,
    date_field: &str,
    last_date: Option<&str>,
    last_id: i64,
) -> String {
    let filter = match last_date {
        Some(date) => format!(
            r#""{d}" > '{v}' OR "{d}" IS NULL OR ("{d}" = '{v}' AND "_id" > {id})"#,
            d = date_field,
            v = quote_literal(date),
            id = last_id
        ),
        None => format!(r#""{}" IS NULL AND "_id" > {}"#, date_field, last_id),
    };
    format!(
        r#"SELECT * FROM "{}" WHERE {} ORDER BY "{}", "_id""#,
        resource_id, filter, date_field
    )
}

fn record_identity(record: &Record) -> String {
    match record.get("_id") {
        Some(id) => id.to_string(),
        None => Value::Object(record.clone()).to_string(),
    }
}

/// Fetch every page of a resource.
///
/// `fetch` runs one SQL statement. Pages are ordered by date then `_id` and
/// each one resumes after the last row of the previous. Paging stops when a
/// page is not truncated; a truncated page that adds nothing new is an error.
pub async fn fetch_all_pages<F, Fut>(
    resource_id: &str,
    date_field: &str,
    mut fetch: F,
) -> FetchResult<Vec<Record>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = FetchResult<SqlPage>>,
{
    let mut seen = HashSet::new();
    let mut records = Vec::new();
    let mut sql = first_page_sql(resource_id, date_field);

    loop {
        let page = fetch(sql).await?;
        let last = page.records.last().map(|r| {
            let date = match Table::get(r, date_field) {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            };
            (date, Table::get(r, "_id").as_i64())
        });

        let before = records.len();
        for record in page.records {
            if seen.insert(record_identity(&record)) {
                records.push(record);
            }
        }
        let added = records.len() - before;
        debug!(added, total = records.len(), "page received");

        if !page.records_truncated {
            break;
        }
        let (last_date, last_id) = last.unwrap_or_default();
        let shown = last_date.clone().unwrap_or_else(|| "null".to_string());
        let last_id = match last_id {
            Some(id) if added > 0 => id,
            _ => {
                return Err(FetchError::PaginationStalled {
                    field: date_field.to_string(),
                    value: shown,
                })
            }
        };
        info!("Result truncated at {} = {}, still retrieving...", date_field, shown);
        sql = next_page_sql(resource_id, date_field, last_date.as_deref(), last_id);
    }

    Ok(records)
}

async fn run_sql(ctx: &Context, sql: String) -> FetchResult<SqlPage> {
    let response: SqlResponse = ctx.http.get_json(SQL_ENDPOINT, &[("sql", sql.as_str())]).await?;
    if !response.success {
        let message = response
            .error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(FetchError::Api(message));
    }
    Ok(response.result.unwrap_or_default())
}

#[derive(Debug, Clone)]
pub struct NswGovSource {
    resource: NswResource,
}

impl NswGovSource {
    pub fn new(resource: NswResource) -> Self {
        Self { resource }
    }
}

impl Source for NswGovSource {
    fn name(&self) -> &'static str {
        match self.resource {
            NswResource::TestsByLocation => "covid_nsw_tests_by_location",
            NswResource::CasesByLocation => "covid_nsw_cases_by_location",
            NswResource::CasesByAgeRange => "covid_nsw_cases_by_age_range",
        }
    }

    fn dimensions(&self) -> &'static [&'static str] {
        match self.resource {
            NswResource::TestsByLocation => &[
                "date", "postcode", "lhd_code", "lhd_name", "lga_code", "lga_name",
                "state_name", "state_code",
            ],
            NswResource::CasesByLocation => &[
                "date", "lhd_code", "lhd_name", "lga_code", "lga_name", "state_name",
                "state_code",
            ],
            NswResource::CasesByAgeRange => &["date", "age_group", "state_name", "state_code"],
        }
    }

    fn schema(&self) -> Option<&'static str> {
        Some(match self.resource {
            NswResource::TestsByLocation => {
                include_str!("../../schemas/covid_nsw_tests_by_location.json")
            }
            NswResource::CasesByLocation => {
                include_str!("../../schemas/covid_nsw_cases_by_location.json")
            }
            NswResource::CasesByAgeRange => {
                include_str!("../../schemas/covid_nsw_cases_by_age_range.json")
            }
        })
    }

    async fn retrieve(&self, ctx: &Context) -> PipelineResult<Table> {
        info!("Retrieving data from {}", self.resource);
        let records = fetch_all_pages(
            self.resource.resource_id(),
            self.resource.date_field(),
            |sql| run_sql(ctx, sql),
        )
        .await?;
        Ok(Table::from_records(records))
    }

    async fn process(&self, _ctx: &Context, raw: Table) -> PipelineResult<Table> {
        process(self.resource, raw)
    }
}

/// Reshape raw datastore records.
pub fn process(resource: NswResource, mut table: Table) -> PipelineResult<Table> {
    table.drop_columns(&["_id", "_full_text"]);
    table.rename(&[(resource.date_field(), "date")]);
    normalize_date_column(&mut table, "date")?;

    let mut table = match resource {
        NswResource::TestsByLocation => table,
        NswResource::CasesByLocation => table.group_count(
            &["date", "lhd_2010_code", "lhd_2010_name", "lga_code19", "lga_name19"],
            "case_count",
        )?,
        NswResource::CasesByAgeRange => {
            table.map_column("age_group", |v| {
                Ok(v.as_str()
                    .and_then(AgeGroup::parse)
                    .map(|g| Value::from(g.to_string()))
                    .unwrap_or(Value::Null))
            })?;
            table.group_count(&["date", "age_group"], "case_count")?
        }
    };

    table.add_constant("state_name", Value::from(State::NewSouthWales.name()));
    table.add_constant("state_code", Value::from(State::NewSouthWales.code()));
    table.replace_values(&Value::from("None"), Value::Null);
    table.rename(LOCATION_RENAMES);
    Ok(table)
}

/// Distinct LGA to LHD pairs from processed cases-by-location data.
pub fn lga_lhd_map(cases_by_location: &Table) -> PipelineResult<Table> {
    let mut map = cases_by_location.select(LGA_LHD_COLUMNS)?;
    map.drop_duplicates(None);
    Ok(map)
}

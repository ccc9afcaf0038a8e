//! Vaccination figures published as spreadsheets on health.gov.au.
//!
//! A collection page lists one resource page per publication; each resource
//! page links a single xlsx attachment whose file name carries the
//! publication date.

use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use std::future::Future;
use tracing::{debug, info};

use super::excel::{date_from_link, read_first_sheet, table_with_header, transpose_measures};
use super::html::{collection_links, resolve_url, xlsx_link};
use super::{Context, Source};
use crate::config::VaxCollection;
use crate::error::{FetchError, PipelineResult, TableError, TableResult};
use crate::models::{AgeGroup, State, COUNTRY};
use crate::table::value::{as_f64, number, to_cell};
use crate::table::{JoinKind, Record, Table};

const BASE_URL: &str = "https://www.health.gov.au/";

/// Concurrent attachment downloads.
const DOWNLOAD_WORKERS: usize = 5;

/// Header row of the LGA sheet (zero-based).
const LGA_HEADER_ROW: usize = 8;

const LGA_COLUMNS: [&str; 5] = [
    "lga_name",
    "state_name",
    "vax_1_%_15+",
    "vax_2_%_15+",
    "population_15+",
];

const AGE_GROUPS: &[&str] = &[
    "16-19", "20-24", "25-29", "30-34", "35-39", "40-44", "45-49", "50-54", "55-59", "60-64",
    "65-69", "70-74", "75-79", "80-84", "85-89", "90-94", "95+",
];

const SEXES: [(&str, &str); 2] = [("M", "Male"), ("F", "Female")];

#[derive(Debug, Clone)]
pub struct VaxSource {
    collection: VaxCollection,
}

impl VaxSource {
    pub fn new(collection: VaxCollection) -> Self {
        Self { collection }
    }

    pub fn collection_url(&self) -> String {
        format!("{}resources/collections/{}", BASE_URL, self.collection)
    }

    /// Resource page -> xlsx attachment -> table tagged with its date.
    async fn fetch_attachment(&self, ctx: &Context, page_url: String) -> PipelineResult<Table> {
        let html = ctx.http.get_text(&page_url).await?;
        let href = xlsx_link(&html)
            .ok_or_else(|| FetchError::MarkupNotFound(format!("xlsx link on {}", page_url)))?;
        let link = resolve_url(&page_url, &href)?;
        let date = date_from_link(&link)?;

        info!("Downloading file: {}", link);
        let bytes = ctx.http.get_bytes(&link).await?;
        let grid = read_first_sheet(&bytes)?;

        let mut table = match self.collection {
            VaxCollection::VaccinationData => {
                transpose_measures(&table_with_header(&grid, 0)?, "Measure Name")
            }
            VaxCollection::LgaRates => lga_sheet(table_with_header(&grid, LGA_HEADER_ROW)?)?,
        };
        table.add_constant("date", Value::from(date.format("%Y-%m-%d").to_string()));
        debug!(rows = table.len(), %date, "Download done");
        Ok(table)
    }
}

/// Drop `Remoteness` and name the remaining columns by position.
fn lga_sheet(mut table: Table) -> TableResult<Table> {
    table.drop_columns(&["Remoteness"]);
    let current: Vec<String> = table.columns().iter().take(LGA_COLUMNS.len()).cloned().collect();
    if current.len() < LGA_COLUMNS.len() {
        return Err(TableError::MissingColumn(LGA_COLUMNS[current.len()].to_string()));
    }
    let pairs: Vec<(&str, &str)> = current
        .iter()
        .map(String::as_str)
        .zip(LGA_COLUMNS)
        .collect();
    table.rename(&pairs);
    table.select(&LGA_COLUMNS)
}

impl Source for VaxSource {
    fn name(&self) -> &'static str {
        match self.collection {
            VaxCollection::VaccinationData => "covid_au_vaccination_data",
            VaxCollection::LgaRates => "covid_vaccination_by_lga",
        }
    }

    fn dimensions(&self) -> &'static [&'static str] {
        match self.collection {
            VaxCollection::VaccinationData => &[
                "date", "state_name", "state_code", "country", "age_group", "sex",
            ],
            VaxCollection::LgaRates => &[
                "date", "lhd_code", "lhd_name", "lga_code", "lga_name", "state_name",
                "state_code",
            ],
        }
    }

    fn diff_measures(&self) -> &'static [&'static str] {
        match self.collection {
            VaxCollection::VaccinationData => &["vax_1_dose", "vax_2_dose"],
            VaxCollection::LgaRates => &["vax_1_dose_15+", "vax_2_dose_15+"],
        }
    }

    fn schema(&self) -> Option<&'static str> {
        Some(match self.collection {
            VaxCollection::VaccinationData => {
                include_str!("../../schemas/covid_au_vaccination_data.json")
            }
            VaxCollection::LgaRates => include_str!("../../schemas/covid_vaccination_by_lga.json"),
        })
    }

    async fn retrieve(&self, ctx: &Context) -> PipelineResult<Table> {
        let url = self.collection_url();
        info!("Retrieving collection: {}", url);
        let html = ctx.http.get_text(&url).await?;
        let pages = collection_links(&html)
            .ok_or_else(|| FetchError::MarkupNotFound(format!("paragraphs-items on {}", url)))?
            .iter()
            .map(|href| resolve_url(&url, href))
            .collect::<Result<Vec<_>, _>>()?;
        info!("{} publications listed", pages.len());

        let tables = download_all(pages, DOWNLOAD_WORKERS, |page| {
            self.fetch_attachment(ctx, page)
        })
        .await?;
        Ok(Table::concat(tables))
    }

    async fn process(&self, ctx: &Context, raw: Table) -> PipelineResult<Table> {
        match self.collection {
            VaxCollection::VaccinationData => Ok(process_vaccination_data(&raw)),
            VaxCollection::LgaRates => {
                let map = ctx.lga_lhd_map().await?;
                Ok(process_lga_rates(raw, map)?)
            }
        }
    }
}

/// Run `fetch` over `pages` with at most `workers` in flight, keeping the
/// results in listing order. The first failure aborts the rest.
pub async fn download_all<F, Fut>(
    pages: Vec<String>,
    workers: usize,
    fetch: F,
) -> PipelineResult<Vec<Table>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = PipelineResult<Table>>,
{
    stream::iter(pages)
        .map(fetch)
        .buffered(workers.max(1))
        .try_collect()
        .await
}

/// Whole numbers as integers, anything else as a float.
fn count(x: f64) -> Value {
    if x.fract() == 0.0 && x.abs() < 9.0e15 {
        Value::from(x as i64)
    } else {
        number(x)
    }
}

fn ratio(part: Option<f64>, whole: Option<f64>) -> Value {
    match (part, whole) {
        (Some(p), Some(w)) if w != 0.0 => number(p / w),
        _ => Value::Null,
    }
}

fn uptake(record: &mut Record, population: Option<f64>, first: Option<f64>, second: Option<f64>) {
    let opt = |x: Option<f64>| x.map(count).unwrap_or(Value::Null);
    record.insert("vax_1_dose".into(), opt(first));
    record.insert("vax_2_dose".into(), opt(second));
    record.insert("vax_1_%".into(), ratio(first, population));
    record.insert("vax_2_%".into(), ratio(second, population));
    record.insert("population".into(), opt(population));
}

/// One row per state and one per national (age group, sex) pair for every
/// publication. Percentages are fractions of the population.
pub fn process_vaccination_data(raw: &Table) -> Table {
    let mut out = Table::new([
        "date", "state_name", "state_code", "country", "age_group", "sex",
        "vax_1_dose", "vax_2_dose", "vax_1_%", "vax_2_%", "population",
    ]);

    for doc in raw.rows() {
        let measure = |name: String| as_f64(Table::get(doc, &name));
        let date = Table::get(doc, "date").clone();

        for state in State::ALL {
            let code = state.code();
            let mut record = Record::new();
            record.insert("date".into(), date.clone());
            record.insert("state_name".into(), Value::from(state.name()));
            record.insert("state_code".into(), Value::from(code));
            record.insert("country".into(), Value::from(COUNTRY));
            uptake(
                &mut record,
                measure(format!("{} - Population 16 and over", code)),
                measure(format!(
                    "{} - Residence state - Number of people 16 and over with 1 dose",
                    code
                )),
                measure(format!(
                    "{} - Residence state - Number of people 16 and over fully vaccinated",
                    code
                )),
            );
            out.push_row(record);
        }

        for group in AGE_GROUPS {
            let age_group = AgeGroup::parse(group).map(|g| Value::from(g.to_string()));
            for (code, sex) in SEXES {
                let prefix = format!("Age group - {} - {}", group, code);
                let mut record = Record::new();
                record.insert("date".into(), date.clone());
                record.insert("country".into(), Value::from(COUNTRY));
                record.insert("age_group".into(), age_group.clone().unwrap_or(Value::Null));
                record.insert("sex".into(), Value::from(sex));
                uptake(
                    &mut record,
                    measure(format!("{} - Population", prefix)),
                    measure(format!("{} - Number of people with 1 dose", prefix)),
                    measure(format!("{} - Number of people fully vaccinated", prefix)),
                );
                out.push_row(record);
            }
        }
    }
    out
}

fn percentage(column: &str, v: &Value) -> TableResult<Value> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    let text: String = to_cell(v).chars().filter(|c| *c != '>' && *c != '%').collect();
    text.trim()
        .parse::<f64>()
        .map(number)
        .map_err(|_| TableError::InvalidValue {
            column: column.to_string(),
            message: format!("not a percentage: {}", v),
        })
}

fn population(v: &Value) -> Value {
    let digits: String = to_cell(v)
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse::<f64>().map(count).unwrap_or(Value::Null)
}

/// LGA uptake rates: clean the published text, estimate dose counts from
/// rate and population, and attach LHD codes through `lga_lhd_map`.
pub fn process_lga_rates(mut table: Table, lga_lhd_map: &Table) -> TableResult<Table> {
    table.replace_values(&Value::from("N/A"), Value::Null);
    for column in ["vax_1_%_15+", "vax_2_%_15+"] {
        table.map_column(column, |v| percentage(column, v))?;
    }
    table.derive_column("state_code", |row| {
        Ok(Table::get(row, "state_name")
            .as_str()
            .and_then(State::from_name)
            .map(|s| Value::from(s.code()))
            .unwrap_or(Value::Null))
    })?;
    table.map_column("population_15+", |v| Ok(population(v)))?;

    for (rate, doses) in [("vax_1_%_15+", "vax_1_dose_15+"), ("vax_2_%_15+", "vax_2_dose_15+")] {
        table.derive_column(doses, |row| {
            let estimate = as_f64(Table::get(row, rate))
                .zip(as_f64(Table::get(row, "population_15+")))
                .map(|(pct, pop)| Value::from((pct * pop / 100.0).round() as i64));
            Ok(estimate.unwrap_or(Value::Null))
        })?;
    }

    Ok(table.merge(lga_lhd_map, JoinKind::Inner))
}

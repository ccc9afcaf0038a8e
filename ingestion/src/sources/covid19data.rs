//! State-level case, test and death counts from the M3IT COVID-19_Data
//! GitHub repository.

use serde_json::Value;
use tracing::info;

use super::{normalize_date_column, Context, Source};
use crate::config::Covid19File;
use crate::error::{PipelineResult, TableError};
use crate::models::{normalize_sex, AgeGroup, State, COUNTRY};
use crate::parser::parse_bytes_auto;
use crate::table::Table;

const BASE_URL: &str = "https://raw.githubusercontent.com/M3IT/COVID-19_Data/master/Data/";

const STATE_DIMENSIONS: &[&str] = &["date", "state_name", "state_code", "country"];

const DEATH_DIMENSIONS: &[&str] = &[
    "date",
    "state_name",
    "state_code",
    "age_group",
    "sex",
    "country",
];

#[derive(Debug, Clone)]
pub struct Covid19DataSource {
    filename: Covid19File,
}

impl Covid19DataSource {
    pub fn new(filename: Covid19File) -> Self {
        Self { filename }
    }

    pub fn url(&self) -> String {
        format!("{}{}", BASE_URL, self.filename)
    }
}

impl Source for Covid19DataSource {
    fn name(&self) -> &'static str {
        match self.filename {
            Covid19File::State => "covid_au_data",
            Covid19File::Deaths => "covid_au_death_data",
        }
    }

    fn dimensions(&self) -> &'static [&'static str] {
        match self.filename {
            Covid19File::State => STATE_DIMENSIONS,
            Covid19File::Deaths => DEATH_DIMENSIONS,
        }
    }

    fn schema(&self) -> Option<&'static str> {
        Some(match self.filename {
            Covid19File::State => include_str!("../../schemas/covid_au_data.json"),
            Covid19File::Deaths => include_str!("../../schemas/covid_au_death_data.json"),
        })
    }

    async fn retrieve(&self, ctx: &Context) -> PipelineResult<Table> {
        let url = self.url();
        info!("Retrieving {}", url);
        let bytes = ctx.http.get_bytes(&url).await?;
        let parsed = parse_bytes_auto(&bytes)?;
        info!(rows = parsed.table.len(), encoding = %parsed.encoding, "Parsed {}", self.filename);
        Ok(parsed.table)
    }

    async fn process(&self, _ctx: &Context, raw: Table) -> PipelineResult<Table> {
        match self.filename {
            Covid19File::State => process_state(raw),
            Covid19File::Deaths => process_deaths(raw),
        }
    }
}

/// Daily state counts: rename the state columns and tag the country.
pub fn process_state(mut table: Table) -> PipelineResult<Table> {
    normalize_date_column(&mut table, "date")?;
    table.rename(&[("state", "state_name"), ("state_abbrev", "state_code")]);
    table.add_constant("country", Value::from(COUNTRY));
    Ok(table)
}

/// Line-listed deaths: one row per death, counted per date, state, age
/// group and sex.
pub fn process_deaths(mut table: Table) -> PipelineResult<Table> {
    normalize_date_column(&mut table, "date")?;
    table.rename(&[("state", "state_code"), ("gender", "sex")]);

    table.derive_column("state_name", |row| {
        match Table::get(row, "state_code") {
            Value::Null => Ok(Value::Null),
            code => {
                let code = code.as_str().unwrap_or_default();
                State::from_code(code)
                    .map(|s| Value::from(s.name()))
                    .ok_or_else(|| TableError::InvalidValue {
                        column: "state_code".to_string(),
                        message: format!("unknown state '{}'", code),
                    })
            }
        }
    })?;

    table.derive_column("age_group", |row| {
        let group = match Table::get(row, "age_bracket") {
            Value::String(s) => AgeGroup::parse(s),
            Value::Number(n) => AgeGroup::parse(&n.to_string()),
            _ => None,
        };
        Ok(group.map(|g| Value::from(g.to_string())).unwrap_or(Value::Null))
    })?;

    if table.has_column("sex") {
        table.map_column("sex", |v| {
            Ok(match v {
                Value::String(s) => Value::from(normalize_sex(s)),
                other => other.clone(),
            })
        })?;
    } else {
        table.add_constant("sex", Value::Null);
    }

    let mut counted = table.group_count(
        &["date", "state_name", "state_code", "age_group", "sex"],
        "death_count",
    )?;
    counted.add_constant("country", Value::from(COUNTRY));
    Ok(counted)
}

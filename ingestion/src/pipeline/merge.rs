//! Combined dashboard tables.
//!
//! Several sources are processed, each saved on its own, then outer-merged
//! into one wide table per geography level.

use serde_json::Value;
use tracing::info;

use super::{add_keys, retrieve_processed, validate, DATE_COLUMN};
use crate::config::{Covid19File, NswResource, SinkConfig, SourceConfig, VaxCollection};
use crate::error::PipelineResult;
use crate::sink::{self, SaveReport};
use crate::sources::{Context, DataSource, Source};
use crate::table::{sanitize_column_name, JoinKind, Table};

const STATE_DIMENSIONS: &[&str] = &["date", "state_name", "state_code", "country", "age_group", "sex"];

const STATE_MEASURES: &[&str] = &[
    "confirmed", "confirmed_cum", "deaths", "deaths_cum", "tests", "tests_cum", "positives",
    "positives_cum", "recovered", "recovered_cum", "hosp", "hosp_cum", "icu", "icu_cum", "vent",
    "vent_cum", "vaccines", "vaccines_cum", "vax_1_dose", "vax_1_%", "vax_2_dose", "vax_2_%",
    "population", "death_count",
];

const LGA_DIMENSIONS: &[&str] = &["lhd_code", "lhd_name", "lga_code", "lga_name", "state"];

const LGA_MEASURES: &[&str] = &[
    "test_count", "case_count", "vax_1_%_15+", "vax_2_%_15+", "vax_1_dose_15+", "vax_2_dose_15+",
    "population_15+",
];

/// A named set of sources merged into one table.
#[derive(Debug, Clone)]
pub struct MergePreset {
    pub name: &'static str,
    pub sources: Vec<SourceConfig>,
    pub dimensions: &'static [&'static str],
    pub measures: &'static [&'static str],
}

impl MergePreset {
    pub const NAMES: [&'static str; 2] = ["states", "lga"];

    /// State-level cases, deaths and vaccinations.
    pub fn states() -> Self {
        Self {
            name: "states",
            sources: vec![
                SourceConfig::Covid19Data { filename: Covid19File::State },
                SourceConfig::Covid19Data { filename: Covid19File::Deaths },
                SourceConfig::Vaccinations { collection: VaxCollection::VaccinationData },
            ],
            dimensions: STATE_DIMENSIONS,
            measures: STATE_MEASURES,
        }
    }

    /// NSW LGA-level tests, cases and vaccination rates.
    pub fn lga() -> Self {
        Self {
            name: "lga",
            sources: vec![
                SourceConfig::NswGovernment { resource_type: NswResource::TestsByLocation },
                SourceConfig::NswGovernment { resource_type: NswResource::CasesByLocation },
                SourceConfig::Vaccinations { collection: VaxCollection::LgaRates },
            ],
            dimensions: LGA_DIMENSIONS,
            measures: LGA_MEASURES,
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "states" => Some(Self::states()),
            "lga" => Some(Self::lga()),
            _ => None,
        }
    }

    /// Columns naming one merged row: `date` plus the preset dimensions.
    pub fn key_columns(&self) -> Vec<String> {
        let mut columns = vec![DATE_COLUMN.to_string()];
        for d in self.dimensions {
            let d = sanitize_column_name(d);
            if !columns.contains(&d) {
                columns.push(d);
            }
        }
        columns
    }

    /// Outer-merge processed tables and key the result by [`Self::key_columns`].
    pub fn merge(&self, tables: Vec<Table>) -> Table {
        let mut merged = merge_tables(tables, self.dimensions, self.measures);
        let key_columns = self.key_columns();
        let key_columns: Vec<&str> = key_columns.iter().map(String::as_str).collect();
        merged.with_dimensions_id(&key_columns);
        merged
    }
}

/// Outer-merge processed tables in order.
///
/// Dimension columns a table lacks are added as null first, unless the name
/// is also a measure. Each table is merged onto the accumulated result on
/// their common columns.
pub fn merge_tables(tables: Vec<Table>, dimensions: &[&str], measures: &[&str]) -> Table {
    let dimensions: Vec<String> = dimensions.iter().map(|d| sanitize_column_name(d)).collect();
    let measures: Vec<String> = measures.iter().map(|m| sanitize_column_name(m)).collect();

    let mut merged: Option<Table> = None;
    for mut table in tables {
        for d in &dimensions {
            if !table.has_column(d) && !measures.contains(d) {
                table.add_constant(d, Value::Null);
            }
        }
        merged = Some(match merged {
            None => table,
            Some(acc) => table.merge(&acc, JoinKind::Outer),
        });
    }
    merged.unwrap_or_default()
}

/// Process every source of `preset`, save each under its own name, then save
/// the merged table under the preset name.
///
/// `sink` supplies type and mode; its name is used as a prefix (a directory
/// for CSV sinks) and may be empty.
pub async fn retrieve_and_merge(
    preset: &MergePreset,
    sink: &SinkConfig,
    ctx: &Context,
) -> PipelineResult<Vec<SaveReport>> {
    let mut reports = Vec::new();
    let mut tables = Vec::new();

    for config in &preset.sources {
        let source = DataSource::from(config);
        let (_, processed) = retrieve_processed(&source, ctx).await?;

        let mut keyed = processed.clone();
        add_keys(&source, &mut keyed);
        validate(&source, &keyed)?;
        let target = sink.renamed(prefixed(&sink.name, source.name()));
        reports.push(sink::save(keyed, &target).await?);

        tables.push(processed);
    }

    info!("Merging {} tables into {}", tables.len(), preset.name);
    let merged = preset.merge(tables);
    info!("Merged table has {} rows", merged.len());

    let target = sink.renamed(prefixed(&sink.name, preset.name));
    reports.push(sink::save(merged, &target).await?);
    Ok(reports)
}

fn prefixed(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else if prefix.ends_with('/') || prefix.ends_with('_') {
        format!("{}{}", prefix, name)
    } else {
        format!("{}/{}", prefix, name)
    }
}

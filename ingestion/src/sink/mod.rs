//! Writing processed tables to their configured sink.
//!
//! Before anything is written the table is stamped with `saved_date` (UTC
//! date of the run) and duplicate rows are dropped. Readers select the
//! latest `saved_date` per `dimensions_id`.

pub mod database;
pub mod file;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::config::{SinkConfig, SinkKind};
use crate::error::SinkResult;
use crate::table::Table;

/// Column stamped on every saved row.
pub const SAVED_DATE: &str = "saved_date";

/// Default rows per write batch when no `chunksize` is configured.
pub const DEFAULT_CHUNK_ROWS: usize = 1000;

/// Outcome of one save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveReport {
    pub rows: usize,
    pub location: String,
}

/// Stamp `saved_date` and drop duplicate rows.
pub fn prepare(table: &mut Table, today: NaiveDate) {
    table.add_constant(SAVED_DATE, Value::from(today.format("%Y-%m-%d").to_string()));
    let before = table.len();
    table.drop_duplicates(None);
    if table.len() < before {
        info!("Dropped {} duplicate rows", before - table.len());
    }
}

/// Save `table` to `sink`.
pub async fn save(mut table: Table, sink: &SinkConfig) -> SinkResult<SaveReport> {
    prepare(&mut table, Utc::now().date_naive());
    match sink.kind {
        SinkKind::Csv => {
            info!("Saving data to csv...");
            file::save(&table, sink)
        }
        SinkKind::Postgres => {
            info!("Saving data to database...");
            let url = sink.database_url()?;
            database::save(&table, sink, &url).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prepare_stamps_and_dedups() {
        let mut t = Table::from_values(vec![
            json!({ "date": "2021-01-01", "n": 1 }),
            json!({ "date": "2021-01-01", "n": 1 }),
            json!({ "date": "2021-01-02", "n": 1 }),
        ]);
        prepare(&mut t, NaiveDate::from_ymd_opt(2021, 10, 18).unwrap());
        assert_eq!(t.len(), 2);
        assert_eq!(t.columns(), ["date", "n", SAVED_DATE]);
        assert_eq!(t.rows()[1][SAVED_DATE], "2021-10-18");
    }

    #[tokio::test]
    async fn test_save_csv() {
        let dir = tempfile::tempdir().unwrap();
        let name = dir.path().join("cases").to_string_lossy().into_owned();
        let t = Table::from_values(vec![json!({ "date": "2021-01-01", "n": 1 })]);

        let report = save(t, &SinkConfig::csv(name)).await.unwrap();
        assert_eq!(report.rows, 1);
        assert!(report.location.ends_with("cases.csv"));

        let text = std::fs::read_to_string(&report.location).unwrap();
        assert!(text.starts_with("date,n,saved_date\n2021-01-01,1,"));
    }
}

//! CSV file sink.

use csv::{ReaderBuilder, WriterBuilder};
use std::fs::{self, File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{SaveReport, DEFAULT_CHUNK_ROWS};
use crate::config::{SinkConfig, SinkMode};
use crate::error::{SinkError, SinkResult};
use crate::table::value::to_cell;
use crate::table::Table;

/// Sink name as a file path, with `.csv` appended if missing.
pub fn csv_path(name: &str) -> PathBuf {
    if name.ends_with(".csv") {
        PathBuf::from(name)
    } else {
        PathBuf::from(format!("{}.csv", name))
    }
}

fn existing_header(path: &Path) -> SinkResult<Option<Vec<String>>> {
    if fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true) {
        return Ok(None);
    }
    let mut reader = ReaderBuilder::new().from_path(path)?;
    let header = reader.headers()?.iter().map(str::to_string).collect();
    Ok(Some(header))
}

/// Write `table` to `<name>.csv`.
///
/// `append` keeps the existing header and writes cells in its order;
/// columns the file does not have are dropped with a warning.
pub fn save(table: &Table, sink: &SinkConfig) -> SinkResult<SaveReport> {
    let path = csv_path(&sink.name);
    let exists = path.exists();
    if exists && sink.mode == SinkMode::Fail {
        return Err(SinkError::AlreadyExists(path.display().to_string()));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let (file, header) = match sink.mode {
        SinkMode::Append => {
            let header = existing_header(&path)?;
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            (file, header)
        }
        SinkMode::Fail | SinkMode::Replace => (File::create(&path)?, None),
    };

    let write_header = header.is_none();
    let columns = header.unwrap_or_else(|| table.columns().to_vec());
    let dropped: Vec<&String> = table
        .columns()
        .iter()
        .filter(|c| !columns.contains(c))
        .collect();
    if !dropped.is_empty() {
        warn!("Columns not in {}: {:?}", path.display(), dropped);
    }

    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(BufWriter::new(file));
    if write_header {
        writer.write_record(&columns)?;
    }

    let chunk_rows = sink.chunksize.unwrap_or(DEFAULT_CHUNK_ROWS);
    for (i, chunk) in table.rows().chunks(chunk_rows).enumerate() {
        for row in chunk {
            writer.write_record(columns.iter().map(|c| to_cell(Table::get(row, c))))?;
        }
        writer.flush()?;
        debug!(chunk = i, rows = chunk.len(), "chunk written");
    }

    info!("Saved {} rows to {}", table.len(), path.display());
    Ok(SaveReport {
        rows: table.len(),
        location: path.display().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Table {
        Table::from_values(vec![
            json!({ "date": "2021-01-01", "lga_name": "Sydney (C)", "case_count": 3 }),
            json!({ "date": "2021-01-02", "lga_name": null, "case_count": 1 }),
        ])
    }

    fn sink(path: &Path, mode: SinkMode) -> SinkConfig {
        let mut s = SinkConfig::csv(path.to_string_lossy());
        s.mode = mode;
        s
    }

    #[test]
    fn test_csv_path_suffix() {
        assert_eq!(csv_path("data/out"), PathBuf::from("data/out.csv"));
        assert_eq!(csv_path("out.csv"), PathBuf::from("out.csv"));
    }

    #[test]
    fn test_replace_writes_header_and_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/cases");
        save(&sample(), &sink(&target, SinkMode::Replace)).unwrap();
        save(&sample(), &sink(&target, SinkMode::Replace)).unwrap();

        let text = fs::read_to_string(dir.path().join("nested/cases.csv")).unwrap();
        assert_eq!(
            text,
            "date,lga_name,case_count\n2021-01-01,Sydney (C),3\n2021-01-02,,1\n"
        );
    }

    #[test]
    fn test_fail_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("cases.csv");
        save(&sample(), &sink(&target, SinkMode::Fail)).unwrap();
        let err = save(&sample(), &sink(&target, SinkMode::Fail)).unwrap_err();
        assert!(matches!(err, SinkError::AlreadyExists(_)));
    }

    #[test]
    fn test_append_keeps_existing_header() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("cases.csv");
        fs::write(&target, "date,case_count\n2020-12-31,9\n").unwrap();

        let mut s = sink(&target, SinkMode::Append);
        s.chunksize = Some(1);
        let report = save(&sample(), &s).unwrap();
        assert_eq!(report.rows, 2);

        let text = fs::read_to_string(&target).unwrap();
        assert_eq!(text, "date,case_count\n2020-12-31,9\n2021-01-01,3\n2021-01-02,1\n");
    }

    #[test]
    fn test_append_to_new_file_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("fresh");
        save(&sample(), &sink(&target, SinkMode::Append)).unwrap();
        let text = fs::read_to_string(dir.path().join("fresh.csv")).unwrap();
        assert!(text.starts_with("date,lga_name,case_count\n"));
    }
}

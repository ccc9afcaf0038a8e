//! Spreadsheet attachments: first worksheet to a [`Table`].

use calamine::{open_workbook_from_rs, Data, Reader, Xlsx, XlsxError};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::io::Cursor;

use crate::error::ExcelError;
use crate::table::value::number;
use crate::table::{Record, Table};

static LINK_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{1,2}-\w+-\d{4}").unwrap());

/// Cell value as JSON. Whole floats become integers, blank text becomes null.
pub fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Int(i) => Value::from(*i),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Value::from(*f as i64),
        Data::Float(f) => number(*f),
        Data::String(s) if s.trim().is_empty() => Value::Null,
        Data::String(s) => Value::from(s.trim()),
        Data::Bool(b) => Value::from(*b),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| Value::from(d.date().format("%Y-%m-%d").to_string()))
            .unwrap_or(Value::Null),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Value::from(s.as_str()),
        Data::Error(_) | Data::Empty => Value::Null,
    }
}

/// First worksheet as rows of cells, indexed from the sheet's first row.
pub fn read_first_sheet(bytes: &[u8]) -> Result<Vec<Vec<Value>>, ExcelError> {
    let mut workbook: Xlsx<Cursor<Vec<u8>>> = open_workbook_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e: XlsxError| ExcelError::Open(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(ExcelError::NoSheet)?
        .map_err(|e| ExcelError::Open(e.to_string()))?;

    // The range starts at the first used cell; pad so indices match the sheet
    let (first_row, first_col) = range.start().unwrap_or((0, 0));
    let mut grid: Vec<Vec<Value>> = (0..first_row).map(|_| Vec::new()).collect();
    grid.extend(range.rows().map(|row| {
        let mut cells = vec![Value::Null; first_col as usize];
        cells.extend(row.iter().map(cell_value));
        cells
    }));
    Ok(grid)
}

fn header_name(cell: Option<&Value>, index: usize) -> String {
    match cell {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => format!("Unnamed: {}", index),
        Some(other) => other.to_string(),
    }
}

/// Table using row `header_row` as column names and the rows below as data.
///
/// Blank headers become `Unnamed: <i>`, repeated headers get a `.<n>`
/// suffix, fully empty rows are skipped.
pub fn table_with_header(grid: &[Vec<Value>], header_row: usize) -> Result<Table, ExcelError> {
    let header = grid
        .get(header_row)
        .ok_or(ExcelError::MissingHeader(header_row))?;

    let width = grid[header_row..].iter().map(Vec::len).max().unwrap_or(0);
    let mut seen = HashSet::new();
    let columns: Vec<String> = (0..width)
        .map(|i| {
            let base = header_name(header.get(i), i);
            let mut name = base.clone();
            let mut n = 1;
            while !seen.insert(name.clone()) {
                name = format!("{}.{}", base, n);
                n += 1;
            }
            name
        })
        .collect();

    let mut table = Table::new(columns.iter().cloned());
    for row in &grid[header_row + 1..] {
        if row.iter().all(Value::is_null) {
            continue;
        }
        let record: Record = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), row.get(i).cloned().unwrap_or(Value::Null)))
            .collect();
        table.push_row(record);
    }
    Ok(table)
}

/// Turn a `Measure Name | value...` sheet into one record per value column.
///
/// Rows with any empty cell are dropped first.
pub fn transpose_measures(table: &Table, key_column: &str) -> Table {
    let complete: Vec<&Record> = table
        .rows()
        .iter()
        .filter(|row| table.columns().iter().all(|c| !Table::get(row, c).is_null()))
        .collect();

    let records = table
        .columns()
        .iter()
        .filter(|c| c.as_str() != key_column)
        .map(|column| {
            complete
                .iter()
                .map(|row| {
                    let measure = match Table::get(row, key_column) {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (measure, Table::get(row, column).clone())
                })
                .collect::<Record>()
        });
    Table::from_records(records)
}

/// Publication date embedded in an attachment link (`...-5-september-2021.xlsx`).
pub fn date_from_link(link: &str) -> Result<NaiveDate, ExcelError> {
    LINK_DATE
        .find_iter(link)
        .find_map(|m| NaiveDate::parse_from_str(m.as_str(), "%d-%B-%Y").ok())
        .ok_or_else(|| ExcelError::NoDate(link.to_string()))
}

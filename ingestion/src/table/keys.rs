//! Surrogate keys, incremental diffs and column naming.
//!
//! Every saved table carries a `dimensions_id` so that rows describing the
//! same (date, geography, demographic) tuple share a key across runs. Readers
//! pick the latest `saved_date` per `dimensions_id`.

use serde_json::Value;
use std::collections::HashMap;

use super::value::{as_f64, cmp_values, key_string, number};
use super::{Record, Table};

/// Name of the surrogate key column.
pub const DIMENSIONS_ID: &str = "dimensions_id";

/// Suffix of the incremental-diff columns.
pub const DIFF_SUFFIX: &str = "_diff";

/// Stable key for a tuple of dimension values: BLAKE3, first 16 bytes as hex.
pub fn dimensions_id(values: &[&Value]) -> String {
    let hash = blake3::hash(key_string(values).as_bytes());
    hash.to_hex().as_str()[..32].to_string()
}

/// Column name safe for SQL identifiers: `%` -> `percent`, `+` dropped,
/// anything else outside `[A-Za-z0-9_]` -> `_`.
pub fn sanitize_column_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        match c {
            '%' => out.push_str("percent"),
            '+' => {}
            c if c.is_ascii_alphanumeric() || c == '_' => out.push(c),
            _ => out.push('_'),
        }
    }
    out
}

fn diff(current: &Value, previous: &Value) -> Value {
    match (current.as_i64(), previous.as_i64()) {
        (Some(c), Some(p)) => Value::from(c - p),
        _ => match (as_f64(current), as_f64(previous)) {
            (Some(c), Some(p)) => number(c - p),
            _ => Value::Null,
        },
    }
}

impl Table {
    /// Add the `dimensions_id` column computed from `dimensions`.
    ///
    /// Absent dimension columns count as null.
    pub fn with_dimensions_id(&mut self, dimensions: &[&str]) {
        self.push_column(DIMENSIONS_ID);
        for row in &mut self.rows {
            let values: Vec<&Value> = dimensions.iter().map(|d| Table::get(row, d)).collect();
            let id = dimensions_id(&values);
            row.insert(DIMENSIONS_ID.to_string(), Value::String(id));
        }
    }

    /// Add `<measure>_diff` columns: change since the previous row that has
    /// the same dimensions (other than `date_column`), in date order.
    ///
    /// The first row of a group carries its own value. A null measure gets a
    /// null diff and leaves the previous value in place.
    pub fn with_diff_columns(&mut self, dimensions: &[&str], date_column: &str, measures: &[&str]) {
        let group_cols: Vec<&str> = dimensions
            .iter()
            .copied()
            .filter(|d| *d != date_column)
            .collect();

        let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, row) in self.rows.iter().enumerate() {
            let key: Vec<&Value> = group_cols.iter().map(|c| Table::get(row, c)).collect();
            groups.entry(key_string(&key)).or_default().push(i);
        }

        for m in measures {
            self.push_column(format!("{}{}", m, DIFF_SUFFIX));
        }

        for indices in groups.values_mut() {
            indices.sort_by(|a, b| {
                cmp_values(
                    Table::get(&self.rows[*a], date_column),
                    Table::get(&self.rows[*b], date_column),
                )
            });
            for m in measures {
                let column = format!("{}{}", m, DIFF_SUFFIX);
                let mut previous: Option<Value> = None;
                for &i in indices.iter() {
                    let current = Table::get(&self.rows[i], m).clone();
                    let value = if current.is_null() {
                        Value::Null
                    } else {
                        match previous.replace(current.clone()) {
                            Some(p) => diff(&current, &p),
                            None => current,
                        }
                    };
                    self.rows[i].insert(column.clone(), value);
                }
            }
        }
    }

    /// Rename every column with [`sanitize_column_name`].
    pub fn sanitize_column_names(&mut self) {
        let renames: Vec<(String, String)> = self
            .columns
            .iter()
            .map(|c| (c.clone(), sanitize_column_name(c)))
            .filter(|(from, to)| from != to)
            .collect();
        if renames.is_empty() {
            return;
        }
        for (from, to) in &renames {
            if let Some(c) = self.columns.iter_mut().find(|c| *c == from) {
                *c = to.clone();
            }
        }
        for row in &mut self.rows {
            let renamed: Record = std::mem::take(row)
                .into_iter()
                .map(|(k, v)| (sanitize_column_name(&k), v))
                .collect();
            *row = renamed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(values: Value) -> Table {
        match values {
            Value::Array(items) => Table::from_values(items),
            _ => panic!("expected array"),
        }
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize_column_name("vax_1_%_15+"), "vax_1_percent_15");
        assert_eq!(sanitize_column_name("population_15+"), "population_15");
        assert_eq!(sanitize_column_name("Measure Name"), "Measure_Name");
        assert_eq!(sanitize_column_name("vax_2_%"), "vax_2_percent");
    }

    #[test]
    fn test_dimensions_id_is_stable_and_distinct() {
        let mut t = table(json!([
            { "date": "2021-09-01", "state_code": "NSW", "confirmed": 1 },
            { "date": "2021-09-01", "state_code": "NSW", "confirmed": 9 },
            { "date": "2021-09-01", "state_code": "VIC", "confirmed": 1 },
        ]));
        t.with_dimensions_id(&["date", "state_code"]);
        let ids: Vec<&Value> = t.rows().iter().map(|r| &r[DIMENSIONS_ID]).collect();
        assert_eq!(ids[0], ids[1]);
        assert_ne!(ids[0], ids[2]);
        assert_eq!(ids[0].as_str().unwrap().len(), 32);

        let expected = dimensions_id(&[&json!("2021-09-01"), &json!("NSW")]);
        assert_eq!(ids[0], &json!(expected));
    }

    #[test]
    fn test_diff_per_group_in_date_order() {
        let mut t = table(json!([
            { "date": "2021-09-03", "state_code": "NSW", "vax_1_dose": 180 },
            { "date": "2021-09-01", "state_code": "NSW", "vax_1_dose": 100 },
            { "date": "2021-09-01", "state_code": "VIC", "vax_1_dose": 50 },
            { "date": "2021-09-02", "state_code": "NSW", "vax_1_dose": null },
        ]));
        t.with_diff_columns(&["date", "state_code"], "date", &["vax_1_dose"]);
        assert!(t.has_column("vax_1_dose_diff"));
        assert_eq!(t.rows()[1]["vax_1_dose_diff"], 100);
        assert_eq!(t.rows()[3]["vax_1_dose_diff"], Value::Null);
        assert_eq!(t.rows()[0]["vax_1_dose_diff"], 80);
        assert_eq!(t.rows()[2]["vax_1_dose_diff"], 50);
    }

    #[test]
    fn test_diff_of_floats() {
        let mut t = table(json!([
            { "date": "d1", "vax_1_%": 0.25 },
            { "date": "d2", "vax_1_%": 0.5 },
        ]));
        t.with_diff_columns(&["date"], "date", &["vax_1_%"]);
        assert_eq!(t.rows()[1]["vax_1_%_diff"], 0.25);
    }

    #[test]
    fn test_sanitize_column_names_rewrites_rows() {
        let mut t = table(json!([{ "vax_1_%_15+": 80.5, "lga_name": "Albury" }]));
        t.sanitize_column_names();
        assert_eq!(t.columns(), ["vax_1_percent_15", "lga_name"]);
        assert_eq!(t.rows()[0]["vax_1_percent_15"], 80.5);
    }
}

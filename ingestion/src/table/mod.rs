//! The common tabular shape every source is normalized into.
//!
//! A [`Table`] is an ordered list of columns plus rows stored as JSON
//! objects. Missing keys read as null, so tables from different sources can
//! be concatenated and merged without padding every row first.
//!
//! ```text
//! retrieve ──▶ Table ──▶ rename / group_count / merge ──▶ keys ──▶ validate ──▶ sink
//! ```

pub mod keys;
pub mod value;

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

use crate::error::{TableError, TableResult};
use value::{cmp_keys, key_string};

pub use keys::sanitize_column_name;

/// One row.
pub type Record = Map<String, Value>;

static NULL: Value = Value::Null;

/// Join type for [`Table::merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Keep only rows whose key appears on both sides.
    Inner,
    /// Keep every row from both sides.
    Outer,
}

/// Ordered columns plus rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Record>,
}

impl Table {
    /// Empty table with the given columns.
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        let mut table = Self::default();
        for c in columns {
            table.push_column(c);
        }
        table
    }

    /// Build from records; columns are taken in first-appearance order.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let mut table = Self::default();
        for r in records {
            table.push_row(r);
        }
        table
    }

    /// Build from JSON values, ignoring anything that is not an object.
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        Self::from_records(values.into_iter().filter_map(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        }))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Record> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Cell value, null when the key is absent.
    pub fn get<'a>(row: &'a Record, column: &str) -> &'a Value {
        row.get(column).unwrap_or(&NULL)
    }

    /// Add a column (no-op if present). Existing rows read it as null.
    pub fn push_column(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.has_column(&name) {
            self.columns.push(name);
        }
    }

    /// Append a row, registering any new column.
    pub fn push_row(&mut self, row: Record) {
        for key in row.keys() {
            if !self.has_column(key) {
                self.columns.push(key.clone());
            }
        }
        self.rows.push(row);
    }

    fn require(&self, columns: &[&str]) -> TableResult<()> {
        match columns.iter().find(|c| !self.has_column(c)) {
            Some(c) => Err(TableError::MissingColumn((*c).to_string())),
            None => Ok(()),
        }
    }

    /// Rename columns; pairs whose source column is absent are ignored.
    pub fn rename(&mut self, pairs: &[(&str, &str)]) {
        for (from, to) in pairs {
            if from == to || !self.has_column(from) {
                continue;
            }
            self.columns.retain(|c| c != to);
            if let Some(c) = self.columns.iter_mut().find(|c| c == from) {
                *c = (*to).to_string();
            }
            for row in &mut self.rows {
                match row.remove(*from) {
                    Some(v) => {
                        row.insert((*to).to_string(), v);
                    }
                    None => {
                        row.remove(*to);
                    }
                }
            }
        }
    }

    /// Remove columns; absent names are ignored.
    pub fn drop_columns(&mut self, columns: &[&str]) {
        self.columns.retain(|c| !columns.contains(&c.as_str()));
        for row in &mut self.rows {
            for c in columns {
                row.remove(*c);
            }
        }
    }

    /// New table with only the given columns, in that order.
    pub fn select(&self, columns: &[&str]) -> TableResult<Table> {
        self.require(columns)?;
        let rows = self
            .rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| ((*c).to_string(), Self::get(row, c).clone()))
                    .collect::<Record>()
            })
            .collect();
        Ok(Table {
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            rows,
        })
    }

    /// Set a column to the same value on every row.
    pub fn add_constant(&mut self, column: &str, value: Value) {
        self.push_column(column);
        for row in &mut self.rows {
            row.insert(column.to_string(), value.clone());
        }
    }

    /// Transform an existing column cell by cell.
    pub fn map_column<F>(&mut self, column: &str, mut f: F) -> TableResult<()>
    where
        F: FnMut(&Value) -> TableResult<Value>,
    {
        self.require(&[column])?;
        for row in &mut self.rows {
            let next = f(Self::get(row, column))?;
            row.insert(column.to_string(), next);
        }
        Ok(())
    }

    /// Compute a column from whole rows, creating or overwriting it.
    pub fn derive_column<F>(&mut self, column: &str, mut f: F) -> TableResult<()>
    where
        F: FnMut(&Record) -> TableResult<Value>,
    {
        self.push_column(column);
        for row in &mut self.rows {
            let next = f(row)?;
            row.insert(column.to_string(), next);
        }
        Ok(())
    }

    /// Replace every cell equal to `from` with `to`.
    pub fn replace_values(&mut self, from: &Value, to: Value) {
        for row in &mut self.rows {
            for v in row.values_mut() {
                if v == from {
                    *v = to.clone();
                }
            }
        }
    }

    fn key<'a>(row: &'a Record, columns: &[&str]) -> Vec<&'a Value> {
        columns.iter().map(|c| Self::get(row, c)).collect()
    }

    /// Count rows per key tuple into `count_column`.
    ///
    /// Output rows are sorted by key. Null keys form their own group.
    pub fn group_count(&self, keys: &[&str], count_column: &str) -> TableResult<Table> {
        self.require(keys)?;
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<(Vec<&Value>, i64)> = Vec::new();

        for row in &self.rows {
            let key = Self::key(row, keys);
            match index.get(&key_string(&key)) {
                Some(&i) => groups[i].1 += 1,
                None => {
                    index.insert(key_string(&key), groups.len());
                    groups.push((key, 1));
                }
            }
        }
        groups.sort_by(|a, b| cmp_keys(&a.0, &b.0));

        let mut out = Table::new(keys.iter().copied().chain([count_column]));
        for (key, count) in groups {
            let mut row: Record = keys
                .iter()
                .zip(key)
                .map(|(c, v)| ((*c).to_string(), v.clone()))
                .collect();
            row.insert(count_column.to_string(), Value::from(count));
            out.rows.push(row);
        }
        Ok(out)
    }

    /// Drop repeated rows, keeping the first. `subset` limits the compared columns.
    pub fn drop_duplicates(&mut self, subset: Option<&[&str]>) {
        let all: Vec<&str> = self.columns.iter().map(String::as_str).collect();
        let cols = subset.unwrap_or(&all);
        let mut seen = HashSet::new();
        let keys: Vec<bool> = self
            .rows
            .iter()
            .map(|row| seen.insert(key_string(&Self::key(row, cols))))
            .collect();
        let mut keep = keys.into_iter();
        self.rows.retain(|_| keep.next().unwrap_or(false));
    }

    /// Stack tables; the column list is the union in first-appearance order.
    pub fn concat(tables: impl IntoIterator<Item = Table>) -> Table {
        let mut out = Table::default();
        for t in tables {
            for c in t.columns {
                out.push_column(c);
            }
            out.rows.extend(t.rows);
        }
        out
    }

    /// Join on every column the two tables share.
    ///
    /// Null keys match null keys. Output columns are the left columns followed
    /// by the right-only columns. With [`JoinKind::Outer`], unmatched right
    /// rows follow the left rows. Without common columns the result is a
    /// cross join.
    pub fn merge(&self, right: &Table, how: JoinKind) -> Table {
        let on: Vec<&str> = self
            .columns
            .iter()
            .filter(|c| right.has_column(c))
            .map(String::as_str)
            .collect();

        let mut right_index: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, row) in right.rows.iter().enumerate() {
            right_index
                .entry(key_string(&Self::key(row, &on)))
                .or_default()
                .push(i);
        }

        let mut out = Table::new(self.columns.iter().cloned());
        for c in &right.columns {
            out.push_column(c.clone());
        }

        let mut matched = vec![false; right.rows.len()];
        for left in &self.rows {
            match right_index.get(&key_string(&Self::key(left, &on))) {
                Some(hits) => {
                    for &i in hits {
                        matched[i] = true;
                        let mut row = left.clone();
                        for (k, v) in &right.rows[i] {
                            if !on.contains(&k.as_str()) {
                                row.insert(k.clone(), v.clone());
                            }
                        }
                        out.rows.push(row);
                    }
                }
                None if how == JoinKind::Outer => out.rows.push(left.clone()),
                None => {}
            }
        }

        if how == JoinKind::Outer {
            for (i, row) in right.rows.iter().enumerate() {
                if !matched[i] {
                    out.rows.push(row.clone());
                }
            }
        }
        out
    }

    /// Stable sort by the given columns.
    pub fn sort_by(&mut self, columns: &[&str]) {
        self.rows
            .sort_by(|a, b| cmp_keys(&Self::key(a, columns), &Self::key(b, columns)));
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
    fn test_columns_follow_first_appearance() {
        let t = table(json!([{ "a": 1, "b": 2 }, { "c": 3 }]));
        assert_eq!(t.columns(), ["a", "b", "c"]);
        assert_eq!(Table::get(&t.rows()[1], "a"), &Value::Null);
    }

    #[test]
    fn test_rename_and_drop() {
        let mut t = table(json!([{ "state": "NSW", "_id": 1, "x": 5 }]));
        t.rename(&[("state", "state_code"), ("missing", "other")]);
        t.drop_columns(&["_id"]);
        assert_eq!(t.columns(), ["state_code", "x"]);
        assert_eq!(t.rows()[0]["state_code"], "NSW");
        assert!(t.rows()[0].get("_id").is_none());
    }

    #[test]
    fn test_group_count_sorted_with_null_group() {
        let t = table(json!([
            { "date": "2021-01-02", "lga": "A" },
            { "date": "2021-01-01", "lga": "B" },
            { "date": "2021-01-02", "lga": "A" },
            { "date": "2021-01-01", "lga": null },
        ]));
        let g = t.group_count(&["date", "lga"], "case_count").unwrap();
        assert_eq!(g.columns(), ["date", "lga", "case_count"]);
        assert_eq!(g.len(), 3);
        assert_eq!(g.rows()[0]["lga"], Value::Null);
        assert_eq!(g.rows()[1]["lga"], "B");
        assert_eq!(g.rows()[2]["case_count"], 2);
    }

    #[test]
    fn test_group_count_missing_key() {
        let t = table(json!([{ "a": 1 }]));
        let err = t.group_count(&["b"], "n").unwrap_err();
        assert!(err.to_string().contains("b"));
    }

    #[test]
    fn test_columns_in_first_appearance_order() {
        let t = table(json!([
            { "state_code": "NSW", "date": "d1", "confirmed": 1 },
            { "date": "d2", "vax_1_dose": 5, "age_group": "20-24" },
        ]));
        assert_eq!(t.columns(), ["state_code", "date", "confirmed", "vax_1_dose", "age_group"]);
        let keys: Vec<&String> = t.rows()[0].keys().collect();
        assert_eq!(keys, ["state_code", "date", "confirmed"]);
    }

    #[test]
    fn test_outer_merge_on_common_columns() {
        let left = table(json!([
            { "date": "d1", "state_code": "NSW", "confirmed": 10 },
            { "date": "d2", "state_code": "NSW", "confirmed": 12 },
        ]));
        let right = table(json!([
            { "date": "d1", "state_code": "NSW", "vax_1_dose": 100 },
            { "date": "d3", "state_code": "NSW", "vax_1_dose": 150 },
        ]));
        let m = left.merge(&right, JoinKind::Outer);
        assert_eq!(m.columns(), ["date", "state_code", "confirmed", "vax_1_dose"]);
        assert_eq!(m.len(), 3);
        assert_eq!(m.rows()[0]["vax_1_dose"], 100);
        assert!(m.rows()[1].get("vax_1_dose").is_none());
        assert_eq!(m.rows()[2]["date"], "d3");
    }

    #[test]
    fn test_inner_merge_null_matches_null() {
        let left = table(json!([
            { "lga_name": "Albury", "pct": 80.0 },
            { "lga_name": null, "pct": 50.0 },
            { "lga_name": "Nowhere", "pct": 10.0 },
        ]));
        let right = table(json!([
            { "lga_name": "Albury", "lhd_code": "X760" },
            { "lga_name": null, "lhd_code": "X999" },
        ]));
        let m = left.merge(&right, JoinKind::Inner);
        assert_eq!(m.len(), 2);
        assert_eq!(m.rows()[0]["lhd_code"], "X760");
        assert_eq!(m.rows()[1]["lhd_code"], "X999");
    }

    #[test]
    fn test_drop_duplicates_subset() {
        let mut t = table(json!([
            { "a": 1, "b": 1 },
            { "a": 1, "b": 2 },
            { "a": 1, "b": 1 },
        ]));
        t.drop_duplicates(None);
        assert_eq!(t.len(), 2);
        t.drop_duplicates(Some(&["a"]));
        assert_eq!(t.len(), 1);
        assert_eq!(t.rows()[0]["b"], 1);
    }

    #[test]
    fn test_concat_and_replace() {
        let a = table(json!([{ "x": "None" }]));
        let b = table(json!([{ "y": 2 }]));
        let mut c = Table::concat([a, b]);
        c.replace_values(&json!("None"), Value::Null);
        assert_eq!(c.columns(), ["x", "y"]);
        assert_eq!(c.rows()[0]["x"], Value::Null);
    }

    #[test]
    fn test_map_and_derive() {
        let mut t = table(json!([{ "pct": "85%" }]));
        t.map_column("pct", |v| {
            Ok(json!(v.as_str().unwrap_or("").trim_end_matches('%')))
        })
        .unwrap();
        t.derive_column("flag", |row| Ok(json!(row["pct"] == "85"))).unwrap();
        assert_eq!(t.rows()[0]["flag"], true);
        assert!(t.map_column("nope", |v| Ok(v.clone())).is_err());
    }
}

//! JSON Schema validation of processed tables.
//!
//! Every row is checked as a JSON object against a Draft 7 schema. Sources
//! ship their schema embedded at compile time (`schemas/` directory); a
//! source without one is checked against a schema inferred from the table
//! itself, which catches columns mixing types.
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use covid_ingest::validation::validate;
//!
//! let schema = json!({
//!     "type": "object",
//!     "required": ["date"],
//!     "properties": { "date": { "type": "string" } }
//! });
//! assert!(validate(&schema, &json!({ "date": "2021-09-05" })).is_ok());
//! assert!(validate(&schema, &json!({ "day": 5 })).is_err());
//! ```

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::error::ValidationError;
use crate::table::Table;

/// Failing rows kept in a [`ValidationError::Rows`] report.
pub const MAX_REPORTED_ROWS: usize = 10;

/// Validate one JSON value against a schema.
///
/// Returns every error message when invalid.
pub fn validate(schema: &Value, data: &Value) -> Result<(), Vec<String>> {
    let validator = jsonschema::draft7::new(schema)
        .map_err(|e| vec![format!("Invalid schema: {}", e)])?;

    let errors: Vec<String> = validator.iter_errors(data).map(|e| e.to_string()).collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Same as [`validate`], as a boolean.
pub fn is_valid(schema: &Value, data: &Value) -> bool {
    jsonschema::draft7::is_valid(schema, data)
}

/// Row as a full object: every table column present, absent cells null.
fn row_object(table: &Table, index: usize) -> Value {
    let row = &table.rows()[index];
    let object: Map<String, Value> = table
        .columns()
        .iter()
        .map(|c| (c.clone(), Table::get(row, c).clone()))
        .collect();
    Value::Object(object)
}

/// Validate every row of `table`.
///
/// The error lists the first [`MAX_REPORTED_ROWS`] failing rows with their
/// messages, plus the total count.
pub fn validate_table(table: &Table, schema: &Value) -> Result<(), ValidationError> {
    let validator =
        jsonschema::draft7::new(schema).map_err(|e| ValidationError::InvalidSchema(e.to_string()))?;

    let mut invalid = 0;
    let mut reported = Vec::new();
    for i in 0..table.len() {
        let row = row_object(table, i);
        let errors: Vec<String> = validator.iter_errors(&row).map(|e| e.to_string()).collect();
        if errors.is_empty() {
            continue;
        }
        invalid += 1;
        if reported.len() < MAX_REPORTED_ROWS {
            reported.push((i, errors));
        }
    }

    if invalid == 0 {
        debug!(rows = table.len(), "all rows valid");
        return Ok(());
    }
    for (i, errors) in &reported {
        warn!("Row {} invalid: {}", i, errors.join("; "));
    }
    Err(ValidationError::Rows {
        invalid,
        total: table.len(),
        rows: reported,
    })
}

/// Validate against schema text (an embedded schema file).
pub fn validate_table_str(table: &Table, schema_text: &str) -> Result<(), ValidationError> {
    let schema: Value = serde_json::from_str(schema_text)
        .map_err(|e| ValidationError::InvalidSchema(e.to_string()))?;
    validate_table(table, &schema)
}

fn json_type(v: &Value) -> Option<&'static str> {
    match v {
        Value::Null => None,
        Value::Bool(_) => Some("boolean"),
        Value::Number(_) => Some("number"),
        Value::String(_) => Some("string"),
        Value::Array(_) => Some("array"),
        Value::Object(_) => Some("object"),
    }
}

/// Schema derived from the table: each column nullable and typed after its
/// first non-null value. Integers are typed `number` so floats still pass.
pub fn infer_schema(table: &Table) -> Value {
    let properties: Map<String, Value> = table
        .columns()
        .iter()
        .map(|c| {
            let kind = table
                .rows()
                .iter()
                .find_map(|row| json_type(Table::get(row, c)));
            let property = match kind {
                Some(t) => json!({ "type": [t, "null"] }),
                None => json!({}),
            };
            (c.clone(), property)
        })
        .collect();

    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": table.columns(),
        "properties": properties,
    })
}

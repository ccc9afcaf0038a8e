//! Helpers for the JSON cell values stored in a [`super::Table`].

use serde_json::{Number, Value};
use std::cmp::Ordering;

/// Total order over cell values: null < bool < number < string < other.
///
/// Numbers compare numerically, strings lexically (ISO dates sort correctly).
pub fn cmp_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            match (x.as_i64(), y.as_i64()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => {
                    let x = x.as_f64().unwrap_or(f64::NAN);
                    let y = y.as_f64().unwrap_or(f64::NAN);
                    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
                }
            }
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)).then_with(|| a.to_string().cmp(&b.to_string())),
    }
}

/// Compare two rows column by column.
pub fn cmp_keys(a: &[&Value], b: &[&Value]) -> Ordering {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| cmp_values(x, y))
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

/// Canonical string form of a key tuple, usable as a hash map key.
pub fn key_string(values: &[&Value]) -> String {
    serde_json::to_string(values).unwrap_or_default()
}

/// Numeric view of a cell: numbers as-is, numeric strings parsed.
pub fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// JSON number from an `f64`, or null for NaN and infinities.
pub fn number(x: f64) -> Value {
    Number::from_f64(x).map(Value::Number).unwrap_or(Value::Null)
}

/// Interpret a raw text cell.
///
/// Empty text becomes null, integers and floats become numbers, everything
/// else stays a string. Text with leading zeros (postcodes, LGA codes) is kept
/// as a string so identifiers survive.
pub fn coerce(raw: &str) -> Value {
    let text = raw.trim();
    if text.is_empty() {
        return Value::Null;
    }
    let digits = text.strip_prefix('-').unwrap_or(text);
    let leading_zero = digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.");
    if !leading_zero {
        if let Ok(i) = text.parse::<i64>() {
            return Value::from(i);
        }
        if text.chars().any(|c| c.is_ascii_digit()) {
            if let Ok(f) = text.parse::<f64>() {
                if f.is_finite() {
                    return number(f);
                }
            }
        }
    }
    Value::String(text.to_string())
}

/// Render a cell for a text sink: null is empty, strings are raw, the rest is JSON.
pub fn to_cell(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

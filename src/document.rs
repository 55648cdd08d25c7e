//! Null-tolerant lookups over a raw upstream document.
//!
//! Every accessor treats a missing key, a JSON `null`, and a value of the
//! wrong shape the same way: as absent. Callers pick the default.

use serde_json::Value;

/// Walks `path` through nested objects. Returns `None` on the first missing
/// key, `null`, or non-object step.
pub fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for key in path {
        current = current.as_object()?.get(*key)?;
    }
    if current.is_null() {
        return None;
    }
    Some(current)
}

/// String at `path`, trimmed. Empty strings count as absent.
pub fn text<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    let s = lookup(value, path)?.as_str()?.trim();
    if s.is_empty() { None } else { Some(s) }
}

/// Scalar at `path` rendered as a string (numbers included).
pub fn scalar_text(value: &Value, path: &[&str]) -> Option<String> {
    match lookup(value, path)? {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() { None } else { Some(s.to_owned()) }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Number at `path`. Numeric strings are accepted, with spaces used as
/// thousands separators and a decimal comma.
pub fn number(value: &Value, path: &[&str]) -> Option<f64> {
    let parsed = match lookup(value, path)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => parse_number(s)?,
        _ => return None,
    };
    parsed.is_finite().then_some(parsed)
}

/// Integer at `path`. Fractional numbers are truncated toward zero.
pub fn integer(value: &Value, path: &[&str]) -> Option<i64> {
    match lookup(value, path)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(_) => number(value, path).map(|f| f.trunc() as i64),
        _ => None,
    }
}

/// Truthiness of the value at `path`; absent is `false`.
pub fn flag(value: &Value, path: &[&str]) -> bool {
    match lookup(value, path) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1"),
        _ => false,
    }
}

/// Array at `path` with `null` entries skipped; absent yields an empty iterator.
pub fn items<'a>(value: &'a Value, path: &[&str]) -> impl Iterator<Item = &'a Value> + use<'a> {
    lookup(value, path)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|item| !item.is_null())
}

fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

//! Optional-chaining accessors over `serde_json::Value`.
//!
//! The retailer payload is loosely shaped: keys go missing, collections arrive
//! either as objects keyed by internal ids or as arrays, and numbers are
//! sometimes strings. Every lookup here returns `None` (or an empty slice)
//! instead of guessing a default.
use serde_json::Value;

/// First entry of a collection: first value of an object (payload order) or
/// first element of an array. `None` for empty collections and scalars.
pub fn first_entry(v: &Value) -> Option<&Value> {
    match v {
        Value::Object(map) => map.values().next(),
        Value::Array(items) => items.first(),
        _ => None,
    }
}

/// `v[key]` as an array slice; missing keys and non-arrays yield `&[]`.
pub fn array_field<'a>(v: &'a Value, key: &str) -> &'a [Value] {
    v.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// `v[key]` as a string, trimmed; empty strings count as absent.
pub fn non_empty_str<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Render a scalar the way it would print: strings as-is (non-empty), numbers
/// in their JSON form. Barcodes and weights show up as either.
pub fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Numeric value from a number or a numeric string. Decimal commas are not
/// accepted.
pub fn value_as_f64(v: &Value) -> Option<f64> {
    if let Some(n) = v.as_f64() {
        return Some(n);
    }
    v.as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|n| n.is_finite())
}

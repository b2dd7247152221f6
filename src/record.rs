//! # Untyped source records
//!
//! Vendor payloads arrive as string-keyed maps of arbitrary values. They are carried through
//! the pipeline as a [`RawRecord`] whose values are a closed tagged union, [`RawValue`], so the
//! mapping plan and the validators never depend on runtime type inspection.
//!
//! Lookups accept a flat key first and then fall back to a dotted path into nested maps, which
//! lets the same plan read `{"location.lat": 1.0}` (a flattened file row) and
//! `{"location": {"lat": 1.0}}` (a nested webhook body).
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One source record, keyed by the vendor's field names.
pub type RawRecord = BTreeMap<String, RawValue>;

/// Scalar-or-nested value of a source record.
///
/// Serialization is untagged so that a record round-trips to the same plain JSON it was read
/// from: every record produced by [`record_from_json`] or the file readers deserializes back
/// equal to itself.
///
/// `Timestamp` is the one lossy variant. It only appears for records built in-process with an
/// already-typed time, serializes as an RFC 3339 string, and therefore reads back as `Text`
/// (which [`repair_timestamp`](crate::validation::repair_timestamp) maps to the same instant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    List(Vec<RawValue>),
    Map(RawRecord),
}

impl RawValue {
    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }

    /// Numeric view of the value.
    ///
    /// `Int`, `Float` and text holding a finite number are numeric. Everything else,
    /// including non-finite floats, yields `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Int(i) => Some(*i as f64),
            RawValue::Float(f) if f.is_finite() => Some(*f),
            RawValue::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
    }

    /// Text view used for identifiers: numbers and booleans are rendered, containers are not.
    pub fn as_text(&self) -> Option<String> {
        match self {
            RawValue::Text(s) => Some(s.clone()),
            RawValue::Int(i) => Some(i.to_string()),
            RawValue::Float(f) => Some(f.to_string()),
            RawValue::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            RawValue::Null => "null",
            RawValue::Bool(_) => "bool",
            RawValue::Int(_) => "int",
            RawValue::Float(_) => "float",
            RawValue::Text(_) => "text",
            RawValue::Timestamp(_) => "timestamp",
            RawValue::List(_) => "list",
            RawValue::Map(_) => "map",
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Null => write!(f, "null"),
            RawValue::Bool(b) => write!(f, "{b}"),
            RawValue::Int(i) => write!(f, "{i}"),
            RawValue::Float(x) => write!(f, "{x}"),
            RawValue::Text(s) => write!(f, "{s:?}"),
            RawValue::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            RawValue::List(items) => write!(f, "[{} items]", items.len()),
            RawValue::Map(map) => write!(f, "{{{} fields}}", map.len()),
        }
    }
}

impl From<serde_json::Value> for RawValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => RawValue::Null,
            serde_json::Value::Bool(b) => RawValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => RawValue::Int(i),
                None => n.as_f64().map(RawValue::Float).unwrap_or(RawValue::Null),
            },
            serde_json::Value::String(s) => RawValue::Text(s),
            serde_json::Value::Array(items) => {
                RawValue::List(items.into_iter().map(RawValue::from).collect())
            }
            serde_json::Value::Object(map) => RawValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, RawValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Float(value)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        RawValue::Int(value)
    }
}

impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        RawValue::Bool(value)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Text(value)
    }
}

impl From<DateTime<Utc>> for RawValue {
    fn from(value: DateTime<Utc>) -> Self {
        RawValue::Timestamp(value)
    }
}

/// Convert a JSON object into a [`RawRecord`]. Non-object values yield `None`.
pub fn record_from_json(value: serde_json::Value) -> Option<RawRecord> {
    match RawValue::from(value) {
        RawValue::Map(map) => Some(map),
        _ => None,
    }
}

/// Resolve `key` in `record`: exact flat key first, then a dotted path through nested maps.
pub fn lookup<'a>(record: &'a RawRecord, key: &str) -> Option<&'a RawValue> {
    if let Some(value) = record.get(key) {
        return Some(value);
    }
    if !key.contains('.') {
        return None;
    }

    let mut segments = key.split('.');
    let first = segments.next()?;
    let mut current = record.get(first)?;
    for segment in segments {
        match current {
            RawValue::Map(inner) => current = inner.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

/// Build a record from `(key, value)` pairs; handy in tests and demos.
///
/// ```
/// use bhulan::record::{raw_record, RawValue};
///
/// let rec = raw_record([("device_id", RawValue::from("T1")), ("lat", RawValue::from(1.0))]);
/// assert_eq!(rec.len(), 2);
/// ```
pub fn raw_record<K, I>(pairs: I) -> RawRecord
where
    K: Into<String>,
    I: IntoIterator<Item = (K, RawValue)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

#[cfg(test)]
mod record_test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_keeps_integer_and_float_apart() {
        let rec = record_from_json(json!({"a": 3, "b": 3.5, "c": "x", "d": null})).unwrap();
        assert_eq!(rec["a"], RawValue::Int(3));
        assert_eq!(rec["b"], RawValue::Float(3.5));
        assert_eq!(rec["c"], RawValue::Text("x".into()));
        assert!(rec["d"].is_null());
    }

    #[test]
    fn test_json_sourced_record_round_trips() {
        let rec = record_from_json(json!({
            "device": {"id": "S-1", "tags": ["a", 2, null]},
            "time": "2024-05-01T12:00:00Z",
            "lat": 51.5,
            "count": 3,
            "moving": true,
        }))
        .unwrap();
        let text = serde_json::to_string(&rec).unwrap();
        let back: RawRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn test_timestamp_reads_back_as_text() {
        use crate::validation::repair_timestamp;
        use chrono::TimeZone;

        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let rec = raw_record([("ts", RawValue::from(ts))]);
        let back: RawRecord = serde_json::from_str(&serde_json::to_string(&rec).unwrap()).unwrap();

        assert!(matches!(&back["ts"], RawValue::Text(s) if s.starts_with("2024-05-01T12:00:00")));
        assert_eq!(repair_timestamp(&back["ts"]).unwrap(), ts);
    }

    #[test]
    fn test_non_object_json_is_not_a_record() {
        assert!(record_from_json(json!([1, 2])).is_none());
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(RawValue::Text(" 36.0 ".into()).as_f64(), Some(36.0));
        assert_eq!(RawValue::Int(7).as_f64(), Some(7.0));
        assert_eq!(RawValue::Text("fast".into()).as_f64(), None);
        assert_eq!(RawValue::Text("NaN".into()).as_f64(), None);
        assert_eq!(RawValue::Float(f64::INFINITY).as_f64(), None);
        assert_eq!(RawValue::Bool(true).as_f64(), None);
    }

    #[test]
    fn test_lookup_prefers_flat_key_then_dotted_path() {
        let nested = record_from_json(json!({"location": {"lat": 1.5}})).unwrap();
        assert_eq!(lookup(&nested, "location.lat"), Some(&RawValue::Float(1.5)));
        assert_eq!(lookup(&nested, "location.lng"), None);

        let flat = record_from_json(json!({"location.lat": 2.5, "location": {"lat": 1.5}})).unwrap();
        assert_eq!(lookup(&flat, "location.lat"), Some(&RawValue::Float(2.5)));
    }

    #[test]
    fn test_dotted_path_through_scalar_is_absent() {
        let rec = record_from_json(json!({"device": "abc"})).unwrap();
        assert_eq!(lookup(&rec, "device.id"), None);
    }

    #[test]
    fn test_serialization_round_trips_plain_json() {
        let value = json!({"device": {"id": "T1"}, "speed": 12, "tags": ["a", true]});
        let rec = record_from_json(value.clone()).unwrap();
        assert_eq!(serde_json::to_value(&rec).unwrap(), value);
    }
}

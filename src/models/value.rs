//! Field values as they come out of the log store
//!
//! The store can hand back more kinds of values than JSON can carry (raw
//! bytes, native timestamps, non-finite floats). Everything leaving the crate
//! goes through [`StoreValue::into_wire`], which maps onto the closed set
//! {string, number, boolean, sequence, mapping, null} and falls back to the
//! value's string form for anything else.

use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::timestamp;

#[derive(Debug, Clone, PartialEq)]
pub enum StoreValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    /// Already-structured JSON (from a JSON/JSONB column or a details payload)
    Json(Value),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
}

impl StoreValue {
    pub fn into_wire(self) -> Value {
        match self {
            StoreValue::Null => Value::Null,
            StoreValue::Bool(b) => Value::Bool(b),
            StoreValue::Integer(i) => Value::Number(i.into()),
            StoreValue::Real(f) => Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(f.to_string())),
            StoreValue::Text(s) => Value::String(s),
            StoreValue::Json(v) => v,
            other => Value::String(other.to_string()),
        }
    }
}

impl fmt::Display for StoreValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreValue::Null => f.write_str("null"),
            StoreValue::Bool(b) => write!(f, "{b}"),
            StoreValue::Integer(i) => write!(f, "{i}"),
            StoreValue::Real(r) => write!(f, "{r}"),
            StoreValue::Text(s) => f.write_str(s),
            StoreValue::Json(v) => write!(f, "{v}"),
            StoreValue::Bytes(bytes) => {
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            StoreValue::Timestamp(ts) => f.write_str(&timestamp::format_canonical(ts)),
        }
    }
}

/// Convert a map of store values into a JSON object.
pub fn into_wire_map(fields: BTreeMap<String, StoreValue>) -> Map<String, Value> {
    fields
        .into_iter()
        .map(|(name, value)| (name, value.into_wire()))
        .collect()
}

/// Decode a JSON details payload into store values.
///
/// A payload that is not a JSON object is kept whole under `key` as its
/// string form rather than being dropped.
pub fn decode_details(key: &str, raw: Option<&str>) -> BTreeMap<String, StoreValue> {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return BTreeMap::new();
    };

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map
            .into_iter()
            .map(|(name, value)| (name, StoreValue::Json(value)))
            .collect(),
        Ok(Value::Null) => BTreeMap::new(),
        _ => BTreeMap::from([(key.to_string(), StoreValue::Text(raw.to_string()))]),
    }
}

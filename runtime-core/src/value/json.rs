//! JSON interchange for property values
//!
//! Property stores and graph definitions round-trip through JSON.
//! Integers narrower than 64 bits survive the round trip without loss
//! (they widen to the 64-bit tag); `ptr` values are never serialized and
//! render as `null`.

use super::Value;
use crate::{Error, Result};

/// Convert a value tree into `serde_json::Value`.
pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(v) => serde_json::Value::Bool(*v),
        Value::I8(v) => (*v).into(),
        Value::I16(v) => (*v).into(),
        Value::I32(v) => (*v).into(),
        Value::I64(v) => (*v).into(),
        Value::U8(v) => (*v).into(),
        Value::U16(v) => (*v).into(),
        Value::U32(v) => (*v).into(),
        Value::U64(v) => (*v).into(),
        Value::F32(v) => serde_json::Number::from_f64(*v as f64)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::F64(v) => serde_json::Number::from_f64(*v)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Str(v) => serde_json::Value::String(v.clone()),
        // Buffers render as byte arrays for diagnostics.
        Value::Buf(v) => serde_json::Value::Array(
            v.iter().map(|b| serde_json::Value::from(*b)).collect(),
        ),
        Value::Ptr(_) => serde_json::Value::Null,
        Value::Arr(items) => {
            serde_json::Value::Array(items.iter().map(to_json).collect())
        }
        Value::Obj(fields) => {
            let mut map = serde_json::Map::new();
            for (k, v) in fields {
                map.insert(k.clone(), to_json(v));
            }
            serde_json::Value::Object(map)
        }
    }
}

/// Convert `serde_json::Value` into a value tree.
///
/// Numbers map onto the widest matching tag: signed integers to `int64`,
/// unsigned integers past `i64::MAX` to `uint64`, everything else to
/// `float64`.
pub fn from_json(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(v) => Value::Bool(*v),
        serde_json::Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Value::I64(v)
            } else if let Some(v) = n.as_u64() {
                Value::U64(v)
            } else {
                Value::F64(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(v) => Value::Str(v.clone()),
        serde_json::Value::Array(items) => {
            Value::Arr(items.iter().map(from_json).collect())
        }
        serde_json::Value::Object(map) => Value::Obj(
            map.iter().map(|(k, v)| (k.clone(), from_json(v))).collect(),
        ),
    }
}

/// Parse a JSON string into a value tree.
pub fn parse(json: &str) -> Result<Value> {
    let parsed: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| Error::InvalidArgument(format!("invalid JSON: {e}")))?;
    Ok(from_json(&parsed))
}

/// Render a value tree as a JSON string.
pub fn to_string(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(&to_json(value))?)
}

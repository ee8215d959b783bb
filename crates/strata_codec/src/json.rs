//! JSON codec, riding on `serde_json`.
//!
//! JSON has no binary type; [`Value::Bin`] serializes as an array of byte
//! values so the output stays valid JSON and survives a round trip as an
//! array of small integers.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Parse a JSON document.
pub fn from_json(bytes: &[u8]) -> CodecResult<Value> {
    let parsed: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| CodecError::decoding_failed(format!("JSON: {e}")))?;
    Ok(from_serde(parsed))
}

/// Serialize a value as JSON, appending to `out`.
pub fn to_json(value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    let serde_value = to_serde(value);
    serde_json::to_writer(&mut *out, &serde_value)
        .map_err(|e| CodecError::encoding_failed(format!("JSON: {e}")))
}

fn from_serde(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                Value::Uint(u)
            } else {
                // `serde_json` numbers are i64, u64, or finite f64.
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::Str(s),
        serde_json::Value::Array(items) => {
            Value::Array(items.into_iter().map(from_serde).collect())
        }
        serde_json::Value::Object(members) => Value::object(
            members
                .into_iter()
                .map(|(name, member)| (name, from_serde(member)))
                .collect(),
        ),
    }
}

fn to_serde(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(n) => serde_json::Value::Number((*n).into()),
        Value::Uint(n) => serde_json::Value::Number((*n).into()),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::Bin(bytes) => serde_json::Value::Array(
            bytes
                .iter()
                .map(|b| serde_json::Value::Number((*b).into()))
                .collect(),
        ),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(to_serde).collect()),
        Value::Object(members) => serde_json::Value::Object(
            members
                .iter()
                .map(|(name, member)| (name.clone(), to_serde(member)))
                .collect(),
        ),
    }
}

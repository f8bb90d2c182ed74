//! Plain (untyped) JSON mapping shared by the JB and MIME envelopes.
//!
//! Values map onto native JSON shapes directly (bool/number/string/array/
//! object); only byte-strings need an envelope-specific marker object,
//! supplied by the caller via `on_bytes`/`resolve_marker`. This is in
//! contrast to the canonical-JSON (`CJ`) envelope, which tags every value
//! so int-vs-float distinctions survive exactly (see `json_typed`).

use super::error::WireError;
use super::value::Value;
use indexmap::IndexMap;
use serde_json::{Map, Number};

const SAFE_INT_MAX: i64 = 1 << 53;

/// Encode `value` into plain JSON, replacing every byte-string with
/// whatever JSON shape `on_bytes` returns for it. `on_bytes` is called in
/// depth-first, left-to-right order — callers that assign sequential blob
/// indices rely on this order matching `decode_direct`'s walk exactly.
pub fn encode_direct<F>(value: &Value, on_bytes: &mut F) -> Result<serde_json::Value, WireError>
where
    F: FnMut(&bytes::Bytes) -> serde_json::Value,
{
    match value {
        Value::Undefined => Ok(serde_json::Value::Null),
        Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Int(i) => {
            if i.unsigned_abs() as i64 > SAFE_INT_MAX {
                return Err(WireError::NumericRange { value: *i });
            }
            Ok(serde_json::Value::Number(Number::from(*i)))
        }
        Value::Float(f) => Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .ok_or_else(|| WireError::CorruptBody {
                reason: "non-finite float".to_string(),
            }),
        Value::Str(s) => Ok(serde_json::Value::String(s.clone())),
        Value::Bytes(b) => Ok(on_bytes(b)),
        Value::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(encode_direct(item, on_bytes)?);
            }
            Ok(serde_json::Value::Array(out))
        }
        Value::Map(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                // Undefined-valued map entries are dropped: JSON has no
                // undefined, and unlike array slots there is no positional
                // hole to preserve.
                if v.is_undefined() {
                    continue;
                }
                out.insert(k.clone(), encode_direct(v, on_bytes)?);
            }
            Ok(serde_json::Value::Object(out))
        }
    }
}

/// Decode plain JSON back into a `Value`. `resolve_marker` is given every
/// JSON object and returns `Some(bytes)` if it recognizes the object as a
/// byte-string marker (consuming a blob slot if appropriate), or `None` if
/// it is ordinary map data.
pub fn decode_direct<F>(json: &serde_json::Value, resolve_marker: &mut F) -> Value
where
    F: FnMut(&Map<String, serde_json::Value>) -> Option<bytes::Bytes>,
{
    match json {
        serde_json::Value::Null => Value::Undefined,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::Str(s.clone()),
        serde_json::Value::Array(items) => {
            Value::List(items.iter().map(|v| decode_direct(v, resolve_marker)).collect())
        }
        serde_json::Value::Object(obj) => {
            if let Some(bytes) = resolve_marker(obj) {
                return Value::Bytes(bytes);
            }
            let mut map = IndexMap::with_capacity(obj.len());
            for (k, v) in obj {
                map.insert(k.clone(), decode_direct(v, resolve_marker));
            }
            Value::Map(map)
        }
    }
}

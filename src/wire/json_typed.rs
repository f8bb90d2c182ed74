//! Tagged (typed) JSON mapping used by the `CJ` envelope.
//!
//! Every value is wrapped as `{"t": <tag>, "v": <payload>}` so that
//! distinctions plain JSON can't express — int vs. float, undefined vs.
//! absent — survive an exact round-trip. Byte-strings are always inlined
//! as base64; `CJ` has no notion of appended blobs (that's `JB`'s job).

use super::error::WireError;
use super::value::Value;
use indexmap::IndexMap;
use serde_json::{json, Map, Number};

const SAFE_INT_MAX: i64 = 1 << 53;

pub fn encode_typed(value: &Value) -> Result<serde_json::Value, WireError> {
    let v = match value {
        Value::Undefined => json!({"t": "u"}),
        Value::Bool(b) => json!({"t": "b", "v": b}),
        Value::Int(i) => {
            if i.unsigned_abs() as i64 > SAFE_INT_MAX {
                return Err(WireError::NumericRange { value: *i });
            }
            json!({"t": "i", "v": Number::from(*i)})
        }
        Value::Float(f) => {
            let n = Number::from_f64(*f).ok_or_else(|| WireError::CorruptBody {
                reason: "non-finite float".to_string(),
            })?;
            json!({"t": "f", "v": n})
        }
        Value::Str(s) => json!({"t": "s", "v": s}),
        Value::Bytes(b) => json!({"t": "bytes", "v": super::b64::encode(b.as_ref())}),
        Value::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(encode_typed(item)?);
            }
            json!({"t": "l", "v": out})
        }
        Value::Map(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), encode_typed(v)?);
            }
            json!({"t": "m", "v": out})
        }
    };
    Ok(v)
}

pub fn decode_typed(json: &serde_json::Value) -> Result<Value, WireError> {
    let obj = json.as_object().ok_or_else(|| WireError::CorruptBody {
        reason: "typed value must be a JSON object".to_string(),
    })?;
    let tag = obj
        .get("t")
        .and_then(|t| t.as_str())
        .ok_or_else(|| WireError::CorruptBody {
            reason: "missing type tag".to_string(),
        })?;
    let v = obj.get("v");
    match tag {
        "u" => Ok(Value::Undefined),
        "b" => Ok(Value::Bool(v.and_then(|v| v.as_bool()).ok_or_else(|| {
            WireError::CorruptBody {
                reason: "bad bool payload".to_string(),
            }
        })?)),
        "i" => Ok(Value::Int(v.and_then(|v| v.as_i64()).ok_or_else(|| {
            WireError::CorruptBody {
                reason: "bad int payload".to_string(),
            }
        })?)),
        "f" => Ok(Value::Float(v.and_then(|v| v.as_f64()).ok_or_else(|| {
            WireError::CorruptBody {
                reason: "bad float payload".to_string(),
            }
        })?)),
        "s" => Ok(Value::Str(
            v.and_then(|v| v.as_str())
                .ok_or_else(|| WireError::CorruptBody {
                    reason: "bad string payload".to_string(),
                })?
                .to_string(),
        )),
        "bytes" => {
            let s = v
                .and_then(|v| v.as_str())
                .ok_or_else(|| WireError::CorruptBody {
                    reason: "bad bytes payload".to_string(),
                })?;
            let decoded = super::b64::decode(s).map_err(|e| WireError::CorruptBody {
                reason: format!("invalid base64: {e}"),
            })?;
            Ok(Value::Bytes(bytes::Bytes::from(decoded)))
        }
        "l" => {
            let arr = v.and_then(|v| v.as_array()).ok_or_else(|| WireError::CorruptBody {
                reason: "bad list payload".to_string(),
            })?;
            let mut out = Vec::with_capacity(arr.len());
            for item in arr {
                out.push(decode_typed(item)?);
            }
            Ok(Value::List(out))
        }
        "m" => {
            let obj = v.and_then(|v| v.as_object()).ok_or_else(|| WireError::CorruptBody {
                reason: "bad map payload".to_string(),
            })?;
            let mut out = IndexMap::with_capacity(obj.len());
            for (k, v) in obj {
                out.insert(k.clone(), decode_typed(v)?);
            }
            Ok(Value::Map(out))
        }
        other => Err(WireError::CorruptBody {
            reason: format!("unknown type tag: {other}"),
        }),
    }
}

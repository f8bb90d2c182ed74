//! The `CJ` (canonical JSON, typed) envelope: `"CJ" major minor "\n"` then
//! one JSON text produced by `json_typed`. No appended blobs — byte-strings
//! are always inlined as base64, trading efficiency for a format that
//! survives round-tripping through plain-JSON-only intermediaries.

use super::error::WireError;
use super::json_typed::{decode_typed, encode_typed};
use super::value::Value;

const MAJOR: u8 = 0;
const MINOR: u8 = 0;

pub fn signature_matches(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && &bytes[0..2] == b"CJ"
}

pub fn encode(value: &Value) -> Result<Vec<u8>, WireError> {
    let json = encode_typed(value)?;
    let text = serde_json::to_string(&json).map_err(|e| WireError::CorruptBody {
        reason: format!("failed to serialize typed json: {e}"),
    })?;
    let mut out = Vec::with_capacity(text.len() + 5);
    out.extend_from_slice(b"CJ");
    out.push(b'0' + MAJOR);
    out.push(b'0' + MINOR);
    out.push(b'\n');
    out.extend_from_slice(text.as_bytes());
    Ok(out)
}

pub fn decode(input: &[u8]) -> Result<Value, WireError> {
    if input.len() < 5 || &input[0..2] != b"CJ" {
        return Err(WireError::CorruptHeader {
            reason: "missing CJ signature".to_string(),
        });
    }
    let major = input[2].checked_sub(b'0').ok_or_else(|| WireError::CorruptHeader {
        reason: "non-numeric major version".to_string(),
    })?;
    if major > MAJOR {
        return Err(WireError::VersionUnsupported { major });
    }
    if input[4] != b'\n' {
        return Err(WireError::CorruptHeader {
            reason: "missing header terminator".to_string(),
        });
    }
    let body = &input[5..];
    let json: serde_json::Value = serde_json::from_slice(body).map_err(|e| WireError::CorruptBody {
        reason: format!("invalid json body: {e}"),
    })?;
    decode_typed(&json)
}

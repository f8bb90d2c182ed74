//! The `MIME` envelope: a multipart encoding modeled on multipart/form-data.
//! The first part is plain JSON (via `json_direct`); byte-strings become
//! `{"__ref": <index>}` markers pointing at later parts, which carry the
//! blobs verbatim in encounter order.
//!
//! ```text
//! header = "MIME;boundary=" uuid LF
//! part   = "--" boundary LF bytes LF
//! trailer = "--" boundary "--" LF
//! ```

use bytes::Bytes;
use uuid::Uuid;

use super::error::WireError;
use super::json_direct::{decode_direct, encode_direct};
use super::value::Value;

fn header_prefix() -> &'static str {
    "MIME;boundary="
}

pub fn signature_matches(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && &bytes[0..4] == b"MIME"
}

pub fn encode(value: &Value) -> Result<Vec<u8>, WireError> {
    let boundary = Uuid::new_v4().to_string();
    let mut blobs: Vec<Bytes> = Vec::new();

    let mut on_bytes = |b: &Bytes| -> serde_json::Value {
        let idx = blobs.len();
        blobs.push(b.clone());
        serde_json::json!({"__ref": idx})
    };

    let json_value = encode_direct(value, &mut on_bytes)?;
    let json_text = serde_json::to_string(&json_value).map_err(|e| WireError::CorruptBody {
        reason: format!("failed to serialize JSON part: {e}"),
    })?;

    let mut out = Vec::new();
    out.extend_from_slice(header_prefix().as_bytes());
    out.extend_from_slice(boundary.as_bytes());
    out.push(b'\n');

    out.extend_from_slice(b"--");
    out.extend_from_slice(boundary.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(json_text.as_bytes());
    out.push(b'\n');

    for blob in &blobs {
        out.extend_from_slice(b"--");
        out.extend_from_slice(boundary.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(blob);
        out.push(b'\n');
    }

    out.extend_from_slice(b"--");
    out.extend_from_slice(boundary.as_bytes());
    out.extend_from_slice(b"--\n");
    Ok(out)
}

pub fn decode(input: &[u8]) -> Result<Value, WireError> {
    let header_end = input
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| WireError::CorruptHeader {
            reason: "no header terminator".to_string(),
        })?;
    let header = std::str::from_utf8(&input[..header_end]).map_err(|_| WireError::CorruptHeader {
        reason: "header is not valid utf-8".to_string(),
    })?;
    let boundary = header
        .strip_prefix(header_prefix())
        .ok_or_else(|| WireError::CorruptHeader {
            reason: "missing boundary parameter".to_string(),
        })?
        .to_string();
    if boundary.is_empty() {
        return Err(WireError::BoundaryMissing);
    }

    let delimiter = format!("--{boundary}\n");
    let trailer = format!("--{boundary}--\n");
    let rest = &input[header_end + 1..];
    let rest_str_bytes = rest;

    let trailer_pos = find_subsequence(rest_str_bytes, trailer.as_bytes())
        .ok_or(WireError::BoundaryMissing)?;
    let body = &rest_str_bytes[..trailer_pos];

    let mut parts: Vec<&[u8]> = Vec::new();
    let mut cursor = 0usize;
    loop {
        let delim_pos = match find_subsequence(&body[cursor..], delimiter.as_bytes()) {
            Some(p) => cursor + p,
            None => break,
        };
        let part_start = delim_pos + delimiter.len();
        let next_delim = find_subsequence(&body[part_start..], delimiter.as_bytes())
            .map(|p| part_start + p)
            .unwrap_or(body.len());
        let mut part_end = next_delim;
        if part_end > part_start && body[part_end - 1] == b'\n' {
            part_end -= 1;
        }
        parts.push(&body[part_start..part_end]);
        cursor = next_delim;
        if next_delim >= body.len() {
            break;
        }
    }

    if parts.is_empty() {
        return Err(WireError::CorruptBody {
            reason: "no parts found".to_string(),
        });
    }

    let json_value: serde_json::Value = serde_json::from_slice(parts[0]).map_err(|e| WireError::CorruptBody {
        reason: format!("invalid json in first part: {e}"),
    })?;
    let blobs: Vec<Bytes> = parts[1..].iter().map(|p| Bytes::copy_from_slice(p)).collect();

    let mut resolve_marker = |obj: &serde_json::Map<String, serde_json::Value>| -> Option<Bytes> {
        let idx = obj.get("__ref")?.as_u64()? as usize;
        blobs.get(idx).cloned()
    };

    Ok(decode_direct(&json_value, &mut resolve_marker))
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn round_trips_mixed_values_with_two_blobs() {
        let mut map = IndexMap::new();
        map.insert("a".to_string(), Value::Bytes(Bytes::from_static(b"one")));
        map.insert("b".to_string(), Value::Bytes(Bytes::from_static(b"two")));
        map.insert("n".to_string(), Value::Int(7));
        let value = Value::Map(map);

        let encoded = encode(&value).unwrap();
        assert!(signature_matches(&encoded));
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn missing_boundary_param_is_rejected() {
        let bad = b"MIME;nope=1\nbody".to_vec();
        assert!(decode(&bad).is_err());
    }

    #[test]
    fn missing_trailer_yields_boundary_missing() {
        let boundary = "fixed-boundary";
        let mut bad = format!("MIME;boundary={boundary}\n--{boundary}\n\"x\"\n").into_bytes();
        bad.extend_from_slice(b"not a trailer");
        assert!(matches!(decode(&bad).unwrap_err(), WireError::BoundaryMissing));
    }
}

//! The `JB` envelope: header line + JSON body + appended binary blobs.
//!
//! ```text
//! header  = "JB" major minor ";" seed ";" jsonLen ";" blobLens LF
//! blobLens = *( decdigit / "," )
//! ```
//! Minimum viable header is `JB00\n` (no seed, no blobs).

use bytes::Bytes;
use rand::Rng;

use super::error::WireError;
use super::json_direct::{decode_direct, encode_direct};
use super::value::Value;

const MAJOR: u8 = 0;
const MINOR: u8 = 0;

pub fn signature_matches(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && &bytes[0..2] == b"JB"
}

fn random_seed() -> String {
    let mut rng = rand::thread_rng();
    (0..16)
        .map(|_| {
            let n: u8 = rng.gen_range(0..36);
            std::char::from_digit(n as u32, 36).unwrap()
        })
        .collect()
}

/// Encode `value` as a `JB` envelope. Byte-strings no longer than
/// `inline_threshold` are inlined as base64; longer ones are appended as
/// raw trailing blobs.
pub fn encode(value: &Value, inline_threshold: usize) -> Result<Vec<u8>, WireError> {
    let seed = random_seed();
    let mut blobs: Vec<Bytes> = Vec::new();

    let mut on_bytes = |b: &Bytes| -> serde_json::Value {
        if b.len() <= inline_threshold {
            serde_json::json!({"__b": seed, "b64": super::b64::encode(b)})
        } else {
            blobs.push(b.clone());
            serde_json::json!({"__b": seed})
        }
    };

    let json_value = encode_direct(value, &mut on_bytes)?;
    let json_text = serde_json::to_string(&json_value).map_err(|e| WireError::CorruptBody {
        reason: format!("failed to serialize JSON body: {e}"),
    })?;

    let blob_lens: Vec<String> = blobs.iter().map(|b| b.len().to_string()).collect();

    let mut out = Vec::with_capacity(json_text.len() + 64);
    out.extend_from_slice(b"JB");
    out.push(b'0' + MAJOR);
    out.push(b'0' + MINOR);
    out.push(b';');
    out.extend_from_slice(seed.as_bytes());
    out.push(b';');
    out.extend_from_slice(json_text.len().to_string().as_bytes());
    out.push(b';');
    out.extend_from_slice(blob_lens.join(",").as_bytes());
    out.push(b'\n');
    out.extend_from_slice(json_text.as_bytes());
    out.push(b'\n');
    for blob in &blobs {
        out.extend_from_slice(blob);
        out.push(b'\n');
    }
    Ok(out)
}

struct Header {
    json_len: usize,
    blob_lens: Vec<usize>,
    seed: String,
}

fn parse_header(line: &[u8]) -> Result<Header, WireError> {
    if line.len() < 4 || &line[0..2] != b"JB" {
        return Err(WireError::CorruptHeader {
            reason: "missing JB signature".to_string(),
        });
    }
    let major = line[2].checked_sub(b'0').ok_or_else(|| WireError::CorruptHeader {
        reason: "non-numeric major version".to_string(),
    })?;
    if major > MAJOR {
        return Err(WireError::VersionUnsupported { major });
    }
    if line.len() == 4 {
        // Minimum viable header: "JB00" with no trailing fields.
        return Ok(Header {
            json_len: 0,
            blob_lens: Vec::new(),
            seed: String::new(),
        });
    }
    if line[4] != b';' {
        return Err(WireError::CorruptHeader {
            reason: "expected ';' after version".to_string(),
        });
    }
    let rest = std::str::from_utf8(&line[5..]).map_err(|_| WireError::CorruptHeader {
        reason: "header is not valid utf-8".to_string(),
    })?;
    let mut parts = rest.splitn(3, ';');
    let seed = parts.next().unwrap_or("").to_string();
    let json_len: usize = parts
        .next()
        .ok_or_else(|| WireError::CorruptHeader {
            reason: "missing json length field".to_string(),
        })?
        .parse()
        .map_err(|_| WireError::CorruptHeader {
            reason: "json length is not a number".to_string(),
        })?;
    let blob_lens_str = parts.next().unwrap_or("");
    let blob_lens = if blob_lens_str.is_empty() {
        Vec::new()
    } else {
        blob_lens_str
            .split(',')
            .map(|s| {
                s.parse::<usize>().map_err(|_| WireError::CorruptHeader {
                    reason: "blob length is not a number".to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?
    };
    Ok(Header {
        json_len,
        blob_lens,
        seed,
    })
}

/// Decode a `JB` envelope. `copy_buffers` forces each blob to be copied
/// into an independently-owned allocation rather than sharing the input
/// buffer's backing storage.
pub fn decode(input: &[u8], copy_buffers: bool) -> Result<Value, WireError> {
    let header_end = input
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| WireError::CorruptHeader {
            reason: "no header terminator".to_string(),
        })?;
    let header = parse_header(&input[..header_end])?;
    let mut offset = header_end + 1;

    if offset + header.json_len > input.len() {
        return Err(WireError::CorruptBody {
            reason: "json body shorter than declared length".to_string(),
        });
    }
    let json_bytes = &input[offset..offset + header.json_len];
    offset += header.json_len;
    if header.json_len > 0 || offset < input.len() {
        if offset >= input.len() || input[offset] != b'\n' {
            return Err(WireError::CorruptBody {
                reason: "missing newline after json body".to_string(),
            });
        }
        offset += 1;
    }

    let json_value: serde_json::Value = if header.json_len == 0 {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(json_bytes).map_err(|e| WireError::CorruptBody {
            reason: format!("invalid json body: {e}"),
        })?
    };

    let mut blobs: Vec<Bytes> = Vec::with_capacity(header.blob_lens.len());
    let base = if copy_buffers {
        None
    } else {
        Some(bytes::Bytes::copy_from_slice(input))
    };
    for &len in &header.blob_lens {
        if offset + len > input.len() {
            return Err(WireError::CorruptBody {
                reason: "blob shorter than declared length".to_string(),
            });
        }
        let slice = match &base {
            Some(base) => base.slice(offset..offset + len),
            None => Bytes::copy_from_slice(&input[offset..offset + len]),
        };
        blobs.push(slice);
        offset += len;
        if offset >= input.len() || input[offset] != b'\n' {
            return Err(WireError::CorruptBody {
                reason: "missing newline after blob".to_string(),
            });
        }
        offset += 1;
    }

    let mut blob_idx = 0usize;
    let seed = header.seed;
    let mut resolve_marker = |obj: &serde_json::Map<String, serde_json::Value>| -> Option<Bytes> {
        let marker_seed = obj.get("__b")?.as_str()?;
        if marker_seed != seed {
            return None;
        }
        if let Some(b64) = obj.get("b64").and_then(|v| v.as_str()) {
            super::b64::decode(b64).ok().map(Bytes::from)
        } else {
            let b = blobs.get(blob_idx).cloned();
            blob_idx += 1;
            b
        }
    };

    Ok(decode_direct(&json_value, &mut resolve_marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn round_trips_scalars_and_collections() {
        let mut map = IndexMap::new();
        map.insert("hello".to_string(), Value::Str("world".to_string()));
        map.insert("n".to_string(), Value::Int(42));
        let value = Value::Map(map);

        let encoded = encode(&value, 64).unwrap();
        let decoded = decode(&encoded, false).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn large_blob_round_trips_and_appears_verbatim() {
        let blob: Vec<u8> = vec![0x41; 65];
        let mut map = IndexMap::new();
        map.insert("hello".to_string(), Value::Str("world".to_string()));
        map.insert("buf".to_string(), Value::Bytes(Bytes::from(blob.clone())));
        let value = Value::Map(map);

        let encoded = encode(&value, 64).unwrap();
        let decoded = decode(&encoded, false).unwrap();
        assert_eq!(decoded, value);

        // The 65-byte blob must appear verbatim as a contiguous slice
        // somewhere past the header.
        let pos = encoded
            .windows(blob.len())
            .position(|w| w == blob.as_slice());
        assert!(pos.is_some());
        assert!(pos.unwrap() > 4);
    }

    #[test]
    fn small_blob_is_inlined_not_appended() {
        let blob = vec![0x42; 10];
        let value = Value::Bytes(Bytes::from(blob));
        let encoded = encode(&value, 64).unwrap();
        let text = String::from_utf8_lossy(&encoded);
        assert!(text.contains("b64"));
    }

    #[test]
    fn copy_buffers_produces_independent_allocation() {
        let blob = vec![0x43; 100];
        let value = Value::Bytes(Bytes::from(blob));
        let encoded = encode(&value, 64).unwrap();
        let decoded = decode(&encoded, true).unwrap();
        match decoded {
            Value::Bytes(b) => assert_eq!(b.len(), 100),
            _ => panic!("expected bytes"),
        }
    }

    #[test]
    fn rejects_unsupported_major_version() {
        let bad = b"JB90\n".to_vec();
        let err = decode(&bad, false).unwrap_err();
        assert!(matches!(err, WireError::VersionUnsupported { major: 9 }));
    }

    #[test]
    fn minimum_viable_header_decodes_to_undefined() {
        let input = b"JB00\n".to_vec();
        let decoded = decode(&input, false).unwrap();
        assert_eq!(decoded, Value::Undefined);
    }

    #[test]
    fn corrupting_json_body_fails_decode() {
        let value = Value::Str("hello".to_string());
        let mut encoded = encode(&value, 64).unwrap();
        // Flip a byte inside the JSON body to break the JSON syntax.
        let header_end = encoded.iter().position(|&b| b == b'\n').unwrap();
        encoded[header_end + 2] = b'{';
        assert!(decode(&encoded, false).is_err());
    }

    #[test]
    fn numeric_range_is_enforced() {
        let value = Value::Int(1i64 << 60);
        let err = encode(&value, 64).unwrap_err();
        assert!(matches!(err, WireError::NumericRange { .. }));
    }

    #[test]
    fn undefined_in_array_preserves_slot() {
        let value = Value::List(vec![Value::Int(1), Value::Undefined, Value::Int(3)]);
        let encoded = encode(&value, 64).unwrap();
        let decoded = decode(&encoded, false).unwrap();
        assert_eq!(decoded, value);
    }
}

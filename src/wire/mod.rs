//! Self-describing binary wire serialization: one value universe, four
//! interchangeable envelope formats, and a signature sniffer that picks
//! the right decoder without an out-of-band format tag.
//!
//! - `JB` — plain JSON body plus appended binary blobs, for the common
//!   case where most payloads are small and mostly blob-free.
//! - `CJ` — canonical, typed JSON: every value tagged so int/float and
//!   defined/undefined survive exactly. No appended blobs.
//! - `BS` — compact length-prefixed binary, cheapest to encode/decode,
//!   least human-legible on the wire.
//! - `MIME` — multipart, for transports that already speak MIME and want
//!   blobs as distinct parts rather than inlined or appended.

mod b64;
mod bson;
mod cj;
mod error;
mod jb;
mod json_direct;
mod json_typed;
mod mime;
mod value;

pub use error::WireError;
pub use value::Value;

/// Selects which envelope `serialize` should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    Jb,
    Cj,
    Bs,
    Mime,
}

/// Serialize `value` using the given envelope. `inline_blob_threshold` only
/// affects `JB` (byte-strings no longer than the threshold are inlined as
/// base64 rather than appended as a trailing blob).
pub fn serialize(
    value: &Value,
    envelope: Envelope,
    inline_blob_threshold: usize,
) -> Result<Vec<u8>, WireError> {
    match envelope {
        Envelope::Jb => jb::encode(value, inline_blob_threshold),
        Envelope::Cj => cj::encode(value),
        Envelope::Bs => bson::encode(value),
        Envelope::Mime => mime::encode(value),
    }
}

/// Decode a buffer whose envelope format is determined by sniffing its
/// leading bytes. `copy_buffers` controls whether `JB` blobs are copied
/// into independent allocations or sliced from a shared backing buffer.
pub fn deserialize(input: &[u8], copy_buffers: bool) -> Result<Value, WireError> {
    match detect(input)? {
        Envelope::Jb => jb::decode(input, copy_buffers),
        Envelope::Cj => cj::decode(input),
        Envelope::Bs => bson::decode(input),
        Envelope::Mime => mime::decode(input),
    }
}

/// Sniff which envelope format `input` was encoded with, without decoding
/// the body.
pub fn detect(input: &[u8]) -> Result<Envelope, WireError> {
    if jb::signature_matches(input) {
        Ok(Envelope::Jb)
    } else if cj::signature_matches(input) {
        Ok(Envelope::Cj)
    } else if mime::signature_matches(input) {
        Ok(Envelope::Mime)
    } else if bson::signature_matches(input) {
        Ok(Envelope::Bs)
    } else {
        Err(WireError::UnknownEnvelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn sample_value() -> Value {
        let mut map = IndexMap::new();
        map.insert("name".to_string(), Value::Str("actor-7".to_string()));
        map.insert("version".to_string(), Value::Int(3));
        map.insert(
            "payload".to_string(),
            Value::Bytes(bytes::Bytes::from_static(b"some bytes to carry")),
        );
        Value::Map(map)
    }

    #[test]
    fn every_envelope_round_trips_and_is_detected_correctly() {
        for envelope in [Envelope::Jb, Envelope::Cj, Envelope::Bs, Envelope::Mime] {
            let value = sample_value();
            let encoded = serialize(&value, envelope, 64).unwrap();
            assert_eq!(detect(&encoded).unwrap(), envelope);
            let decoded = deserialize(&encoded, false).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn unrecognized_buffer_yields_unknown_envelope() {
        let garbage = b"not a recognized envelope at all".to_vec();
        assert!(matches!(detect(&garbage).unwrap_err(), WireError::UnknownEnvelope));
        assert!(matches!(
            deserialize(&garbage, false).unwrap_err(),
            WireError::UnknownEnvelope
        ));
    }

    #[test]
    fn empty_buffer_is_unknown_envelope() {
        assert!(matches!(detect(&[]).unwrap_err(), WireError::UnknownEnvelope));
    }
}

//! The `BS` envelope: a compact, length-prefixed binary encoding (not
//! MongoDB BSON-compatible — same family of idea, own tag scheme, kept
//! simple since nothing outside this codebase needs to parse it).
//!
//! ```text
//! envelope = totalLen(u32 LE) tagged-value 0x00
//! tagged-value = tag byte, then payload per tag:
//!   0x00 undefined        (no payload)
//!   0x01 bool             1 byte (0/1)
//!   0x02 int              8 bytes LE i64
//!   0x03 float            8 bytes LE f64 bits
//!   0x04 string           u32 LE len, utf8 bytes
//!   0x05 bytes            u32 LE len, raw bytes
//!   0x06 list             u32 LE count, tagged-value*
//!   0x07 map              u32 LE count, (u32 LE keylen, utf8 key, tagged-value)*
//! ```

use super::error::WireError;
use super::value::Value;
use indexmap::IndexMap;

const TAG_UNDEFINED: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_FLOAT: u8 = 0x03;
const TAG_STRING: u8 = 0x04;
const TAG_BYTES: u8 = 0x05;
const TAG_LIST: u8 = 0x06;
const TAG_MAP: u8 = 0x07;

pub fn signature_matches(bytes: &[u8]) -> bool {
    if bytes.len() < 5 {
        return false;
    }
    let declared = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    declared == bytes.len() && matches!(bytes[4], 0x00..=0x07) && bytes[bytes.len() - 1] == 0x00
}

fn write_value(out: &mut Vec<u8>, value: &Value) -> Result<(), WireError> {
    match value {
        Value::Undefined => out.push(TAG_UNDEFINED),
        Value::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(*b as u8);
        }
        Value::Int(i) => {
            out.push(TAG_INT);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Value::Float(f) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&f.to_bits().to_le_bytes());
        }
        Value::Str(s) => {
            out.push(TAG_STRING);
            out.extend_from_slice(&(s.len() as u32).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            out.push(TAG_BYTES);
            out.extend_from_slice(&(b.len() as u32).to_le_bytes());
            out.extend_from_slice(b);
        }
        Value::List(items) => {
            out.push(TAG_LIST);
            out.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                write_value(out, item)?;
            }
        }
        Value::Map(map) => {
            out.push(TAG_MAP);
            out.extend_from_slice(&(map.len() as u32).to_le_bytes());
            for (k, v) in map {
                out.extend_from_slice(&(k.len() as u32).to_le_bytes());
                out.extend_from_slice(k.as_bytes());
                write_value(out, v)?;
            }
        }
    }
    Ok(())
}

pub fn encode(value: &Value) -> Result<Vec<u8>, WireError> {
    let mut body = Vec::new();
    write_value(&mut body, value)?;
    let total_len = body.len() + 4 + 1;
    let mut out = Vec::with_capacity(total_len);
    out.extend_from_slice(&(total_len as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out.push(0x00);
    Ok(out)
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.pos + n > self.data.len() {
            return Err(WireError::CorruptBody {
                reason: "unexpected end of buffer".to_string(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn take_u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn take_string(&mut self, len: usize) -> Result<String, WireError> {
        let b = self.take(len)?;
        String::from_utf8(b.to_vec()).map_err(|_| WireError::CorruptBody {
            reason: "invalid utf-8 string".to_string(),
        })
    }
}

fn read_value(cur: &mut Cursor) -> Result<Value, WireError> {
    let tag = cur.take_u8()?;
    match tag {
        TAG_UNDEFINED => Ok(Value::Undefined),
        TAG_BOOL => Ok(Value::Bool(cur.take_u8()? != 0)),
        TAG_INT => {
            let b = cur.take(8)?;
            Ok(Value::Int(i64::from_le_bytes(b.try_into().unwrap())))
        }
        TAG_FLOAT => {
            let b = cur.take(8)?;
            Ok(Value::Float(f64::from_bits(u64::from_le_bytes(
                b.try_into().unwrap(),
            ))))
        }
        TAG_STRING => {
            let len = cur.take_u32()? as usize;
            Ok(Value::Str(cur.take_string(len)?))
        }
        TAG_BYTES => {
            let len = cur.take_u32()? as usize;
            Ok(Value::Bytes(bytes::Bytes::copy_from_slice(cur.take(len)?)))
        }
        TAG_LIST => {
            let count = cur.take_u32()? as usize;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(read_value(cur)?);
            }
            Ok(Value::List(items))
        }
        TAG_MAP => {
            let count = cur.take_u32()? as usize;
            let mut map = IndexMap::with_capacity(count);
            for _ in 0..count {
                let klen = cur.take_u32()? as usize;
                let key = cur.take_string(klen)?;
                let value = read_value(cur)?;
                map.insert(key, value);
            }
            Ok(Value::Map(map))
        }
        other => Err(WireError::CorruptBody {
            reason: format!("unknown tag byte: {other:#x}"),
        }),
    }
}

pub fn decode(input: &[u8]) -> Result<Value, WireError> {
    if input.len() < 6 {
        return Err(WireError::CorruptHeader {
            reason: "buffer too short for a BS envelope".to_string(),
        });
    }
    let declared = u32::from_le_bytes([input[0], input[1], input[2], input[3]]) as usize;
    if declared != input.len() {
        return Err(WireError::CorruptHeader {
            reason: "declared length does not match buffer size".to_string(),
        });
    }
    if input[input.len() - 1] != 0x00 {
        return Err(WireError::BoundaryMissing);
    }
    let mut cur = Cursor {
        data: &input[4..input.len() - 1],
        pos: 0,
    };
    let value = read_value(&mut cur)?;
    if cur.pos != cur.data.len() {
        return Err(WireError::CorruptBody {
            reason: "trailing bytes after top-level value".to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_nested_structure() {
        let mut map = IndexMap::new();
        map.insert("name".to_string(), Value::Str("actor".to_string()));
        map.insert(
            "tags".to_string(),
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Undefined]),
        );
        map.insert("blob".to_string(), Value::Bytes(bytes::Bytes::from_static(b"\x00\x01\xff")));
        let value = Value::Map(map);

        let encoded = encode(&value).unwrap();
        assert!(signature_matches(&encoded));
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn rejects_length_mismatch() {
        let mut encoded = encode(&Value::Int(7)).unwrap();
        let bad_len = (encoded.len() as u32 + 3).to_le_bytes();
        encoded[0..4].copy_from_slice(&bad_len);
        assert!(decode(&encoded).is_err());
    }

    #[test]
    fn rejects_missing_trailing_null() {
        let mut encoded = encode(&Value::Bool(true)).unwrap();
        *encoded.last_mut().unwrap() = 0xAA;
        assert!(matches!(decode(&encoded).unwrap_err(), WireError::BoundaryMissing));
    }

    #[test]
    fn float_bit_pattern_survives_round_trip() {
        let value = Value::Float(std::f64::consts::PI);
        let encoded = encode(&value).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, value);
    }
}

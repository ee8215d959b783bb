//! BSON codec.
//!
//! BSON is a document-level format: only objects exist at the top level,
//! and arrays are documents with decimal-index names. Encoding a non-object
//! root is an error, matching what document databases accept on their wire.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

const ELEM_DOUBLE: u8 = 0x01;
const ELEM_STRING: u8 = 0x02;
const ELEM_DOCUMENT: u8 = 0x03;
const ELEM_ARRAY: u8 = 0x04;
const ELEM_BINARY: u8 = 0x05;
const ELEM_BOOL: u8 = 0x08;
const ELEM_NULL: u8 = 0x0a;
const ELEM_INT32: u8 = 0x10;
const ELEM_UINT64: u8 = 0x11;
const ELEM_INT64: u8 = 0x12;

const MAX_DOCUMENT_BYTES: u64 = 256 * 1024 * 1024;

/// Encode a value as BSON, appending to `out`.
///
/// # Errors
///
/// Returns [`CodecError::UnsupportedType`] when the root is not an object,
/// or when a member name contains a NUL byte.
pub fn to_bson(value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    let Value::Object(members) = value else {
        return Err(CodecError::unsupported_type(format!(
            "BSON root must be an object, got {}",
            value.kind()
        )));
    };
    let mut body = Vec::new();
    for (name, member) in members {
        write_element(&mut body, name, member)?;
    }
    write_document(out, &body);
    Ok(())
}

fn write_document(out: &mut Vec<u8>, body: &[u8]) {
    let total = 4 + body.len() + 1;
    out.extend_from_slice(&(total as i32).to_le_bytes());
    out.extend_from_slice(body);
    out.push(0);
}

fn write_name(out: &mut Vec<u8>, name: &str) -> CodecResult<()> {
    if name.as_bytes().contains(&0) {
        return Err(CodecError::encoding_failed("BSON name contains NUL"));
    }
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    Ok(())
}

fn write_element(out: &mut Vec<u8>, name: &str, value: &Value) -> CodecResult<()> {
    match value {
        Value::Null => {
            out.push(ELEM_NULL);
            write_name(out, name)?;
        }
        Value::Bool(b) => {
            out.push(ELEM_BOOL);
            write_name(out, name)?;
            out.push(u8::from(*b));
        }
        Value::Int(n) => {
            if let Ok(small) = i32::try_from(*n) {
                out.push(ELEM_INT32);
                write_name(out, name)?;
                out.extend_from_slice(&small.to_le_bytes());
            } else {
                out.push(ELEM_INT64);
                write_name(out, name)?;
                out.extend_from_slice(&n.to_le_bytes());
            }
        }
        Value::Uint(n) => {
            out.push(ELEM_UINT64);
            write_name(out, name)?;
            out.extend_from_slice(&n.to_le_bytes());
        }
        Value::Float(f) => {
            out.push(ELEM_DOUBLE);
            write_name(out, name)?;
            out.extend_from_slice(&f.to_le_bytes());
        }
        Value::Str(text) => {
            out.push(ELEM_STRING);
            write_name(out, name)?;
            out.extend_from_slice(&((text.len() + 1) as i32).to_le_bytes());
            out.extend_from_slice(text.as_bytes());
            out.push(0);
        }
        Value::Bin(bytes) => {
            out.push(ELEM_BINARY);
            write_name(out, name)?;
            out.extend_from_slice(&(bytes.len() as i32).to_le_bytes());
            out.push(0); // generic subtype
            out.extend_from_slice(bytes);
        }
        Value::Array(items) => {
            out.push(ELEM_ARRAY);
            write_name(out, name)?;
            let mut body = Vec::new();
            for (idx, item) in items.iter().enumerate() {
                write_element(&mut body, &idx.to_string(), item)?;
            }
            write_document(out, &body);
        }
        Value::Object(members) => {
            out.push(ELEM_DOCUMENT);
            write_name(out, name)?;
            let mut body = Vec::new();
            for (member_name, member) in members {
                write_element(&mut body, member_name, member)?;
            }
            write_document(out, &body);
        }
    }
    Ok(())
}

/// Decode a value from BSON bytes.
pub fn from_bson(bytes: &[u8]) -> CodecResult<Value> {
    let mut decoder = BsonDecoder { data: bytes, pos: 0 };
    let doc = decoder.read_document(false)?;
    Ok(doc)
}

struct BsonDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BsonDecoder<'a> {
    fn read_document(&mut self, as_array: bool) -> CodecResult<Value> {
        let total = self.read_i32()?;
        if total < 5 || total as u64 > MAX_DOCUMENT_BYTES {
            return Err(CodecError::invalid_structure(format!(
                "bad BSON document size {total}"
            )));
        }
        let end = self
            .pos
            .checked_add(total as usize - 4)
            .filter(|&end| end <= self.data.len())
            .ok_or(CodecError::UnexpectedEof)?;

        let mut members = Vec::new();
        let mut items = Vec::new();
        loop {
            let elem_type = self.read_byte()?;
            if elem_type == 0 {
                break;
            }
            let name = self.read_cstring()?;
            let value = self.read_element(elem_type)?;
            if as_array {
                items.push(value);
            } else {
                members.push((name, value));
            }
        }
        if self.pos != end {
            return Err(CodecError::invalid_structure(
                "BSON document size does not match contents",
            ));
        }
        if as_array {
            Ok(Value::Array(items))
        } else {
            Ok(Value::object(members))
        }
    }

    fn read_element(&mut self, elem_type: u8) -> CodecResult<Value> {
        match elem_type {
            ELEM_DOUBLE => {
                let b = self.read_bytes(8)?;
                Ok(Value::Float(f64::from_le_bytes([
                    b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
                ])))
            }
            ELEM_STRING => {
                let len = self.read_i32()?;
                if len < 1 || len as u64 > MAX_DOCUMENT_BYTES {
                    return Err(CodecError::invalid_structure("bad BSON string length"));
                }
                let raw = self.read_bytes(len as usize)?;
                let (text, terminator) = raw.split_at(raw.len() - 1);
                if terminator != [0] {
                    return Err(CodecError::invalid_structure("unterminated BSON string"));
                }
                let text = std::str::from_utf8(text).map_err(|_| CodecError::InvalidUtf8)?;
                Ok(Value::Str(text.to_string()))
            }
            ELEM_DOCUMENT => self.read_document(false),
            ELEM_ARRAY => self.read_document(true),
            ELEM_BINARY => {
                let len = self.read_i32()?;
                if len < 0 || len as u64 > MAX_DOCUMENT_BYTES {
                    return Err(CodecError::invalid_structure("bad BSON binary length"));
                }
                let _subtype = self.read_byte()?;
                Ok(Value::Bin(self.read_bytes(len as usize)?.to_vec()))
            }
            ELEM_BOOL => match self.read_byte()? {
                0 => Ok(Value::Bool(false)),
                1 => Ok(Value::Bool(true)),
                other => Err(CodecError::invalid_structure(format!(
                    "bad BSON boolean byte {other}"
                ))),
            },
            ELEM_NULL => Ok(Value::Null),
            ELEM_INT32 => {
                let n = self.read_i32()?;
                Ok(Value::Int(i64::from(n)))
            }
            ELEM_UINT64 => {
                let b = self.read_bytes(8)?;
                Ok(Value::from_unsigned(u64::from_le_bytes([
                    b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
                ])))
            }
            ELEM_INT64 => {
                let b = self.read_bytes(8)?;
                Ok(Value::Int(i64::from_le_bytes([
                    b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
                ])))
            }
            other => Err(CodecError::unsupported_type(format!(
                "BSON element type {other:#04x}"
            ))),
        }
    }

    fn read_cstring(&mut self) -> CodecResult<String> {
        let start = self.pos;
        let nul = self.data[start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(CodecError::UnexpectedEof)?;
        let text = std::str::from_utf8(&self.data[start..start + nul])
            .map_err(|_| CodecError::InvalidUtf8)?
            .to_string();
        self.pos = start + nul + 1;
        Ok(text)
    }

    #[inline]
    fn read_byte(&mut self) -> CodecResult<u8> {
        let byte = *self.data.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    #[inline]
    fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(CodecError::UnexpectedEof)?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_i32(&mut self) -> CodecResult<i32> {
        let b = self.read_bytes(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_vec(value: &Value) -> Vec<u8> {
        let mut out = Vec::new();
        to_bson(value, &mut out).unwrap();
        out
    }

    fn round_trip(value: Value) -> Value {
        from_bson(&to_vec(&value)).unwrap()
    }

    #[test]
    fn empty_document() {
        let doc = Value::object(vec![]);
        assert_eq!(to_vec(&doc), vec![5, 0, 0, 0, 0]);
        assert_eq!(round_trip(doc.clone()), doc);
    }

    #[test]
    fn known_encoding() {
        // {"hello": "world"} per the BSON spec examples.
        let doc = Value::object(vec![("hello".to_string(), Value::Str("world".into()))]);
        assert_eq!(
            to_vec(&doc),
            vec![
                0x16, 0x00, 0x00, 0x00, 0x02, b'h', b'e', b'l', b'l', b'o', 0x00, 0x06, 0x00,
                0x00, 0x00, b'w', b'o', b'r', b'l', b'd', 0x00, 0x00
            ]
        );
    }

    #[test]
    fn scalar_members_round_trip() {
        let doc = Value::object(vec![
            ("null".to_string(), Value::Null),
            ("flag".to_string(), Value::Bool(true)),
            ("small".to_string(), Value::Int(42)),
            ("wide".to_string(), Value::Int(i64::MAX)),
            ("huge".to_string(), Value::Uint(u64::MAX)),
            ("pi".to_string(), Value::Float(3.25)),
            ("text".to_string(), Value::Str("hi".into())),
            ("blob".to_string(), Value::Bin(vec![1, 2, 3])),
        ]);
        assert_eq!(round_trip(doc.clone()), doc);
    }

    #[test]
    fn small_int_uses_int32() {
        let doc = Value::object(vec![("n".to_string(), Value::Int(1))]);
        assert!(to_vec(&doc).contains(&ELEM_INT32));
    }

    #[test]
    fn nested_containers_round_trip() {
        let doc = Value::object(vec![
            (
                "arr".to_string(),
                Value::Array(vec![Value::Int(1), Value::Str("x".into()), Value::Null]),
            ),
            (
                "sub".to_string(),
                Value::object(vec![("k".to_string(), Value::Bool(false))]),
            ),
        ]);
        assert_eq!(round_trip(doc.clone()), doc);
    }

    #[test]
    fn non_object_root_is_rejected() {
        let mut out = Vec::new();
        assert!(matches!(
            to_bson(&Value::Int(1), &mut out),
            Err(CodecError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn bad_size_is_rejected() {
        assert!(from_bson(&[3, 0, 0, 0, 0]).is_err());
        assert!(from_bson(&[5, 0, 0, 0]).is_err());
    }
}

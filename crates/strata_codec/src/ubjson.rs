//! UBJSON codec.
//!
//! Containers are written in plain form with end markers, except binary
//! strings, which use the size-and-type optimized array of `U` bytes
//! (`[$U#<n>`) that binary-aware UBJSON writers emit. The decoder accepts
//! plain, count-optimized, and type-optimized containers.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

const MAX_CONTAINER_ELEMENTS: u64 = 16 * 1024 * 1024;
const MAX_BYTES_LENGTH: u64 = 256 * 1024 * 1024;

/// Encode a value as UBJSON, appending to `out`.
pub fn to_ubjson(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(b'Z'),
        Value::Bool(true) => out.push(b'T'),
        Value::Bool(false) => out.push(b'F'),
        Value::Int(n) => write_int(out, *n),
        Value::Uint(n) => {
            // Beyond int64: high-precision number, decimal text.
            let text = n.to_string();
            out.push(b'H');
            write_length(out, text.len());
            out.extend_from_slice(text.as_bytes());
        }
        Value::Float(f) => {
            out.push(b'D');
            out.extend_from_slice(&f.to_be_bytes());
        }
        Value::Str(text) => {
            out.push(b'S');
            write_length(out, text.len());
            out.extend_from_slice(text.as_bytes());
        }
        Value::Bin(bytes) => {
            out.extend_from_slice(b"[$U#");
            write_length(out, bytes.len());
            out.extend_from_slice(bytes);
        }
        Value::Array(items) => {
            out.push(b'[');
            for item in items {
                to_ubjson(item, out);
            }
            out.push(b']');
        }
        Value::Object(members) => {
            out.push(b'{');
            for (name, member) in members {
                write_length(out, name.len());
                out.extend_from_slice(name.as_bytes());
                to_ubjson(member, out);
            }
            out.push(b'}');
        }
    }
}

fn write_int(out: &mut Vec<u8>, n: i64) {
    if let Ok(n) = i8::try_from(n) {
        out.push(b'i');
        out.push(n as u8);
    } else if let (Ok(n), true) = (u8::try_from(n), n >= 0) {
        out.push(b'U');
        out.push(n);
    } else if let Ok(n) = i16::try_from(n) {
        out.push(b'I');
        out.extend_from_slice(&n.to_be_bytes());
    } else if let Ok(n) = i32::try_from(n) {
        out.push(b'l');
        out.extend_from_slice(&n.to_be_bytes());
    } else {
        out.push(b'L');
        out.extend_from_slice(&n.to_be_bytes());
    }
}

fn write_length(out: &mut Vec<u8>, len: usize) {
    write_int(out, len as i64);
}

/// Decode a value from UBJSON bytes.
pub fn from_ubjson(bytes: &[u8]) -> CodecResult<Value> {
    let mut decoder = UbjsonDecoder { data: bytes, pos: 0 };
    decoder.decode()
}

struct UbjsonDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> UbjsonDecoder<'a> {
    fn decode(&mut self) -> CodecResult<Value> {
        let marker = self.read_byte()?;
        self.decode_with_marker(marker)
    }

    fn decode_with_marker(&mut self, marker: u8) -> CodecResult<Value> {
        match marker {
            b'Z' => Ok(Value::Null),
            b'T' => Ok(Value::Bool(true)),
            b'F' => Ok(Value::Bool(false)),
            b'N' => self.decode(), // no-op marker
            b'i' => Ok(Value::Int(i64::from(self.read_byte()? as i8))),
            b'U' => Ok(Value::Int(i64::from(self.read_byte()?))),
            b'I' => {
                let b = self.read_bytes(2)?;
                Ok(Value::Int(i64::from(i16::from_be_bytes([b[0], b[1]]))))
            }
            b'l' => {
                let b = self.read_bytes(4)?;
                Ok(Value::Int(i64::from(i32::from_be_bytes([
                    b[0], b[1], b[2], b[3],
                ]))))
            }
            b'L' => {
                let b = self.read_bytes(8)?;
                Ok(Value::Int(i64::from_be_bytes([
                    b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
                ])))
            }
            b'd' => {
                let b = self.read_bytes(4)?;
                Ok(Value::Float(f64::from(f32::from_be_bytes([
                    b[0], b[1], b[2], b[3],
                ]))))
            }
            b'D' => {
                let b = self.read_bytes(8)?;
                Ok(Value::Float(f64::from_be_bytes([
                    b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
                ])))
            }
            b'C' => {
                let c = self.read_byte()?;
                if c.is_ascii() {
                    Ok(Value::Str((c as char).to_string()))
                } else {
                    Err(CodecError::invalid_structure("non-ASCII char marker"))
                }
            }
            b'S' => {
                let len = self.read_length(MAX_BYTES_LENGTH)?;
                let text = std::str::from_utf8(self.read_bytes(len)?)
                    .map_err(|_| CodecError::InvalidUtf8)?;
                Ok(Value::Str(text.to_string()))
            }
            b'H' => {
                let len = self.read_length(MAX_BYTES_LENGTH)?;
                let text = std::str::from_utf8(self.read_bytes(len)?)
                    .map_err(|_| CodecError::InvalidUtf8)?;
                parse_high_precision(text)
            }
            b'[' => self.decode_array(),
            b'{' => self.decode_object(),
            other => Err(CodecError::unsupported_type(format!(
                "UBJSON marker {:?}",
                other as char
            ))),
        }
    }

    fn container_header(&mut self) -> CodecResult<(Option<u8>, Option<usize>)> {
        let mut elem_type = None;
        let mut count = None;
        if self.peek() == Some(b'$') {
            self.pos += 1;
            elem_type = Some(self.read_byte()?);
            if self.peek() != Some(b'#') {
                return Err(CodecError::invalid_structure(
                    "typed container requires a count",
                ));
            }
        }
        if self.peek() == Some(b'#') {
            self.pos += 1;
            count = Some(self.read_length(MAX_CONTAINER_ELEMENTS)?);
        }
        Ok((elem_type, count))
    }

    fn decode_array(&mut self) -> CodecResult<Value> {
        let (elem_type, count) = self.container_header()?;
        match (elem_type, count) {
            (Some(b'U'), Some(len)) => {
                // Optimized byte array: this is the binary representation.
                if len as u64 > MAX_BYTES_LENGTH {
                    return Err(CodecError::SizeLimitExceeded {
                        claimed: len as u64,
                        max_allowed: MAX_BYTES_LENGTH,
                    });
                }
                Ok(Value::Bin(self.read_bytes(len)?.to_vec()))
            }
            (Some(marker), Some(len)) => {
                let mut items = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    items.push(self.decode_with_marker(marker)?);
                }
                Ok(Value::Array(items))
            }
            (None, Some(len)) => {
                let mut items = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    items.push(self.decode()?);
                }
                Ok(Value::Array(items))
            }
            (None, None) => {
                let mut items = Vec::new();
                loop {
                    let marker = self.read_byte()?;
                    if marker == b']' {
                        return Ok(Value::Array(items));
                    }
                    items.push(self.decode_with_marker(marker)?);
                }
            }
            (Some(_), None) => unreachable!("checked in container_header"),
        }
    }

    fn decode_object(&mut self) -> CodecResult<Value> {
        let (elem_type, count) = self.container_header()?;
        let mut members = Vec::new();
        match count {
            Some(len) => {
                for _ in 0..len {
                    let name = self.read_name()?;
                    let value = match elem_type {
                        Some(marker) => self.decode_with_marker(marker)?,
                        None => self.decode()?,
                    };
                    members.push((name, value));
                }
            }
            None => loop {
                if self.peek() == Some(b'}') {
                    self.pos += 1;
                    break;
                }
                let name = self.read_name()?;
                members.push((name, self.decode()?));
            },
        }
        Ok(Value::object(members))
    }

    fn read_name(&mut self) -> CodecResult<String> {
        let len = self.read_length(MAX_BYTES_LENGTH)?;
        let text = std::str::from_utf8(self.read_bytes(len)?)
            .map_err(|_| CodecError::InvalidUtf8)?;
        Ok(text.to_string())
    }

    fn read_length(&mut self, max: u64) -> CodecResult<usize> {
        let marker = self.read_byte()?;
        let len = match self.decode_with_marker(marker)? {
            Value::Int(n) if n >= 0 => n as u64,
            Value::Int(_) => {
                return Err(CodecError::invalid_structure("negative length"));
            }
            other => {
                return Err(CodecError::invalid_structure(format!(
                    "length must be an integer, got {}",
                    other.kind()
                )));
            }
        };
        if len > max {
            return Err(CodecError::SizeLimitExceeded {
                claimed: len,
                max_allowed: max,
            });
        }
        Ok(len as usize)
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
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
}

fn parse_high_precision(text: &str) -> CodecResult<Value> {
    if let Ok(n) = text.parse::<i64>() {
        return Ok(Value::Int(n));
    }
    if let Ok(n) = text.parse::<u64>() {
        return Ok(Value::Uint(n));
    }
    text.parse::<f64>().map(Value::Float).map_err(|_| {
        CodecError::invalid_structure(format!("bad high-precision number {text:?}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_vec(value: &Value) -> Vec<u8> {
        let mut out = Vec::new();
        to_ubjson(value, &mut out);
        out
    }

    fn round_trip(value: Value) -> Value {
        from_ubjson(&to_vec(&value)).unwrap()
    }

    #[test]
    fn scalars() {
        assert_eq!(to_vec(&Value::Null), b"Z");
        assert_eq!(to_vec(&Value::Bool(true)), b"T");
        assert_eq!(to_vec(&Value::Bool(false)), b"F");
        assert_eq!(to_vec(&Value::Int(5)), vec![b'i', 5]);
        assert_eq!(to_vec(&Value::Int(-2)), vec![b'i', 0xfe]);
        assert_eq!(to_vec(&Value::Int(200)), vec![b'U', 200]);
        assert_eq!(to_vec(&Value::Int(1000)), vec![b'I', 0x03, 0xe8]);
    }

    #[test]
    fn integer_widths_round_trip() {
        for n in [0i64, 127, 128, 255, 256, -1, -129, 70_000, -70_000, i64::MAX, i64::MIN] {
            assert_eq!(round_trip(Value::Int(n)), Value::Int(n), "{n}");
        }
    }

    #[test]
    fn high_precision_uint() {
        let bytes = to_vec(&Value::Uint(u64::MAX));
        assert_eq!(bytes[0], b'H');
        assert_eq!(round_trip(Value::Uint(u64::MAX)), Value::Uint(u64::MAX));
    }

    #[test]
    fn strings() {
        assert_eq!(to_vec(&Value::Str("hi".into())), vec![b'S', b'i', 2, b'h', b'i']);
        assert_eq!(round_trip(Value::Str(String::new())), Value::Str(String::new()));
        // A char marker decodes as a one-character string.
        assert_eq!(from_ubjson(&[b'C', b'x']).unwrap(), Value::Str("x".into()));
    }

    #[test]
    fn binary_uses_typed_array() {
        let bytes = to_vec(&Value::Bin(vec![1, 2, 3]));
        assert_eq!(bytes, vec![b'[', b'$', b'U', b'#', b'i', 3, 1, 2, 3]);
        assert_eq!(round_trip(Value::Bin(vec![1, 2, 3])), Value::Bin(vec![1, 2, 3]));
        assert_eq!(round_trip(Value::Bin(Vec::new())), Value::Bin(Vec::new()));
    }

    #[test]
    fn plain_containers() {
        let doc = Value::object(vec![
            ("a".to_string(), Value::Int(1)),
            ("b".to_string(), Value::Array(vec![Value::Null, Value::Str("x".into())])),
        ]);
        assert_eq!(round_trip(doc.clone()), doc);
    }

    #[test]
    fn count_optimized_array_decodes() {
        // [#i2 i1 i2 — two elements, no end marker.
        let bytes = [b'[', b'#', b'i', 2, b'i', 1, b'i', 2];
        assert_eq!(
            from_ubjson(&bytes).unwrap(),
            Value::Array(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn typed_array_of_ints_decodes() {
        // [$i#i2 then two raw int8 payloads.
        let bytes = [b'[', b'$', b'i', b'#', b'i', 2, 7, 9];
        assert_eq!(
            from_ubjson(&bytes).unwrap(),
            Value::Array(vec![Value::Int(7), Value::Int(9)])
        );
    }

    #[test]
    fn typed_container_without_count_is_rejected() {
        let bytes = [b'[', b'$', b'i', b'i', 1, b']'];
        assert!(matches!(
            from_ubjson(&bytes),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn float_round_trip() {
        assert_eq!(round_trip(Value::Float(2.5)), Value::Float(2.5));
        // f32 payload widens.
        assert_eq!(
            from_ubjson(&[b'd', 0x40, 0x20, 0x00, 0x00]).unwrap(),
            Value::Float(2.5)
        );
    }

    #[test]
    fn truncated_input_is_rejected() {
        assert!(matches!(from_ubjson(&[]), Err(CodecError::UnexpectedEof)));
        assert!(matches!(from_ubjson(&[b'S', b'i', 5, b'a']), Err(CodecError::UnexpectedEof)));
        assert!(matches!(from_ubjson(&[b'[', b'i', 1]), Err(CodecError::UnexpectedEof)));
    }
}

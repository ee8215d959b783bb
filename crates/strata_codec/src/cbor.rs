//! CBOR codec.
//!
//! CBOR is the internal storage format: every document a caller hands in,
//! whatever its wire format, is normalized into these bytes before it
//! reaches the key-value engine. The encoder is deterministic (members are
//! already name-sorted in [`Value`], integers use the shortest encoding,
//! no indefinite-length items); the decoder accepts any well-formed CBOR
//! with text object keys, since wire documents arrive from arbitrary
//! encoders.

use crate::error::{CodecError, CodecResult};
use crate::num::f32_from_f16_bits;
use crate::value::Value;

/// Maximum allowed element count for arrays and maps, guarding against
/// allocation attacks from untrusted input.
const MAX_CONTAINER_ELEMENTS: u64 = 16 * 1024 * 1024;

/// Maximum allowed byte/string length for the same reason.
const MAX_BYTES_LENGTH: u64 = 256 * 1024 * 1024;

/// Encode a value as CBOR, appending to `out`.
pub fn to_cbor(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(0xf6),
        Value::Bool(false) => out.push(0xf4),
        Value::Bool(true) => out.push(0xf5),
        Value::Int(n) => {
            if *n >= 0 {
                write_head(out, 0, *n as u64);
            } else {
                write_head(out, 1, (-(n + 1)) as u64);
            }
        }
        Value::Uint(n) => write_head(out, 0, *n),
        Value::Float(f) => {
            out.push(0xfb);
            out.extend_from_slice(&f.to_be_bytes());
        }
        Value::Bin(bytes) => {
            write_head(out, 2, bytes.len() as u64);
            out.extend_from_slice(bytes);
        }
        Value::Str(text) => {
            write_head(out, 3, text.len() as u64);
            out.extend_from_slice(text.as_bytes());
        }
        Value::Array(items) => {
            write_head(out, 4, items.len() as u64);
            for item in items {
                to_cbor(item, out);
            }
        }
        Value::Object(members) => {
            write_head(out, 5, members.len() as u64);
            for (name, member) in members {
                write_head(out, 3, name.len() as u64);
                out.extend_from_slice(name.as_bytes());
                to_cbor(member, out);
            }
        }
    }
}

/// Encode a value to a fresh CBOR buffer.
#[must_use]
pub fn to_cbor_vec(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    to_cbor(value, &mut out);
    out
}

fn write_head(out: &mut Vec<u8>, major_type: u8, value: u64) {
    let mt = major_type << 5;
    if value < 24 {
        out.push(mt | (value as u8));
    } else if u8::try_from(value).is_ok() {
        out.push(mt | 24);
        out.push(value as u8);
    } else if u16::try_from(value).is_ok() {
        out.push(mt | 25);
        out.extend_from_slice(&(value as u16).to_be_bytes());
    } else if u32::try_from(value).is_ok() {
        out.push(mt | 26);
        out.extend_from_slice(&(value as u32).to_be_bytes());
    } else {
        out.push(mt | 27);
        out.extend_from_slice(&value.to_be_bytes());
    }
}

/// Decode a value from CBOR bytes.
///
/// # Errors
///
/// Returns an error on malformed input, indefinite-length items, non-text
/// object keys, or container sizes beyond the sanity limits.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    let mut decoder = CborDecoder::new(bytes);
    let value = decoder.decode()?;
    Ok(value)
}

/// A CBOR decoder over a byte slice.
pub struct CborDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> CborDecoder<'a> {
    /// Create a new decoder for the given bytes.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Decode the next value.
    pub fn decode(&mut self) -> CodecResult<Value> {
        let initial = self.read_byte()?;
        let major_type = initial >> 5;
        let info = initial & 0x1f;

        match major_type {
            0 => self.read_argument(info).map(Value::from_unsigned),
            1 => self.read_argument(info).map(|n| {
                if let Ok(n) = i64::try_from(n) {
                    Value::Int(-n - 1)
                } else {
                    // Beyond the i64 range; clamp like a lossy reader would.
                    Value::Int(i64::MIN)
                }
            }),
            2 => {
                let len = self.read_length(info, MAX_BYTES_LENGTH)?;
                Ok(Value::Bin(self.read_bytes(len)?.to_vec()))
            }
            3 => {
                let len = self.read_length(info, MAX_BYTES_LENGTH)?;
                let text = std::str::from_utf8(self.read_bytes(len)?)
                    .map_err(|_| CodecError::InvalidUtf8)?;
                Ok(Value::Str(text.to_string()))
            }
            4 => {
                let len = self.read_length(info, MAX_CONTAINER_ELEMENTS)?;
                let mut items = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    items.push(self.decode()?);
                }
                Ok(Value::Array(items))
            }
            5 => {
                let len = self.read_length(info, MAX_CONTAINER_ELEMENTS)?;
                let mut members = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    let key = match self.decode()? {
                        Value::Str(name) => name,
                        other => {
                            return Err(CodecError::invalid_structure(format!(
                                "object key must be text, got {}",
                                other.kind()
                            )));
                        }
                    };
                    members.push((key, self.decode()?));
                }
                Ok(Value::object(members))
            }
            6 => {
                // Tagged value: skip the tag, decode the content.
                let _tag = self.read_argument(info)?;
                self.decode()
            }
            7 => self.decode_simple(info),
            _ => unreachable!(),
        }
    }

    /// Check if all bytes have been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
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

    fn read_argument(&mut self, info: u8) -> CodecResult<u64> {
        match info {
            0..=23 => Ok(u64::from(info)),
            24 => Ok(u64::from(self.read_byte()?)),
            25 => {
                let b = self.read_bytes(2)?;
                Ok(u64::from(u16::from_be_bytes([b[0], b[1]])))
            }
            26 => {
                let b = self.read_bytes(4)?;
                Ok(u64::from(u32::from_be_bytes([b[0], b[1], b[2], b[3]])))
            }
            27 => {
                let b = self.read_bytes(8)?;
                Ok(u64::from_be_bytes([
                    b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
                ]))
            }
            28..=30 => Err(CodecError::invalid_structure("reserved additional info")),
            31 => Err(CodecError::IndefiniteLengthForbidden),
            _ => unreachable!(),
        }
    }

    fn read_length(&mut self, info: u8, max: u64) -> CodecResult<usize> {
        if info == 31 {
            return Err(CodecError::IndefiniteLengthForbidden);
        }
        let len = self.read_argument(info)?;
        if len > max {
            return Err(CodecError::SizeLimitExceeded {
                claimed: len,
                max_allowed: max,
            });
        }
        Ok(len as usize)
    }

    fn decode_simple(&mut self, info: u8) -> CodecResult<Value> {
        match info {
            20 => Ok(Value::Bool(false)),
            21 => Ok(Value::Bool(true)),
            22 | 23 => Ok(Value::Null), // null and undefined
            24 => {
                let simple = self.read_byte()?;
                Err(CodecError::unsupported_type(format!("simple value {simple}")))
            }
            25 => {
                let b = self.read_bytes(2)?;
                let half = u16::from_be_bytes([b[0], b[1]]);
                Ok(Value::Float(f64::from(f32_from_f16_bits(half))))
            }
            26 => {
                let b = self.read_bytes(4)?;
                Ok(Value::Float(f64::from(f32::from_be_bytes([
                    b[0], b[1], b[2], b[3],
                ]))))
            }
            27 => {
                let b = self.read_bytes(8)?;
                Ok(Value::Float(f64::from_be_bytes([
                    b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
                ])))
            }
            28..=30 => Err(CodecError::invalid_structure("reserved additional info")),
            31 => Err(CodecError::invalid_structure("break outside indefinite item")),
            _ => Err(CodecError::unsupported_type(format!("simple value {info}"))),
        }
    }
}

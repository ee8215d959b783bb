//! MessagePack codec.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

const MAX_CONTAINER_ELEMENTS: u64 = 16 * 1024 * 1024;
const MAX_BYTES_LENGTH: u64 = 256 * 1024 * 1024;

/// Encode a value as MessagePack, appending to `out`.
pub fn to_msgpack(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(0xc0),
        Value::Bool(false) => out.push(0xc2),
        Value::Bool(true) => out.push(0xc3),
        Value::Int(n) => {
            if *n >= 0 {
                write_unsigned(out, *n as u64);
            } else {
                write_signed(out, *n);
            }
        }
        Value::Uint(n) => write_unsigned(out, *n),
        Value::Float(f) => {
            out.push(0xcb);
            out.extend_from_slice(&f.to_be_bytes());
        }
        Value::Str(text) => {
            let len = text.len();
            if len < 32 {
                out.push(0xa0 | len as u8);
            } else if let Ok(len) = u8::try_from(len) {
                out.push(0xd9);
                out.push(len);
            } else if let Ok(len) = u16::try_from(len) {
                out.push(0xda);
                out.extend_from_slice(&len.to_be_bytes());
            } else {
                out.push(0xdb);
                out.extend_from_slice(&(len as u32).to_be_bytes());
            }
            out.extend_from_slice(text.as_bytes());
        }
        Value::Bin(bytes) => {
            let len = bytes.len();
            if let Ok(len) = u8::try_from(len) {
                out.push(0xc4);
                out.push(len);
            } else if let Ok(len) = u16::try_from(len) {
                out.push(0xc5);
                out.extend_from_slice(&len.to_be_bytes());
            } else {
                out.push(0xc6);
                out.extend_from_slice(&(len as u32).to_be_bytes());
            }
            out.extend_from_slice(bytes);
        }
        Value::Array(items) => {
            let len = items.len();
            if len < 16 {
                out.push(0x90 | len as u8);
            } else if let Ok(len) = u16::try_from(len) {
                out.push(0xdc);
                out.extend_from_slice(&len.to_be_bytes());
            } else {
                out.push(0xdd);
                out.extend_from_slice(&(len as u32).to_be_bytes());
            }
            for item in items {
                to_msgpack(item, out);
            }
        }
        Value::Object(members) => {
            let len = members.len();
            if len < 16 {
                out.push(0x80 | len as u8);
            } else if let Ok(len) = u16::try_from(len) {
                out.push(0xde);
                out.extend_from_slice(&len.to_be_bytes());
            } else {
                out.push(0xdf);
                out.extend_from_slice(&(len as u32).to_be_bytes());
            }
            for (name, member) in members {
                to_msgpack(&Value::Str(name.clone()), out);
                to_msgpack(member, out);
            }
        }
    }
}

fn write_unsigned(out: &mut Vec<u8>, n: u64) {
    if n < 0x80 {
        out.push(n as u8);
    } else if let Ok(n) = u8::try_from(n) {
        out.push(0xcc);
        out.push(n);
    } else if let Ok(n) = u16::try_from(n) {
        out.push(0xcd);
        out.extend_from_slice(&n.to_be_bytes());
    } else if let Ok(n) = u32::try_from(n) {
        out.push(0xce);
        out.extend_from_slice(&n.to_be_bytes());
    } else {
        out.push(0xcf);
        out.extend_from_slice(&n.to_be_bytes());
    }
}

fn write_signed(out: &mut Vec<u8>, n: i64) {
    if n >= -32 {
        out.push(n as u8); // negative fixint
    } else if let Ok(n) = i8::try_from(n) {
        out.push(0xd0);
        out.push(n as u8);
    } else if let Ok(n) = i16::try_from(n) {
        out.push(0xd1);
        out.extend_from_slice(&n.to_be_bytes());
    } else if let Ok(n) = i32::try_from(n) {
        out.push(0xd2);
        out.extend_from_slice(&n.to_be_bytes());
    } else {
        out.push(0xd3);
        out.extend_from_slice(&n.to_be_bytes());
    }
}

/// Decode a value from MessagePack bytes.
pub fn from_msgpack(bytes: &[u8]) -> CodecResult<Value> {
    let mut decoder = MsgpackDecoder { data: bytes, pos: 0 };
    decoder.decode()
}

struct MsgpackDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> MsgpackDecoder<'a> {
    fn decode(&mut self) -> CodecResult<Value> {
        let marker = self.read_byte()?;
        match marker {
            0x00..=0x7f => Ok(Value::Int(i64::from(marker))),
            0xe0..=0xff => Ok(Value::Int(i64::from(marker as i8))),
            0xc0 => Ok(Value::Null),
            0xc2 => Ok(Value::Bool(false)),
            0xc3 => Ok(Value::Bool(true)),
            0xcc => Ok(Value::Int(i64::from(self.read_byte()?))),
            0xcd => Ok(Value::Int(i64::from(self.read_u16()?))),
            0xce => Ok(Value::Int(i64::from(self.read_u32()?))),
            0xcf => Ok(Value::from_unsigned(self.read_u64()?)),
            0xd0 => Ok(Value::Int(i64::from(self.read_byte()? as i8))),
            0xd1 => Ok(Value::Int(i64::from(self.read_u16()? as i16))),
            0xd2 => Ok(Value::Int(i64::from(self.read_u32()? as i32))),
            0xd3 => Ok(Value::Int(self.read_u64()? as i64)),
            0xca => {
                let b = self.read_bytes(4)?;
                Ok(Value::Float(f64::from(f32::from_be_bytes([
                    b[0], b[1], b[2], b[3],
                ]))))
            }
            0xcb => {
                let b = self.read_bytes(8)?;
                Ok(Value::Float(f64::from_be_bytes([
                    b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
                ])))
            }
            0xa0..=0xbf => self.read_str(u64::from(marker & 0x1f)),
            0xd9 => {
                let len = u64::from(self.read_byte()?);
                self.read_str(len)
            }
            0xda => {
                let len = u64::from(self.read_u16()?);
                self.read_str(len)
            }
            0xdb => {
                let len = u64::from(self.read_u32()?);
                self.read_str(len)
            }
            0xc4 => {
                let len = u64::from(self.read_byte()?);
                self.read_bin(len)
            }
            0xc5 => {
                let len = u64::from(self.read_u16()?);
                self.read_bin(len)
            }
            0xc6 => {
                let len = u64::from(self.read_u32()?);
                self.read_bin(len)
            }
            0x90..=0x9f => self.read_array(u64::from(marker & 0x0f)),
            0xdc => {
                let len = u64::from(self.read_u16()?);
                self.read_array(len)
            }
            0xdd => {
                let len = u64::from(self.read_u32()?);
                self.read_array(len)
            }
            0x80..=0x8f => self.read_map(u64::from(marker & 0x0f)),
            0xde => {
                let len = u64::from(self.read_u16()?);
                self.read_map(len)
            }
            0xdf => {
                let len = u64::from(self.read_u32()?);
                self.read_map(len)
            }
            0xc1 => Err(CodecError::invalid_structure("reserved marker 0xc1")),
            other => Err(CodecError::unsupported_type(format!(
                "MessagePack marker {other:#04x}"
            ))),
        }
    }

    fn read_str(&mut self, len: u64) -> CodecResult<Value> {
        let len = check_len(len, MAX_BYTES_LENGTH)?;
        let text = std::str::from_utf8(self.read_bytes(len)?)
            .map_err(|_| CodecError::InvalidUtf8)?;
        Ok(Value::Str(text.to_string()))
    }

    fn read_bin(&mut self, len: u64) -> CodecResult<Value> {
        let len = check_len(len, MAX_BYTES_LENGTH)?;
        Ok(Value::Bin(self.read_bytes(len)?.to_vec()))
    }

    fn read_array(&mut self, len: u64) -> CodecResult<Value> {
        let len = check_len(len, MAX_CONTAINER_ELEMENTS)?;
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(self.decode()?);
        }
        Ok(Value::Array(items))
    }

    fn read_map(&mut self, len: u64) -> CodecResult<Value> {
        let len = check_len(len, MAX_CONTAINER_ELEMENTS)?;
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

    fn read_u16(&mut self) -> CodecResult<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> CodecResult<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> CodecResult<u64> {
        let b = self.read_bytes(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }
}

fn check_len(len: u64, max: u64) -> CodecResult<usize> {
    if len > max {
        return Err(CodecError::SizeLimitExceeded {
            claimed: len,
            max_allowed: max,
        });
    }
    Ok(len as usize)
}

//! # Strata Codec
//!
//! The document tree and every wire codec Strata speaks.
//!
//! Documents are dynamic [`Value`] trees. On disk they are CBOR; on the
//! wire they may arrive or leave as JSON, MessagePack, BSON, CBOR, UBJSON,
//! a JSON-Patch or Merge-Patch to apply, or a raw binary leaf. This crate
//! also carries the addressing machinery of the document modality: JSON
//! Pointers, flatten/unflatten, and the two patch algorithms.
//!
//! Serializers append into a caller-provided buffer so output can land
//! directly on an arena tape instead of the general heap.
//!
//! ## Usage
//!
//! ```
//! use strata_codec::{parse_any, serialize_any, DocFormat, Value};
//!
//! let doc = parse_any(br#"{"a": 1}"#, DocFormat::Json).unwrap();
//! assert_eq!(doc.get("a"), Some(&Value::Int(1)));
//!
//! let mut out = Vec::new();
//! serialize_any(&doc, DocFormat::Msgpack, &mut out).unwrap();
//! assert_eq!(parse_any(&out, DocFormat::Msgpack).unwrap(), doc);
//! ```

#![warn(missing_docs)]

pub mod bson;
pub mod cbor;
mod error;
pub mod json;
pub mod msgpack;
pub mod num;
pub mod patch;
pub mod pointer;
pub mod ubjson;
mod value;

pub use error::{CodecError, CodecResult};
pub use value::Value;

/// A document wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocFormat {
    /// JSON text.
    Json,
    /// An RFC 6902 operation list, as JSON text.
    JsonPatch,
    /// An RFC 7396 merge patch, as JSON text.
    JsonMergePatch,
    /// MessagePack.
    Msgpack,
    /// BSON.
    Bson,
    /// CBOR. Also the internal storage format.
    Cbor,
    /// UBJSON.
    Ubjson,
    /// Raw bytes forming a single binary leaf.
    BinaryLeaf,
}

impl DocFormat {
    /// The format documents are stored in.
    pub const INTERNAL: DocFormat = DocFormat::Cbor;

    /// Whether this format is a patch to apply rather than a value.
    #[must_use]
    pub fn is_patch(self) -> bool {
        matches!(self, DocFormat::JsonPatch | DocFormat::JsonMergePatch)
    }
}

/// Parses bytes in any accepted format into a document tree.
///
/// Patch formats parse as their JSON representation; the raw binary format
/// wraps the bytes in a binary leaf.
pub fn parse_any(bytes: &[u8], format: DocFormat) -> CodecResult<Value> {
    match format {
        DocFormat::Json | DocFormat::JsonPatch | DocFormat::JsonMergePatch => {
            json::from_json(bytes)
        }
        DocFormat::Msgpack => msgpack::from_msgpack(bytes),
        DocFormat::Bson => bson::from_bson(bytes),
        DocFormat::Cbor => cbor::from_cbor(bytes),
        DocFormat::Ubjson => ubjson::from_ubjson(bytes),
        DocFormat::BinaryLeaf => Ok(Value::Bin(bytes.to_vec())),
    }
}

/// Serializes a document tree into `out` in the requested format.
///
/// # Errors
///
/// Patch formats cannot be serialization targets and return
/// [`CodecError::UnsupportedType`]. The raw binary format accepts binary
/// and string leaves (their bytes), and null (empty payload).
pub fn serialize_any(value: &Value, format: DocFormat, out: &mut Vec<u8>) -> CodecResult<()> {
    match format {
        DocFormat::Json => json::to_json(value, out),
        DocFormat::Msgpack => {
            msgpack::to_msgpack(value, out);
            Ok(())
        }
        DocFormat::Bson => bson::to_bson(value, out),
        DocFormat::Cbor => {
            cbor::to_cbor(value, out);
            Ok(())
        }
        DocFormat::Ubjson => {
            ubjson::to_ubjson(value, out);
            Ok(())
        }
        DocFormat::BinaryLeaf => match value {
            Value::Bin(bytes) => {
                out.extend_from_slice(bytes);
                Ok(())
            }
            Value::Str(text) => {
                out.extend_from_slice(text.as_bytes());
                Ok(())
            }
            Value::Null => Ok(()),
            other => Err(CodecError::unsupported_type(format!(
                "cannot export {} as a binary leaf",
                other.kind()
            ))),
        },
        DocFormat::JsonPatch | DocFormat::JsonMergePatch => Err(CodecError::unsupported_type(
            "patch formats are inputs only",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        Value::object(vec![
            ("name".to_string(), Value::Str("Alice".into())),
            ("age".to_string(), Value::Int(30)),
            ("tags".to_string(), Value::Array(vec![Value::Str("a".into()), Value::Null])),
            ("ratio".to_string(), Value::Float(0.5)),
        ])
    }

    #[test]
    fn every_value_format_round_trips() {
        for format in [
            DocFormat::Json,
            DocFormat::Msgpack,
            DocFormat::Bson,
            DocFormat::Cbor,
            DocFormat::Ubjson,
        ] {
            let doc = sample();
            let mut out = Vec::new();
            serialize_any(&doc, format, &mut out).unwrap();
            assert_eq!(parse_any(&out, format).unwrap(), doc, "{format:?}");
        }
    }

    #[test]
    fn binary_leaf_round_trip() {
        let doc = parse_any(&[1, 2, 3], DocFormat::BinaryLeaf).unwrap();
        assert_eq!(doc, Value::Bin(vec![1, 2, 3]));

        let mut out = Vec::new();
        serialize_any(&doc, DocFormat::BinaryLeaf, &mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3]);

        out.clear();
        serialize_any(&Value::Null, DocFormat::BinaryLeaf, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn patch_formats_parse_as_json() {
        let patch = parse_any(br#"[{"op": "add", "path": "/a", "value": 1}]"#, DocFormat::JsonPatch)
            .unwrap();
        assert!(matches!(patch, Value::Array(_)));
        assert!(DocFormat::JsonPatch.is_patch());
        assert!(!DocFormat::Json.is_patch());
    }

    #[test]
    fn patch_formats_do_not_serialize() {
        let mut out = Vec::new();
        assert!(serialize_any(&sample(), DocFormat::JsonPatch, &mut out).is_err());
    }

    #[test]
    fn internal_format_is_cbor() {
        assert_eq!(DocFormat::INTERNAL, DocFormat::Cbor);
    }

    #[test]
    fn cross_format_conversion() {
        // JSON in, MessagePack out, CBOR back in: one tree throughout.
        let doc = parse_any(br#"{"a": 1, "b": "2"}"#, DocFormat::Json).unwrap();
        let mut packed = Vec::new();
        serialize_any(&doc, DocFormat::Msgpack, &mut packed).unwrap();
        let reparsed = parse_any(&packed, DocFormat::Msgpack).unwrap();
        let mut stored = Vec::new();
        serialize_any(&reparsed, DocFormat::Cbor, &mut stored).unwrap();
        assert_eq!(parse_any(&stored, DocFormat::Cbor).unwrap(), doc);
    }
}

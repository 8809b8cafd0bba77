//! Record Data Structure and Codec
//!
//! This module defines the core `Record` type - the fundamental unit of data
//! in LogVault - together with the typed payload codec.
//!
//! ## What is a Record?
//! A record is a single entry in a partition log, similar to:
//! - A Kafka message
//! - A log entry
//! - An event in an event stream
//!
//! ## Structure
//! Each record carries:
//! - **offset**: Unique, monotonically increasing ID within a partition,
//!   always assigned by the storage engine at append time
//! - **data_type**: How the payload bytes should be interpreted
//! - **payload**: The raw bytes as they appear on disk
//! - **partition_key**: The log the record belongs to
//!
//! ## Wire Format
//!
//! On disk a record is framed as:
//!
//! ```text
//! ┌────────────────┬──────────┬──────────────────┐
//! │ length (u32 BE)│ tag (u8) │ payload bytes    │
//! └────────────────┴──────────┴──────────────────┘
//!   length = 1 + payload.len()
//! ```
//!
//! The type tags are part of the on-disk format and must not be reordered:
//! `Json = 0`, `Bytes = 1`, `String = 2`.
//!
//! ## Design Decisions
//! - Uses `bytes::Bytes` for zero-copy payload handling
//! - The typed edge is a tagged sum ([`Value`]) rather than a dynamic "any";
//!   encode and decode operate by case
//! - JSON payloads are re-parsed once on encode so that only structurally
//!   valid documents ever reach the store file

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Size of the big-endian `u32` length prefix of a stored record.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Size of the type tag byte of a stored record.
pub const TYPE_TAG_LEN: usize = 1;

/// How the payload bytes of a record should be interpreted.
///
/// The numeric values are the on-disk type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Json = 0,
    Bytes = 1,
    String = 2,
}

impl DataType {
    /// Returns the on-disk tag byte for this type.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parses an on-disk tag byte.
    pub fn from_u8(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(DataType::Json),
            1 => Ok(DataType::Bytes),
            2 => Ok(DataType::String),
            other => Err(Error::UnknownDataType(other)),
        }
    }
}

/// A typed record payload at the codec edge.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Json(serde_json::Value),
    Bytes(Bytes),
    String(String),
}

impl Value {
    /// Returns the data type this value encodes as.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Json(_) => DataType::Json,
            Value::Bytes(_) => DataType::Bytes,
            Value::String(_) => DataType::String,
        }
    }
}

/// A single record in a partition log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Offset of this record in its partition. Assigned by the storage
    /// engine at append time; never user-supplied.
    pub offset: u64,

    /// Interpretation of the payload bytes.
    pub data_type: DataType,

    /// Payload bytes exactly as stored on disk.
    pub payload: Bytes,

    /// The partition log this record belongs to.
    pub partition_key: String,
}

impl Record {
    /// Encodes a typed value into a record for the given partition.
    ///
    /// The declared `data_type` must agree with the value's case; JSON
    /// values are serialised and re-parsed once to confirm structural
    /// validity. The offset is left at zero - the engine assigns it.
    pub fn new(
        value: Value,
        data_type: DataType,
        partition_key: impl Into<String>,
    ) -> Result<Self> {
        if value.data_type() != data_type {
            return Err(Error::TypeMismatch {
                expected: data_type,
            });
        }
        let payload = match value {
            Value::Json(v) => {
                let raw = serde_json::to_vec(&v)?;
                let _: serde_json::Value = serde_json::from_slice(&raw)?;
                Bytes::from(raw)
            }
            Value::Bytes(b) => b,
            Value::String(s) => Bytes::from(s),
        };

        Ok(Self {
            offset: 0,
            data_type,
            payload,
            partition_key: partition_key.into(),
        })
    }

    /// Decodes the payload back into its typed form.
    pub fn value(&self) -> Result<Value> {
        match self.data_type {
            DataType::Json => Ok(Value::Json(serde_json::from_slice(&self.payload)?)),
            DataType::Bytes => Ok(Value::Bytes(self.payload.clone())),
            DataType::String => Ok(Value::String(String::from_utf8(self.payload.to_vec())?)),
        }
    }

    /// The exact number of bytes this record occupies in a store file:
    /// length prefix + tag byte + payload.
    pub fn encoded_len(&self) -> u64 {
        (LENGTH_PREFIX_LEN + TYPE_TAG_LEN + self.payload.len()) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ---------------------------------------------------------------
    // Type tags
    // ---------------------------------------------------------------

    #[test]
    fn test_tags_are_stable() {
        assert_eq!(DataType::Json.as_u8(), 0);
        assert_eq!(DataType::Bytes.as_u8(), 1);
        assert_eq!(DataType::String.as_u8(), 2);
    }

    #[test]
    fn test_tag_roundtrip() {
        for dt in [DataType::Json, DataType::Bytes, DataType::String] {
            assert_eq!(DataType::from_u8(dt.as_u8()).unwrap(), dt);
        }
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let err = DataType::from_u8(3).unwrap_err();
        assert!(matches!(err, Error::UnknownDataType(3)));
    }

    // ---------------------------------------------------------------
    // Encode
    // ---------------------------------------------------------------

    #[test]
    fn test_encode_json() {
        let rec = Record::new(
            Value::Json(json!({"key": "value"})),
            DataType::Json,
            "p1",
        )
        .unwrap();
        assert_eq!(rec.offset, 0);
        assert_eq!(rec.data_type, DataType::Json);
        assert_eq!(rec.partition_key, "p1");
        assert_eq!(rec.payload, Bytes::from(r#"{"key":"value"}"#));
    }

    #[test]
    fn test_encode_bytes() {
        let rec = Record::new(
            Value::Bytes(Bytes::from_static(&[0u8, 1, 255])),
            DataType::Bytes,
            "p1",
        )
        .unwrap();
        assert_eq!(rec.payload, Bytes::from_static(&[0u8, 1, 255]));
    }

    #[test]
    fn test_encode_string() {
        let rec = Record::new(Value::String("hello".into()), DataType::String, "p1").unwrap();
        assert_eq!(rec.payload, Bytes::from("hello"));
    }

    #[test]
    fn test_encode_type_mismatch_bytes() {
        let err = Record::new(Value::String("s".into()), DataType::Bytes, "p1").unwrap_err();
        assert!(matches!(
            err,
            Error::TypeMismatch {
                expected: DataType::Bytes
            }
        ));
    }

    #[test]
    fn test_encode_type_mismatch_string() {
        let err =
            Record::new(Value::Bytes(Bytes::from("b")), DataType::String, "p1").unwrap_err();
        assert!(matches!(
            err,
            Error::TypeMismatch {
                expected: DataType::String
            }
        ));
    }

    #[test]
    fn test_encode_type_mismatch_json() {
        let err = Record::new(Value::Bytes(Bytes::from("b")), DataType::Json, "p1").unwrap_err();
        assert!(matches!(
            err,
            Error::TypeMismatch {
                expected: DataType::Json
            }
        ));
    }

    // ---------------------------------------------------------------
    // Decode
    // ---------------------------------------------------------------

    #[test]
    fn test_decode_json_roundtrip() {
        let original = json!({"id": 7, "nested": {"flag": true}});
        let rec = Record::new(Value::Json(original.clone()), DataType::Json, "p1").unwrap();
        match rec.value().unwrap() {
            Value::Json(v) => assert_eq!(v, original),
            other => panic!("expected Json, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_bytes_roundtrip() {
        let rec = Record::new(
            Value::Bytes(Bytes::from_static(b"\x00\xffraw")),
            DataType::Bytes,
            "p1",
        )
        .unwrap();
        match rec.value().unwrap() {
            Value::Bytes(b) => assert_eq!(b, Bytes::from_static(b"\x00\xffraw")),
            other => panic!("expected Bytes, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_string_roundtrip() {
        let rec = Record::new(Value::String("data1".into()), DataType::String, "p1").unwrap();
        match rec.value().unwrap() {
            Value::String(s) => assert_eq!(s, "data1"),
            other => panic!("expected String, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_invalid_json_payload() {
        let rec = Record {
            offset: 0,
            data_type: DataType::Json,
            payload: Bytes::from("{not json"),
            partition_key: "p1".into(),
        };
        assert!(matches!(rec.value(), Err(Error::InvalidJson(_))));
    }

    #[test]
    fn test_decode_invalid_utf8_string() {
        let rec = Record {
            offset: 0,
            data_type: DataType::String,
            payload: Bytes::from_static(&[0xff, 0xfe]),
            partition_key: "p1".into(),
        };
        assert!(matches!(rec.value(), Err(Error::InvalidUtf8(_))));
    }

    // ---------------------------------------------------------------
    // Encoded size
    // ---------------------------------------------------------------

    #[test]
    fn test_encoded_len_is_payload_plus_frame() {
        let rec = Record::new(Value::String("abcde".into()), DataType::String, "p1").unwrap();
        // 4-byte length prefix + 1-byte tag + 5 payload bytes
        assert_eq!(rec.encoded_len(), 10);
    }

    #[test]
    fn test_encoded_len_empty_payload() {
        let rec = Record::new(Value::Bytes(Bytes::new()), DataType::Bytes, "p1").unwrap();
        assert_eq!(rec.encoded_len(), 5);
    }
}

//! Error Types for the Record Codec
//!
//! This module defines the errors that can occur while encoding or decoding
//! record payloads.
//!
//! ## Error Categories
//!
//! ### Encode Errors
//! - `InvalidJson`: a JSON payload failed structural validation
//! - `TypeMismatch`: the payload value does not match the declared data type
//!
//! ### Decode Errors
//! - `InvalidJson`: stored bytes are not parseable JSON
//! - `InvalidUtf8`: a string record holds bytes that are not valid UTF-8
//! - `UnknownDataType`: the on-disk type tag is not one of the known values
//!
//! All codec functions return `Result<T>` which is aliased to
//! `Result<T, Error>`, allowing `?` propagation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid JSON data: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("payload does not match declared type {expected:?}")]
    TypeMismatch { expected: crate::record::DataType },

    #[error("string payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("unknown data type tag: {0}")]
    UnknownDataType(u8),
}

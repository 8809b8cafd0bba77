//! Storage Error Types
//!
//! This module defines all error types that can occur during storage
//! operations.
//!
//! ## Error Categories
//!
//! ### Lookup Errors
//! - `PartitionNotFound`: a read targeted a partition that doesn't exist
//! - `OffsetNotFound`: the offset is outside every segment's range
//!
//! ### I/O Errors
//! - `StoreIo`: filesystem failure on a store file
//! - `IndexIo`: filesystem failure on an index file
//! - `IndexWriteFailed`: the index append failed after bounded retry; the
//!   record is durable in the store and a repair request has been queued
//!
//! ### Data Errors
//! - `Record`: codec failure (invalid JSON, type mismatch)
//! - `Corruption`: a read found an impossible length prefix or an unknown
//!   type tag
//!
//! All storage operations return `Result<T>` which is aliased to
//! `Result<T, Error>`. Errors surface to the caller unchanged; the engine
//! recovers nothing locally except through the repair worker.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("record codec error: {0}")]
    Record(#[from] logvault_core::Error),

    #[error("partition not found: {0}")]
    PartitionNotFound(String),

    #[error("offset not found: {partition}/{offset}")]
    OffsetNotFound { partition: String, offset: u64 },

    #[error("store file I/O error: {0}")]
    StoreIo(#[source] std::io::Error),

    #[error("index file I/O error: {0}")]
    IndexIo(#[source] std::io::Error),

    #[error("index write failed after retries for {partition}/{offset}; repair scheduled")]
    IndexWriteFailed { partition: String, offset: u64 },

    #[error("corrupt record data: {0}")]
    Corruption(String),
}

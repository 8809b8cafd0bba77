//! LogVault Storage Layer
//!
//! This crate implements the single-node storage engine for LogVault - a
//! partitioned, append-only record log with durable on-disk segments,
//! sequential per-partition offsets, random-access reads by offset, and
//! online self-repair of store/index inconsistency.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────┐
//! │        StorageEngine         │  append / read / close
//! │  ┌────────────────────────┐  │
//! │  │ Partition "orders"     │  │  rollover policy, current_offset
//! │  │  ├─ Segment 0 (sealed) │  │  segment_0.store + segment_0.index
//! │  │  ├─ Segment 7 (sealed) │  │
//! │  │  └─ Segment 12 (active)│  │
//! │  └────────────────────────┘  │
//! │  ┌────────────────────────┐  │
//! │  │ Partition "events"     │  │
//! │  └────────────────────────┘  │
//! └──────────────┬───────────────┘
//!                │ repair queue (bounded, non-blocking)
//!                ▼
//!         RepairWorker            rebuilds index entries from the store
//! ```
//!
//! ## Durability Model
//!
//! Every append fsyncs the store file before the index file is touched, so
//! an index entry always points at durable bytes. A record becomes visible
//! to readers once its index entry is fsynced. If the index write fails (or
//! the process crashes between the two fsyncs) the store runs ahead of the
//! index; the repair worker scans the store and appends the missing index
//! entries - it never deletes data.
//!
//! ## Usage
//!
//! ```ignore
//! use logvault_core::{DataType, Record, Value};
//! use logvault_storage::{StorageConfig, StorageEngine};
//!
//! let engine = StorageEngine::open(StorageConfig {
//!     data_dir: "/var/lib/logvault".into(),
//!     ..Default::default()
//! })
//! .await?;
//!
//! let record = Record::new(
//!     Value::Json(serde_json::json!({"amount": 99.99})),
//!     DataType::Json,
//!     "orders",
//! )?;
//! let offset = engine.append(record).await?;
//!
//! let read_back = engine.read("orders", offset).await?;
//! engine.close().await?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod partition;
mod repair;
pub mod segment;

pub use config::StorageConfig;
pub use engine::{AppendHook, StorageEngine};
pub use error::{Error, Result};
pub use partition::Partition;
pub use segment::{Segment, INDEX_ENTRY_SIZE};

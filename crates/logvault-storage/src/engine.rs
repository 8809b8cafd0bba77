//! Storage Engine
//!
//! The engine owns the partition map and implements the append/read
//! protocol over the segment file pairs.
//!
//! ## Write Path
//!
//! ```text
//! append(record)
//!     ↓
//! write lock ──► partition lookup/create
//!     ↓
//! rollover check ──► active segment
//!     ↓
//! store append + fsync        ← the record is durable here
//!     ↓
//! index append + fsync        ← the record is visible here
//!     ↓ (bounded retry; on failure: repair queued, caller sees the error,
//!     ↓  the store write is NOT rolled back)
//! counters advance ──► sanity check ──► unlock ──► on_append hook
//! ```
//!
//! The store fsync strictly precedes the index write, so an index entry
//! always refers to bytes already durable in the store. The reverse gap -
//! store ahead of index after a crash or index failure - is closed by the
//! repair worker.
//!
//! ## Read Path
//!
//! Readers share the lock: locate the segment covering the offset, seek the
//! index at `(offset - base) * 16`, then seek the store at the recorded
//! position and decode one frame. File handles are opened per operation and
//! released before the lock is.
//!
//! ## Thread Safety
//!
//! The engine is Send + Sync and is shared via `Arc`. A single
//! readers-writer lock serialises writers (and the repair worker) while
//! admitting concurrent readers.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use logvault_core::record::{LENGTH_PREFIX_LEN, TYPE_TAG_LEN};
use logvault_core::{DataType, Record};

use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::partition::Partition;
use crate::repair::{self, RepairWorker, REPAIR_QUEUE_CAPACITY};
use crate::segment::{parse_store_file_name, Segment, INDEX_ENTRY_SIZE};

/// Bounded retry count for the index append.
const INDEX_WRITE_ATTEMPTS: u32 = 3;

/// Callback invoked with a snapshot of each record appended through
/// [`StorageEngine::append`], after the engine lock is released.
pub type AppendHook = Arc<dyn Fn(Record) + Send + Sync>;

/// The single-node storage engine: partitioned, append-only, with
/// random-access reads by offset and online store/index repair.
pub struct StorageEngine {
    config: StorageConfig,
    partitions: Arc<RwLock<HashMap<String, Partition>>>,
    repair_tx: mpsc::Sender<String>,
    repair_worker: JoinHandle<()>,
    on_append: Option<AppendHook>,
}

impl StorageEngine {
    /// Opens the engine: creates the data directory, reconstructs partitions
    /// and segments from disk, starts the repair worker, and queues repair
    /// for any partition whose index lags its store.
    pub async fn open(config: StorageConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)
            .await
            .map_err(Error::StoreIo)?;

        let partitions = load_partitions(&config).await?;

        let mut damaged = Vec::new();
        for (key, partition) in &partitions {
            for segment in partition.segments() {
                match repair::sanity_check(segment).await {
                    Ok(counts) if !counts.consistent() => {
                        tracing::warn!(
                            partition = %key,
                            base_offset = segment.base_offset,
                            store_records = counts.store_records,
                            index_entries = counts.index_entries,
                            "store/index mismatch found at startup, scheduling repair"
                        );
                        damaged.push(key.clone());
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(
                            partition = %key,
                            base_offset = segment.base_offset,
                            error = %e,
                            "sanity check failed at startup, scheduling repair"
                        );
                        damaged.push(key.clone());
                        break;
                    }
                }
            }
        }

        let partitions = Arc::new(RwLock::new(partitions));
        let (repair_tx, repair_rx) = mpsc::channel(REPAIR_QUEUE_CAPACITY);
        let worker = RepairWorker::new(Arc::clone(&partitions), repair_rx);
        let repair_worker = tokio::spawn(worker.run());

        let engine = Self {
            config,
            partitions,
            repair_tx,
            repair_worker,
            on_append: None,
        };
        for key in damaged {
            engine.request_repair(&key);
        }
        Ok(engine)
    }

    /// Installs the replication hook. It receives a copy of every record
    /// appended through [`append`](Self::append), including its assigned
    /// offset, outside the engine lock. Hook behaviour never affects the
    /// append result.
    pub fn set_on_append<F>(&mut self, hook: F)
    where
        F: Fn(Record) + Send + Sync + 'static,
    {
        self.on_append = Some(Arc::new(hook));
    }

    /// Appends a record to its partition and returns the assigned offset.
    pub async fn append(&self, record: Record) -> Result<u64> {
        self.append_inner(record, true).await
    }

    /// Appends a record received from the replication layer. Identical
    /// protocol, but the `on_append` hook is not invoked, so replicated
    /// writes cannot echo back into replication.
    pub async fn append_replicated(&self, record: Record) -> Result<u64> {
        self.append_inner(record, false).await
    }

    async fn append_inner(&self, mut record: Record, notify: bool) -> Result<u64> {
        let encoded_size = record.encoded_len();

        {
            let mut partitions = self.partitions.write().await;
            let partition = match partitions.entry(record.partition_key.clone()) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => {
                    let partition = Partition::new(
                        &record.partition_key,
                        &self.config.data_dir,
                        self.config.max_file_size,
                    );
                    fs::create_dir_all(partition.dir())
                        .await
                        .map_err(Error::StoreIo)?;
                    tracing::info!(partition = %record.partition_key, "partition created");
                    e.insert(partition)
                }
            };

            let segment = partition.segment_for_append(encoded_size);
            record.offset = segment.next_offset;
            let store_path = segment.store_path.clone();
            let index_path = segment.index_path.clone();

            // Store write: the end-of-file position recorded here is what
            // the index entry will point at.
            let mut store = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&store_path)
                .await
                .map_err(Error::StoreIo)?;
            let position = store.metadata().await.map_err(Error::StoreIo)?.len();

            let mut frame = BytesMut::with_capacity(encoded_size as usize);
            frame.put_u32((record.payload.len() + TYPE_TAG_LEN) as u32);
            frame.put_u8(record.data_type.as_u8());
            frame.put_slice(&record.payload);
            store.write_all(&frame).await.map_err(Error::StoreIo)?;
            store.sync_all().await.map_err(Error::StoreIo)?;

            // Index write with bounded retry. On exhaustion the store write
            // stays: the record is durable and the repair worker will
            // reconstruct the entry.
            let mut entry = BytesMut::with_capacity(INDEX_ENTRY_SIZE);
            entry.put_u64(record.offset);
            entry.put_u64(position);
            for attempt in 0..INDEX_WRITE_ATTEMPTS {
                match append_index_entry(&index_path, &entry).await {
                    Ok(()) => break,
                    Err(e) if attempt < INDEX_WRITE_ATTEMPTS - 1 => {
                        tracing::warn!(
                            partition = %record.partition_key,
                            offset = record.offset,
                            attempt = attempt + 1,
                            error = %e,
                            "index write failed, retrying"
                        );
                    }
                    Err(e) => {
                        tracing::error!(
                            partition = %record.partition_key,
                            offset = record.offset,
                            error = %e,
                            "index write failed after all retries, scheduling repair"
                        );
                        self.request_repair(&record.partition_key);
                        return Err(Error::IndexWriteFailed {
                            partition: record.partition_key,
                            offset: record.offset,
                        });
                    }
                }
            }

            partition.commit_append(encoded_size);

            // Inline sanity check; a mismatch means the record is durable
            // but under-indexed, which the repair worker can fix, so the
            // append still succeeds.
            if let Some(segment) = partition.find_segment(record.offset) {
                match repair::sanity_check(segment).await {
                    Ok(counts) if !counts.consistent() => {
                        tracing::warn!(
                            partition = %record.partition_key,
                            base_offset = segment.base_offset,
                            store_records = counts.store_records,
                            index_entries = counts.index_entries,
                            "store/index mismatch after append, scheduling repair"
                        );
                        self.request_repair(&record.partition_key);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(
                            partition = %record.partition_key,
                            error = %e,
                            "post-append sanity check failed"
                        );
                    }
                }
            }
        }

        let offset = record.offset;
        if notify {
            if let Some(hook) = &self.on_append {
                hook(record);
            }
        }
        Ok(offset)
    }

    /// Reads the record at `offset` in `partition_key`.
    ///
    /// Reads share the lock with each other and do not modify engine state.
    /// Any record whose index entry is durable is readable.
    pub async fn read(&self, partition_key: &str, offset: u64) -> Result<Record> {
        let partitions = self.partitions.read().await;
        let partition = partitions
            .get(partition_key)
            .ok_or_else(|| Error::PartitionNotFound(partition_key.to_string()))?;
        let segment = partition
            .find_segment(offset)
            .ok_or_else(|| Error::OffsetNotFound {
                partition: partition_key.to_string(),
                offset,
            })?;

        // Index lookup: entry i lives at byte i * 16. The stored offset
        // field is advisory; the position drives the read.
        let mut index = File::open(&segment.index_path)
            .await
            .map_err(Error::IndexIo)?;
        let relative = offset - segment.base_offset;
        index
            .seek(SeekFrom::Start(relative * INDEX_ENTRY_SIZE as u64))
            .await
            .map_err(Error::IndexIo)?;
        let mut stored_offset = [0u8; 8];
        let mut position_buf = [0u8; 8];
        index
            .read_exact(&mut stored_offset)
            .await
            .map_err(Error::IndexIo)?;
        index
            .read_exact(&mut position_buf)
            .await
            .map_err(Error::IndexIo)?;
        let position = u64::from_be_bytes(position_buf);

        // Store read: one frame at the recorded position.
        let mut store = File::open(&segment.store_path)
            .await
            .map_err(Error::StoreIo)?;
        let store_len = store.metadata().await.map_err(Error::StoreIo)?.len();
        store
            .seek(SeekFrom::Start(position))
            .await
            .map_err(Error::StoreIo)?;
        let mut len_buf = [0u8; LENGTH_PREFIX_LEN];
        store.read_exact(&mut len_buf).await.map_err(Error::StoreIo)?;
        let length = u32::from_be_bytes(len_buf) as u64;
        if length == 0 || position + LENGTH_PREFIX_LEN as u64 + length > store_len {
            return Err(Error::Corruption(format!(
                "record frame at {}:{position} overruns the store file",
                segment.store_path.display()
            )));
        }

        let mut tag = [0u8; TYPE_TAG_LEN];
        store.read_exact(&mut tag).await.map_err(Error::StoreIo)?;
        let data_type = DataType::from_u8(tag[0]).map_err(|_| {
            Error::Corruption(format!(
                "unknown type tag {} at {}:{position}",
                tag[0],
                segment.store_path.display()
            ))
        })?;

        let mut payload = vec![0u8; (length as usize) - TYPE_TAG_LEN];
        store
            .read_exact(&mut payload)
            .await
            .map_err(Error::StoreIo)?;

        Ok(Record {
            offset,
            data_type,
            payload: payload.into(),
            partition_key: partition_key.to_string(),
        })
    }

    /// Shuts the engine down: closes the repair queue and waits for the
    /// worker, which drains pending requests before exiting. All appended
    /// records were fsynced as part of their append, so there is no other
    /// outstanding work.
    pub async fn close(self) -> Result<()> {
        let StorageEngine {
            repair_tx,
            repair_worker,
            ..
        } = self;
        drop(repair_tx);
        if let Err(e) = repair_worker.await {
            tracing::error!(error = %e, "repair worker task failed");
        }
        Ok(())
    }

    /// Queues the partition for reconciliation. Never blocks: a pending
    /// request suffices, and a full or closed queue (shutdown in progress)
    /// just drops the duplicate.
    fn request_repair(&self, partition_key: &str) {
        if let Err(e) = self.repair_tx.try_send(partition_key.to_string()) {
            tracing::debug!(
                partition = %partition_key,
                reason = %e,
                "repair request dropped"
            );
        }
    }
}

/// Appends one entry to an index file and fsyncs it.
async fn append_index_entry(path: &Path, entry: &[u8]) -> std::io::Result<()> {
    let mut index = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    index.write_all(entry).await?;
    index.sync_all().await?;
    Ok(())
}

/// Reconstructs the partition map from the data directory.
///
/// Each immediate subdirectory is a partition key; within it, every
/// `segment_<base>.store` file yields a segment whose size comes from the
/// store's stat and whose `next_offset` comes from the index length.
async fn load_partitions(config: &StorageConfig) -> Result<HashMap<String, Partition>> {
    let mut partitions = HashMap::new();
    let mut dirs = fs::read_dir(&config.data_dir).await.map_err(Error::StoreIo)?;
    while let Some(entry) = dirs.next_entry().await.map_err(Error::StoreIo)? {
        let file_type = entry.file_type().await.map_err(Error::StoreIo)?;
        if !file_type.is_dir() {
            continue;
        }
        let key = entry.file_name().to_string_lossy().into_owned();
        let partition = load_partition(config, &key).await?;
        tracing::info!(
            partition = %key,
            segments = partition.segments().len(),
            current_offset = partition.current_offset(),
            "partition loaded"
        );
        partitions.insert(key, partition);
    }
    Ok(partitions)
}

async fn load_partition(config: &StorageConfig, key: &str) -> Result<Partition> {
    let mut segments = Vec::new();
    let dir = config.data_dir.join(key);
    let mut entries = fs::read_dir(&dir).await.map_err(Error::StoreIo)?;
    while let Some(entry) = entries.next_entry().await.map_err(Error::StoreIo)? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(base_offset) = parse_store_file_name(&name) else {
            continue;
        };
        let mut segment = Segment::new(key, base_offset, config.max_file_size, &config.data_dir);
        segment.size_bytes = fs::metadata(&segment.store_path)
            .await
            .map_err(Error::StoreIo)?
            .len();
        let index_len = match fs::metadata(&segment.index_path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(Error::IndexIo(e)),
        };
        segment.next_offset = base_offset + index_len / INDEX_ENTRY_SIZE as u64;
        segments.push(segment);
    }

    let mut partition = Partition::new(key, &config.data_dir, config.max_file_size);
    partition.restore(segments);
    Ok(partition)
}

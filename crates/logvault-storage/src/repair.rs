//! Store/index sanity check and the background repair worker.
//!
//! The append protocol fsyncs the store file before it touches the index
//! file, so a crash or an index-write failure can leave a segment with more
//! records in the store than entries in the index. The repair worker
//! restores equality by scanning the store and appending the missing index
//! entries - it reconstructs, it never deletes.
//!
//! ## Flow
//!
//! ```text
//! append path ──┐
//!               ├──► bounded queue ──► RepairWorker ──► index rebuild
//! recovery   ───┘      (try_send)       (one task)
//! ```
//!
//! The queue is bounded and senders never block: a pending request for a
//! partition is enough, so duplicates dropped under saturation are harmless.
//! Closing the queue shuts the worker down; it drains pending keys first.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::sync::{mpsc, RwLock};

use logvault_core::record::LENGTH_PREFIX_LEN;

use crate::partition::Partition;
use crate::segment::{Segment, INDEX_ENTRY_SIZE};

/// Capacity of the repair request queue.
pub(crate) const REPAIR_QUEUE_CAPACITY: usize = 16;

/// Record and entry counts for one segment's file pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SegmentCounts {
    pub store_records: u64,
    pub index_entries: u64,
}

impl SegmentCounts {
    /// Whether the index fully describes the store.
    pub(crate) fn consistent(self) -> bool {
        self.store_records == self.index_entries
    }
}

/// Counts store records against index entries for one segment.
pub(crate) async fn sanity_check(segment: &Segment) -> io::Result<SegmentCounts> {
    let positions = scan_store_positions(&segment.store_path).await?;
    Ok(SegmentCounts {
        store_records: positions.len() as u64,
        index_entries: count_index_entries(&segment.index_path).await?,
    })
}

/// Number of complete 16-byte entries in an index file. A missing file
/// counts as zero entries.
async fn count_index_entries(path: &Path) -> io::Result<u64> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.len() / INDEX_ENTRY_SIZE as u64),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}

/// Walks a store file hopping `4 + length` bytes per record and returns the
/// starting byte position of every complete record.
///
/// A torn frame at the tail (truncated length prefix or payload) ends the
/// scan; such a record was never acknowledged and is not counted.
async fn scan_store_positions(path: &Path) -> io::Result<Vec<u64>> {
    let mut file = match File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let file_len = file.metadata().await?.len();

    let mut positions = Vec::new();
    let mut pos = 0u64;
    let mut len_buf = [0u8; LENGTH_PREFIX_LEN];

    while pos + LENGTH_PREFIX_LEN as u64 <= file_len {
        file.seek(SeekFrom::Start(pos)).await?;
        file.read_exact(&mut len_buf).await?;
        let length = u32::from_be_bytes(len_buf) as u64;
        let next = pos + LENGTH_PREFIX_LEN as u64 + length;
        if length == 0 || next > file_len {
            tracing::warn!(
                path = %path.display(),
                position = pos,
                "torn record frame at store tail, scan stopped"
            );
            break;
        }
        positions.push(pos);
        pos = next;
    }

    Ok(positions)
}

/// Reconciles one segment's index against its store.
///
/// Appends `[base_offset + i, position]` entries for every record the index
/// is missing, fsyncing each one, then resyncs the in-memory counters from
/// the files. An index that is *longer* than the store indicates a writer
/// bug and is logged without touching either file.
pub(crate) async fn repair_segment(segment: &mut Segment) -> io::Result<()> {
    let positions = scan_store_positions(&segment.store_path).await?;
    let store_records = positions.len() as u64;
    let index_entries = count_index_entries(&segment.index_path).await?;

    if store_records < index_entries {
        tracing::error!(
            partition = %segment.partition_key,
            base_offset = segment.base_offset,
            store_records,
            index_entries,
            "index has more entries than store records; writer bug, files left untouched"
        );
        return Ok(());
    }

    if store_records > index_entries {
        let mut index = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&segment.index_path)
            .await?;
        for i in index_entries..store_records {
            let mut entry = BytesMut::with_capacity(INDEX_ENTRY_SIZE);
            entry.put_u64(segment.base_offset + i);
            entry.put_u64(positions[i as usize]);
            index.write_all(&entry).await?;
            index.sync_all().await?;
        }
        tracing::info!(
            partition = %segment.partition_key,
            base_offset = segment.base_offset,
            recovered = store_records - index_entries,
            "index entries reconstructed from store"
        );
    }

    // Counters may lag the files after a failed append; make the repaired
    // records addressable again.
    segment.next_offset = segment.base_offset + store_records;
    if let Ok(meta) = fs::metadata(&segment.store_path).await {
        segment.size_bytes = meta.len();
    }

    Ok(())
}

/// Long-lived background actor that reconciles partitions on request.
pub(crate) struct RepairWorker {
    partitions: Arc<RwLock<HashMap<String, Partition>>>,
    rx: mpsc::Receiver<String>,
}

impl RepairWorker {
    pub(crate) fn new(
        partitions: Arc<RwLock<HashMap<String, Partition>>>,
        rx: mpsc::Receiver<String>,
    ) -> Self {
        Self { partitions, rx }
    }

    /// Runs until the request queue closes, draining pending keys first.
    pub(crate) async fn run(mut self) {
        while let Some(key) = self.rx.recv().await {
            self.repair_partition(&key).await;
        }
        tracing::debug!("repair queue closed, worker exiting");
    }

    /// Reconciles every segment of the partition under the engine write
    /// lock, so repair serialises with appends like any other file writer.
    async fn repair_partition(&self, key: &str) {
        let mut partitions = self.partitions.write().await;
        let Some(partition) = partitions.get_mut(key) else {
            tracing::warn!(partition = %key, "repair requested for unknown partition");
            return;
        };

        for segment in partition.segments_mut() {
            if let Err(e) = repair_segment(segment).await {
                tracing::error!(
                    partition = %key,
                    base_offset = segment.base_offset,
                    error = %e,
                    "segment repair aborted"
                );
                // keep going; later segments may still be repairable
            }
        }
        partition.sync_current_offset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    async fn write_store_record(path: &Path, tag: u8, payload: &[u8]) {
        let mut frame = BytesMut::new();
        frame.put_u32((payload.len() + 1) as u32);
        frame.put_u8(tag);
        frame.put_slice(payload);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .unwrap();
        file.write_all(&frame).await.unwrap();
        file.sync_all().await.unwrap();
    }

    async fn write_index_entry(path: &Path, offset: u64, position: u64) {
        let mut entry = BytesMut::new();
        entry.put_u64(offset);
        entry.put_u64(position);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .unwrap();
        file.write_all(&entry).await.unwrap();
        file.sync_all().await.unwrap();
    }

    fn test_segment(dir: &TempDir) -> Segment {
        std::fs::create_dir_all(dir.path().join("p1")).unwrap();
        Segment::new("p1", 0, 1024, dir.path())
    }

    #[tokio::test]
    async fn test_sanity_check_empty_segment() {
        let dir = TempDir::new().unwrap();
        let seg = test_segment(&dir);
        let counts = sanity_check(&seg).await.unwrap();
        assert_eq!(counts.store_records, 0);
        assert_eq!(counts.index_entries, 0);
        assert!(counts.consistent());
    }

    #[tokio::test]
    async fn test_sanity_check_counts_both_files() {
        let dir = TempDir::new().unwrap();
        let seg = test_segment(&dir);
        write_store_record(&seg.store_path, 1, b"aa").await;
        write_store_record(&seg.store_path, 1, b"bbbb").await;
        write_index_entry(&seg.index_path, 0, 0).await;

        let counts = sanity_check(&seg).await.unwrap();
        assert_eq!(counts.store_records, 2);
        assert_eq!(counts.index_entries, 1);
        assert!(!counts.consistent());
    }

    #[tokio::test]
    async fn test_scan_stops_at_torn_tail() {
        let dir = TempDir::new().unwrap();
        let seg = test_segment(&dir);
        write_store_record(&seg.store_path, 1, b"ok").await;
        // claim 100 payload bytes but write none
        let mut file = OpenOptions::new()
            .append(true)
            .open(&seg.store_path)
            .await
            .unwrap();
        file.write_all(&101u32.to_be_bytes()).await.unwrap();
        file.sync_all().await.unwrap();

        let positions = scan_store_positions(&seg.store_path).await.unwrap();
        assert_eq!(positions, vec![0]);
    }

    #[tokio::test]
    async fn test_repair_appends_missing_entries() {
        let dir = TempDir::new().unwrap();
        let mut seg = test_segment(&dir);
        write_store_record(&seg.store_path, 1, b"one").await; // position 0, 8 bytes
        write_store_record(&seg.store_path, 1, b"two").await; // position 8
        write_store_record(&seg.store_path, 1, b"three").await; // position 16
        write_index_entry(&seg.index_path, 0, 0).await;

        repair_segment(&mut seg).await.unwrap();

        let index = std::fs::read(&seg.index_path).unwrap();
        assert_eq!(index.len(), 3 * INDEX_ENTRY_SIZE);
        // entry 1 points at the second record
        assert_eq!(u64::from_be_bytes(index[16..24].try_into().unwrap()), 1);
        assert_eq!(u64::from_be_bytes(index[24..32].try_into().unwrap()), 8);
        // entry 2 points at the third record
        assert_eq!(u64::from_be_bytes(index[32..40].try_into().unwrap()), 2);
        assert_eq!(u64::from_be_bytes(index[40..48].try_into().unwrap()), 16);
        assert_eq!(seg.next_offset, 3);
    }

    #[tokio::test]
    async fn test_repair_rebuilds_missing_index_file() {
        let dir = TempDir::new().unwrap();
        let mut seg = test_segment(&dir);
        write_store_record(&seg.store_path, 2, b"data1").await;
        write_store_record(&seg.store_path, 2, b"data2").await;

        repair_segment(&mut seg).await.unwrap();

        let index = std::fs::read(&seg.index_path).unwrap();
        assert_eq!(index.len(), 2 * INDEX_ENTRY_SIZE);
        assert_eq!(seg.next_offset, 2);
        assert_eq!(seg.size_bytes, std::fs::metadata(&seg.store_path).unwrap().len());
    }

    #[tokio::test]
    async fn test_repair_never_deletes_when_index_is_longer() {
        let dir = TempDir::new().unwrap();
        let mut seg = test_segment(&dir);
        write_store_record(&seg.store_path, 1, b"only").await;
        write_index_entry(&seg.index_path, 0, 0).await;
        write_index_entry(&seg.index_path, 1, 9).await;

        let index_before = std::fs::read(&seg.index_path).unwrap();
        let store_before = std::fs::read(&seg.store_path).unwrap();

        repair_segment(&mut seg).await.unwrap();

        assert_eq!(std::fs::read(&seg.index_path).unwrap(), index_before);
        assert_eq!(std::fs::read(&seg.store_path).unwrap(), store_before);
    }

    #[tokio::test]
    async fn test_worker_drains_queue_on_close() {
        let dir = TempDir::new().unwrap();
        let mut seg = test_segment(&dir);
        write_store_record(&seg.store_path, 1, b"solo").await;
        let store_path = seg.store_path.clone();
        let index_path = seg.index_path.clone();
        seg.next_offset = 0;

        let mut partition = Partition::new("p1", dir.path().to_path_buf(), 1024);
        partition.restore(vec![seg]);
        let partitions = Arc::new(RwLock::new(HashMap::from([("p1".to_string(), partition)])));

        let (tx, rx) = mpsc::channel(REPAIR_QUEUE_CAPACITY);
        let worker = RepairWorker::new(Arc::clone(&partitions), rx);
        let handle = tokio::spawn(worker.run());

        tx.try_send("p1".to_string()).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(
            std::fs::metadata(&index_path).unwrap().len(),
            INDEX_ENTRY_SIZE as u64
        );
        assert!(store_path.exists());
        let partitions = partitions.read().await;
        assert_eq!(partitions.get("p1").unwrap().current_offset(), 1);
    }

    #[tokio::test]
    async fn test_missing_store_counts_zero() {
        let path = PathBuf::from("/nonexistent/segment_0.store");
        let positions = scan_store_positions(&path).await.unwrap();
        assert!(positions.is_empty());
    }
}

//! Partition state.
//!
//! A partition is the append-only log for one key: an ordered list of
//! segments plus the partition's monotonically increasing `current_offset`.
//! The partition owns rollover policy - sealing the active segment and
//! creating its successor when the next record would exceed the segment
//! cap - while all physical I/O lives in the engine.
//!
//! Invariants:
//! - exactly one active segment, and it is the last in the list
//! - segment `n+1` starts where segment `n` sealed
//!   (`base_offset == next_offset` at the moment of seal)
//! - `current_offset` equals the active segment's `next_offset`

use std::path::PathBuf;

use crate::segment::Segment;

/// Append-only log state for one partition key.
#[derive(Debug)]
pub struct Partition {
    key: String,
    segments: Vec<Segment>,
    current_offset: u64,
    data_dir: PathBuf,
    max_bytes: u64,
}

impl Partition {
    /// Creates an empty partition. The initial segment is created lazily on
    /// the first append.
    pub fn new(key: impl Into<String>, data_dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            key: key.into(),
            segments: Vec::new(),
            current_offset: 0,
            data_dir: data_dir.into(),
            max_bytes,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Next offset to be assigned in this partition.
    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }

    /// Segments in ascending base-offset order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub(crate) fn segments_mut(&mut self) -> &mut [Segment] {
        &mut self.segments
    }

    /// Installs segments reconstructed by the recovery scan.
    ///
    /// Sorts by base offset, marks only the last segment active, and derives
    /// `current_offset` from it.
    pub(crate) fn restore(&mut self, mut segments: Vec<Segment>) {
        segments.sort_by_key(|s| s.base_offset);
        for seg in &mut segments {
            seg.seal();
        }
        if let Some(last) = segments.last_mut() {
            last.active = true;
        }
        self.current_offset = segments.last().map(|s| s.next_offset).unwrap_or(0);
        self.segments = segments;
    }

    /// Returns the active segment, creating the initial segment on first use
    /// and replacing a sealed tail segment with a fresh one based at the
    /// sealed segment's `next_offset`.
    pub fn get_active_segment(&mut self) -> &mut Segment {
        let new_base = match self.segments.last() {
            None => Some(self.current_offset),
            Some(seg) if !seg.active => Some(seg.next_offset),
            Some(_) => None,
        };
        if let Some(base) = new_base {
            self.segments
                .push(Segment::new(&self.key, base, self.max_bytes, &self.data_dir));
        }
        self.segments
            .last_mut()
            .expect("partition has at least one segment")
    }

    /// Applies rollover policy and returns the segment the next record of
    /// `encoded_size` bytes belongs to.
    ///
    /// The first record into a fresh, empty segment never rolls over, even
    /// when it alone exceeds the cap; this guarantees single-record progress
    /// regardless of the configured threshold.
    pub fn segment_for_append(&mut self, encoded_size: u64) -> &mut Segment {
        let active = self.get_active_segment();
        let sealed = if active.size_bytes > 0 && active.should_rollover(encoded_size) {
            active.seal();
            Some(active.base_offset)
        } else {
            None
        };
        if let Some(base) = sealed {
            tracing::debug!(
                partition = %self.key,
                base_offset = base,
                "segment sealed, rolling over"
            );
        }
        self.get_active_segment()
    }

    /// Advances the active segment's counters and `current_offset` after the
    /// record was durably written.
    pub fn commit_append(&mut self, encoded_size: u64) {
        let active = self.get_active_segment();
        active.add_record(encoded_size);
        let next = active.next_offset;
        self.current_offset = next;
    }

    /// Full in-memory append: selects the segment, assigns the offset, and
    /// advances counters. The engine performs these steps separately so that
    /// counters only advance once both files are durable.
    pub fn append_record(&mut self, record: &mut logvault_core::Record, encoded_size: u64) {
        let segment = self.segment_for_append(encoded_size);
        record.offset = segment.next_offset;
        self.commit_append(encoded_size);
    }

    /// Locates the unique segment whose range contains `offset`.
    pub fn find_segment(&self, offset: u64) -> Option<&Segment> {
        self.segments.iter().find(|s| s.contains(offset))
    }

    /// Re-derives `current_offset` from the last segment after the repair
    /// worker reconciled files and counters.
    pub(crate) fn sync_current_offset(&mut self) {
        if let Some(last) = self.segments.last() {
            self.current_offset = last.next_offset;
        }
    }

    /// Directory holding this partition's segment files.
    pub fn dir(&self) -> PathBuf {
        self.data_dir.join(&self.key)
    }
}

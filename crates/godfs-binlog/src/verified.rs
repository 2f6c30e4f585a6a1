//! Pure binlog computations.
//!
//! Deterministic helpers used by [`Binlog`](crate::Binlog): segment naming,
//! continuity checks, rotation and read planning. No I/O happens here.

use godfs_constants::BINLOG_RECORD_SIZE;
use godfs_constants::binlog::SEGMENT_FILE_PREFIX;
use godfs_constants::binlog::SEGMENT_INDEX_WIDTH;

const RECORD_SIZE: u64 = BINLOG_RECORD_SIZE as u64;

/// File name of segment `index`: `bin.000`, `bin.001`, ...
pub fn segment_file_name(index: u32) -> String {
    format!("{SEGMENT_FILE_PREFIX}{index:0width$}", width = SEGMENT_INDEX_WIDTH)
}

/// Parse a segment index out of a file name, if it is one.
pub fn parse_segment_file_name(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(SEGMENT_FILE_PREFIX)?;
    if digits.len() < SEGMENT_INDEX_WIDTH || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// First index missing from a sorted list of segment indices.
///
/// Segments must run contiguously from 0 to the highest index present.
pub fn first_missing_segment(sorted_indices: &[u32]) -> Option<u32> {
    sorted_indices
        .iter()
        .enumerate()
        .find(|(expected, actual)| **actual != *expected as u32)
        .map(|(expected, _)| expected as u32)
}

/// Whether the current segment must be closed before the next append.
#[inline]
pub fn needs_rotation(records_in_segment: u32, max_records: u32) -> bool {
    records_in_segment >= max_records
}

/// Length of the longest prefix made of whole records.
#[inline]
pub fn whole_records_len(len: u64) -> u64 {
    len - len % RECORD_SIZE
}

/// What a read at some offset of a segment yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPlan {
    /// Read `count` records starting at the offset.
    Records {
        /// Number of records to read.
        count: u32,
    },
    /// The segment is closed and fully consumed; move to the next index.
    Exhausted,
    /// The segment is still being written and has nothing new.
    NoData,
}

/// Plan a read of up to `max_count` records at `offset`.
///
/// `readable_len` must already be rounded down to whole records.
pub fn plan_read(offset: u64, readable_len: u64, is_current: bool, max_count: u32) -> ReadPlan {
    if offset >= readable_len {
        return if is_current { ReadPlan::NoData } else { ReadPlan::Exhausted };
    }
    if max_count == 0 {
        return ReadPlan::NoData;
    }
    let available = (readable_len - offset) / RECORD_SIZE;
    let count = available.min(u64::from(max_count)) as u32;
    ReadPlan::Records { count }
}

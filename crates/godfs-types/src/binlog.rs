//! Binlog records, cursors and the sync exchange.

use godfs_constants::BINLOG_RECORD_SIZE;
use godfs_constants::binlog::RECORD_FILE_ID_WIDTH;
use godfs_constants::binlog::RECORD_SOURCE_WIDTH;
use serde::Deserialize;
use serde::Serialize;

use crate::error::TypeError;
use crate::ids::FileId;
use crate::ids::InstanceId;

/// Segment index sentinel meaning "the segment currently being written".
pub const CURRENT_SEGMENT: u32 = u32::MAX;

const SOURCE_OFFSET: usize = RECORD_FILE_ID_WIDTH;
const LENGTH_OFFSET: usize = SOURCE_OFFSET + RECORD_SOURCE_WIDTH;
const TIMESTAMP_OFFSET: usize = LENGTH_OFFSET + 8;
const FLAG_OFFSET: usize = TIMESTAMP_OFFSET + 8;

/// An immutable "file arrived" fact.
///
/// Encoded as a fixed 64-byte record:
/// `file_id[38] | source[8] | file_length[8] | timestamp[8] | complete[1] | pad[1]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinlogRecord {
    /// The file that arrived.
    pub file_id: FileId,
    /// Instance the file was originally uploaded to.
    pub source: InstanceId,
    /// Content length in bytes.
    pub file_length: u64,
    /// When the file finished storing, Unix milliseconds.
    pub timestamp_ms: u64,
    /// Whether the file was completely stored.
    pub complete: bool,
}

impl BinlogRecord {
    /// Create a completed record.
    pub fn new(file_id: FileId, source: InstanceId, file_length: u64, timestamp_ms: u64) -> Self {
        Self {
            file_id,
            source,
            file_length,
            timestamp_ms,
            complete: true,
        }
    }

    /// Encode into the fixed on-disk layout.
    pub fn encode(&self) -> [u8; BINLOG_RECORD_SIZE] {
        let mut buf = [0u8; BINLOG_RECORD_SIZE];
        buf[..SOURCE_OFFSET].copy_from_slice(self.file_id.as_bytes());
        buf[SOURCE_OFFSET..LENGTH_OFFSET].copy_from_slice(self.source.as_bytes());
        buf[LENGTH_OFFSET..TIMESTAMP_OFFSET].copy_from_slice(&self.file_length.to_be_bytes());
        buf[TIMESTAMP_OFFSET..FLAG_OFFSET].copy_from_slice(&self.timestamp_ms.to_be_bytes());
        buf[FLAG_OFFSET] = u8::from(self.complete);
        buf
    }

    /// Decode one record from exactly [`BINLOG_RECORD_SIZE`] bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, TypeError> {
        let corrupt = |reason: &str| TypeError::CorruptRecord {
            reason: reason.to_string(),
        };

        if buf.len() != BINLOG_RECORD_SIZE {
            return Err(corrupt("wrong record size"));
        }

        let file_id = std::str::from_utf8(&buf[..SOURCE_OFFSET])
            .map_err(|_| corrupt("file id is not utf-8"))
            .and_then(|s| FileId::parse(s).map_err(|_| corrupt("malformed file id")))?;
        let source = InstanceId::from_bytes(&buf[SOURCE_OFFSET..LENGTH_OFFSET])
            .ok_or_else(|| corrupt("malformed source instance"))?;

        let mut word = [0u8; 8];
        word.copy_from_slice(&buf[LENGTH_OFFSET..TIMESTAMP_OFFSET]);
        let file_length = u64::from_be_bytes(word);
        word.copy_from_slice(&buf[TIMESTAMP_OFFSET..FLAG_OFFSET]);
        let timestamp_ms = u64::from_be_bytes(word);

        let complete = match buf[FLAG_OFFSET] {
            0 => false,
            1 => true,
            _ => return Err(corrupt("invalid completion flag")),
        };
        if buf[FLAG_OFFSET + 1..].iter().any(|b| *b != 0) {
            return Err(corrupt("non-zero padding"));
        }

        Ok(Self {
            file_id,
            source,
            file_length,
            timestamp_ms,
            complete,
        })
    }
}

/// Replication position in a peer's binlog.
///
/// Ordered by segment index first, then byte offset, so a cursor that compares
/// greater is strictly further along the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cursor {
    /// Segment index.
    pub file_index: u32,
    /// Byte offset into the segment, a multiple of the record size.
    pub offset: u64,
}

impl Cursor {
    /// Create a cursor.
    pub fn new(file_index: u32, offset: u64) -> Self {
        Self { file_index, offset }
    }

    /// Cursor at the start of the following segment.
    pub fn next_segment(&self) -> Self {
        Self {
            file_index: self.file_index.saturating_add(1),
            offset: 0,
        }
    }

    /// Whether the offset falls on a record boundary.
    pub fn is_aligned(&self) -> bool {
        self.offset % BINLOG_RECORD_SIZE as u64 == 0
    }
}

/// Request for binlog records after a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinlogQuery {
    /// Segment to read, or [`CURRENT_SEGMENT`].
    pub file_index: u32,
    /// Byte offset into that segment.
    pub offset: u64,
    /// Maximum records to return.
    pub max_count: u32,
}

impl BinlogQuery {
    /// Query starting at `cursor`.
    pub fn from_cursor(cursor: Cursor, max_count: u32) -> Self {
        Self {
            file_index: cursor.file_index,
            offset: cursor.offset,
            max_count,
        }
    }
}

/// Result of a binlog read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinlogBatch {
    /// Records in append order.
    pub records: Vec<BinlogRecord>,
    /// Position after the last returned record.
    pub next: Cursor,
    /// Index of the segment the peer is currently writing.
    pub current_index: u32,
    /// The requested segment is complete and fully read; `next` points at the
    /// start of the following segment.
    pub segment_exhausted: bool,
}

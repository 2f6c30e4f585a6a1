//! Binlog error types.

use std::path::PathBuf;

use snafu::Snafu;

/// Errors from binlog operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BinlogError {
    /// Filesystem operation failed.
    #[snafu(display("binlog i/o on '{}': {source}", path.display()))]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A segment is missing while a later one exists.
    #[snafu(display("binlog segment {index} is missing; the log has a gap"))]
    SegmentMissing {
        /// Index of the missing segment.
        index: u32,
    },

    /// A stored record could not be decoded.
    #[snafu(display("corrupt binlog record in segment {index} at offset {offset}: {reason}"))]
    CorruptRecord {
        /// Segment index.
        index: u32,
        /// Byte offset of the record.
        offset: u64,
        /// Decoder message.
        reason: String,
    },

    /// A read offset does not fall on a record boundary.
    #[snafu(display("binlog offset {offset} is not a multiple of the record size"))]
    MisalignedOffset {
        /// The requested offset.
        offset: u64,
    },
}

impl BinlogError {
    /// Whether this error means the log itself is damaged.
    ///
    /// Integrity faults halt the affected code path; they are never retried or
    /// skipped.
    pub fn is_integrity_fault(&self) -> bool {
        matches!(
            self,
            Self::SegmentMissing { .. } | Self::CorruptRecord { .. } | Self::MisalignedOffset { .. }
        )
    }
}

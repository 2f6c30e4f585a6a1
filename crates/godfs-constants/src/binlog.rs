//! Binlog record layout and segment limits.

/// Width of the file identifier field.
pub const RECORD_FILE_ID_WIDTH: usize = 38;

/// Width of the source instance field.
pub const RECORD_SOURCE_WIDTH: usize = 8;

/// Width of the file length field (u64, big endian).
pub const RECORD_FILE_LENGTH_WIDTH: usize = 8;

/// Width of the timestamp field (u64 Unix milliseconds, big endian).
pub const RECORD_TIMESTAMP_WIDTH: usize = 8;

/// Width of the completion flag.
pub const RECORD_FLAG_WIDTH: usize = 1;

/// Size of one encoded binlog record, including trailing padding.
pub const BINLOG_RECORD_SIZE: usize = 64;

/// Maximum number of records held by one segment file.
pub const MAX_BINLOG_RECORDS_PER_SEGMENT: u32 = 2_000_000;

/// Largest record count representable in one `binlog.map` slot (24 bits).
pub const MAX_MAP_SLOT_VALUE: u32 = (1 << 24) - 1;

/// Width of one `binlog.map` slot in bytes.
pub const BINLOG_MAP_SLOT_WIDTH: u64 = 3;

/// Directory holding segment files, relative to the data directory.
pub const BINLOG_DIR_NAME: &str = "binlog";

/// Prefix of a segment file name (`bin.000`, `bin.001`, ...).
pub const SEGMENT_FILE_PREFIX: &str = "bin.";

/// Minimum zero-padded width of the segment index in file names.
pub const SEGMENT_INDEX_WIDTH: usize = 3;

/// Name of the per-segment record count side file.
pub const BINLOG_MAP_FILE_NAME: &str = "binlog.map";

/// Upper bound on records returned by a single read.
pub const MAX_BINLOG_READ_BATCH: u32 = 1_000;

//! Content store and dataset constants.

/// Length of a file id: `cc/dd/<32 hex md5>`.
pub const FILE_ID_LEN: usize = 38;

/// Length of an instance id.
pub const INSTANCE_ID_LEN: usize = 8;

/// Number of trailing CRC32 hex digits used for shard directories.
pub const SHARD_HEX_DIGITS: usize = 4;

/// Width of the reference count stored at the end of every entry.
pub const REF_COUNT_TAIL_SIZE: u64 = 8;

/// Directory holding content entries, relative to the data directory.
pub const OBJECTS_DIR_NAME: &str = "objects";

/// Directory for partially written uploads and downloads.
pub const TMP_DIR_NAME: &str = "tmp";

/// Largest file the store accepts (1 GB).
pub const MAX_FILE_SIZE: u64 = 1_073_741_824;

/// Directory holding the dataset index files.
pub const DATASET_DIR_NAME: &str = "dataset";

/// Fixed-slot hash index file name.
pub const DATASET_INDEX_FILE_NAME: &str = "dataset.idx";

/// Append-only overflow log file name.
pub const DATASET_OVERFLOW_FILE_NAME: &str = "dataset.log";

/// Default slot count of the dataset hash index.
pub const DEFAULT_DATASET_SLOTS: u32 = 65_536;

/// Upper bound on the dataset slot count (~160 MB index).
pub const MAX_DATASET_SLOTS: u32 = 1 << 22;

/// Slots probed linearly before an id spills into the overflow log.
pub const DATASET_MAX_PROBES: u32 = 8;

//! Store error types.

use std::path::PathBuf;

use godfs_types::FileId;
use snafu::Snafu;

/// Errors from the content store and the dataset.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// Filesystem operation failed.
    #[snafu(display("store i/o on '{}': {source}", path.display()))]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// No entry exists for the file id.
    #[snafu(display("file not found: {file_id}"))]
    NotFound {
        /// The missing file.
        file_id: FileId,
    },

    /// Content exceeds the largest accepted file.
    #[snafu(display("file of {len} bytes exceeds the {max} byte limit"))]
    TooLarge {
        /// Offered length.
        len: u64,
        /// The limit.
        max: u64,
    },

    /// Content does not hash to the id it was offered under.
    #[snafu(display("content for {expected} hashes to {actual}"))]
    ContentMismatch {
        /// The id the caller expected.
        expected: FileId,
        /// The id the bytes actually address.
        actual: FileId,
    },

    /// A stored entry is damaged.
    #[snafu(display("corrupt entry {file_id}: {reason}"))]
    CorruptEntry {
        /// The damaged entry.
        file_id: FileId,
        /// What is wrong with it.
        reason: String,
    },

    /// The dataset files are damaged.
    #[snafu(display("corrupt dataset: {reason}"))]
    DatasetCorrupt {
        /// What is wrong.
        reason: String,
    },
}

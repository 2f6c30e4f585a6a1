//! Synchronizer error types.

use godfs_binlog::BinlogError;
use godfs_store::StoreError;
use godfs_types::FileId;
use godfs_types::InstanceId;
use snafu::Snafu;

use crate::cursor_store::CursorStoreError;

/// Errors from replication.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SyncError {
    /// Reading or writing a cursor failed.
    #[snafu(display("cursor store: {source}"))]
    Cursor {
        /// The cursor store error.
        source: CursorStoreError,
    },

    /// The local binlog failed.
    #[snafu(display("local binlog: {source}"))]
    Binlog {
        /// The binlog error.
        source: BinlogError,
    },

    /// The local content store or dataset failed.
    #[snafu(display("local store: {source}"))]
    Store {
        /// The store error.
        source: StoreError,
    },

    /// A peer could not be reached or reported a failure.
    #[snafu(display("peer {peer}: {message}"))]
    Peer {
        /// The peer.
        peer: InstanceId,
        /// What went wrong.
        message: String,
    },

    /// A peer reported that its own binlog is damaged.
    #[snafu(display("peer {peer} integrity fault: {message}"))]
    PeerIntegrity {
        /// The peer.
        peer: InstanceId,
        /// What the peer reported.
        message: String,
    },

    /// The membership view could not be refreshed.
    #[snafu(display("membership unavailable: {message}"))]
    Membership {
        /// What went wrong.
        message: String,
    },

    /// No candidate could supply a file's content.
    #[snafu(display("no peer could supply {file_id} ({attempts} tried)"))]
    ContentUnavailable {
        /// The file.
        file_id: FileId,
        /// Candidates tried.
        attempts: usize,
    },

    /// A peer answered a binlog read with a cursor that cannot follow ours.
    #[snafu(display("peer {peer} answered {records} records with an inconsistent cursor: {reason}"))]
    InconsistentBatch {
        /// The peer.
        peer: InstanceId,
        /// Records in the batch.
        records: usize,
        /// Why the batch was rejected.
        reason: String,
    },

    /// A blocking task was cancelled or panicked.
    #[snafu(display("local task failed: {source}"))]
    Task {
        /// The join error.
        source: tokio::task::JoinError,
    },
}

impl SyncError {
    /// Whether this error means replication against the peer must halt.
    ///
    /// Covers broken local binlogs, damaged store entries, cursor regressions,
    /// peers reporting a broken binlog and peers whose batches do not line up
    /// with our cursor.
    pub fn is_integrity_fault(&self) -> bool {
        match self {
            Self::Binlog { source } => source.is_integrity_fault(),
            Self::Store { source } => {
                matches!(source, StoreError::CorruptEntry { .. } | StoreError::DatasetCorrupt { .. })
            }
            Self::Cursor { source } => matches!(source, CursorStoreError::Regression { .. }),
            Self::PeerIntegrity { .. } | Self::InconsistentBatch { .. } => true,
            _ => false,
        }
    }
}

impl From<CursorStoreError> for SyncError {
    fn from(source: CursorStoreError) -> Self {
        Self::Cursor { source }
    }
}

impl From<BinlogError> for SyncError {
    fn from(source: BinlogError) -> Self {
        Self::Binlog { source }
    }
}

impl From<StoreError> for SyncError {
    fn from(source: StoreError) -> Self {
        Self::Store { source }
    }
}

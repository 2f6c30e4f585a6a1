//! Seams to the network and the membership view.

use async_trait::async_trait;
use godfs_types::BinlogBatch;
use godfs_types::BinlogQuery;
use godfs_types::FileId;
use godfs_types::Instance;

use crate::error::SyncError;

/// Reaches peer storage nodes.
#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    /// Read a batch of `peer`'s binlog.
    async fn read_binlog(&self, peer: &Instance, query: BinlogQuery) -> Result<BinlogBatch, SyncError>;

    /// Fetch file content from `server`. `Ok(None)` if it does not hold it.
    async fn fetch_file(&self, server: &Instance, file_id: &FileId) -> Result<Option<Vec<u8>>, SyncError>;
}

/// Live storage members of this node's group, as last learned from a tracker.
#[async_trait]
pub trait MembershipView: Send + Sync + 'static {
    /// Current members; may include this node.
    async fn group_members(&self) -> Result<Vec<Instance>, SyncError>;
}

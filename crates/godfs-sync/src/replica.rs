//! The local side of replication.

use std::sync::Arc;

use godfs_binlog::Binlog;
use godfs_store::ContentStore;
use godfs_store::Dataset;
use godfs_types::BinlogRecord;
use godfs_types::Cursor;
use godfs_types::FileId;
use godfs_types::InstanceId;
use godfs_types::now_unix_ms;
use tracing::debug;

use crate::error::SyncError;

/// Result of [`LocalReplica::ingest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Address of the content.
    pub file_id: FileId,
    /// True if the content store already held it.
    pub deduplicated: bool,
    /// Reference count after ingest.
    pub ref_count: u64,
    /// Where the local binlog record landed.
    pub position: Cursor,
}

/// This node's binlog, content store and dataset, shared by the upload path
/// and the synchronizer.
#[derive(Clone)]
pub struct LocalReplica {
    /// This node's id.
    pub instance_id: InstanceId,
    /// Local binlog.
    pub binlog: Arc<Binlog>,
    /// Local content store.
    pub store: Arc<ContentStore>,
    /// Local dataset.
    pub dataset: Arc<Dataset>,
}

impl LocalReplica {
    /// Make `data` locally held: store it, record a binlog event attributed to
    /// `source`, and add its id to the dataset.
    ///
    /// With `expected`, content that does not address to it is rejected before
    /// anything is written. Blocking; call from a blocking context.
    pub fn ingest(
        &self,
        data: &[u8],
        source: InstanceId,
        expected: Option<&FileId>,
    ) -> Result<IngestOutcome, SyncError> {
        let put = match expected {
            Some(file_id) => self.store.put_verified(file_id, data)?,
            None => self.store.put_bytes(data)?,
        };
        let record = BinlogRecord::new(put.file_id.clone(), source, data.len() as u64, now_unix_ms());
        let position = self.binlog.write(&record)?;
        let added = self.dataset.add(&put.file_id)?;
        debug!(
            file_id = %put.file_id,
            %source,
            deduplicated = put.deduplicated,
            new_in_dataset = added,
            "file ingested"
        );
        Ok(IngestOutcome {
            file_id: put.file_id,
            deduplicated: put.deduplicated,
            ref_count: put.ref_count,
            position,
        })
    }
}

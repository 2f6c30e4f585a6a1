//! Upload and download through selected storage servers.

use std::sync::Arc;

use godfs_rpc::RpcConnection;
use godfs_types::FileId;
use godfs_types::Role;
use godfs_types::ServerAddr;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::connector::Connector;
use crate::error::ClientError;
use crate::pool::ConnectionPool;
use crate::selector::Operation;
use crate::selector::StorageSelector;
use crate::tracker_client::TrackerClient;
use crate::tracker_client::finish;

/// File store client.
///
/// Storage servers come from tracker discovery when
/// [`refresh_storage`](Self::refresh_storage) has run, otherwise from the
/// static list.
pub struct GodfsClient<C: Connector<Conn = RpcConnection>> {
    group: Option<String>,
    selector: StorageSelector,
    pool: Arc<ConnectionPool<C>>,
    trackers: TrackerClient<C>,
}

impl<C: Connector<Conn = RpcConnection>> std::fmt::Debug for GodfsClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GodfsClient")
            .field("group", &self.group)
            .field("trackers", &self.trackers)
            .finish_non_exhaustive()
    }
}

impl<C: Connector<Conn = RpcConnection>> GodfsClient<C> {
    /// Create a client.
    ///
    /// `group` restricts uploads to one replication group.
    pub fn new(
        pool: Arc<ConnectionPool<C>>,
        trackers: Vec<ServerAddr>,
        static_storage: Vec<ServerAddr>,
        group: Option<String>,
    ) -> Self {
        Self {
            group,
            selector: StorageSelector::new(static_storage),
            trackers: TrackerClient::new(trackers, pool.clone()),
            pool,
        }
    }

    /// Re-discover storage servers through the trackers.
    ///
    /// Returns the number of storage instances now known.
    pub async fn refresh_storage(&self) -> Result<usize, ClientError> {
        let instances = self.trackers.query(Role::Storage, None, false).await?;
        let count = instances.len();
        self.selector.set_discovered(instances);
        info!(count, "storage servers discovered");
        Ok(count)
    }

    /// Store `data`. Returns its address and whether it was already stored.
    pub async fn upload(&self, data: Vec<u8>) -> Result<(FileId, bool), ClientError> {
        let mut excluded = Vec::new();
        loop {
            let mut conn =
                self.selector.select_and_connect(&self.pool, self.group.as_deref(), Operation::Upload, &mut excluded).await?;
            let server = conn.server().clone();
            let result = conn.upload(data.clone()).await;
            match finish(conn, &server, result) {
                Ok(stored) => {
                    debug!(server = %server, file_id = %stored.0, deduplicated = stored.1, "uploaded");
                    return Ok(stored);
                }
                // Uploads are idempotent, so another server may take it.
                Err(err) if err.is_transient() => {
                    warn!(server = %server, error = %err, "upload failed, excluding server");
                    excluded.push(server);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Fetch the content of `file_id` from any storage server holding it.
    pub async fn download(&self, file_id: &FileId) -> Result<Vec<u8>, ClientError> {
        let mut excluded = Vec::new();
        let mut missing = false;
        loop {
            let selected =
                self.selector.select_and_connect(&self.pool, None, Operation::Download, &mut excluded).await;
            let mut conn = match selected {
                Ok(conn) => conn,
                Err(_) if missing => {
                    return Err(ClientError::NotFound {
                        file_id: file_id.clone(),
                    });
                }
                Err(err) => return Err(err),
            };
            let server = conn.server().clone();
            let result = conn.fetch_file(file_id).await;
            match finish(conn, &server, result) {
                Ok(Some(data)) => return Ok(data),
                Ok(None) => {
                    debug!(server = %server, file_id = %file_id, "file not held, trying next server");
                    missing = true;
                    excluded.push(server);
                }
                Err(err) if err.is_transient() => {
                    warn!(server = %server, error = %err, "download failed, excluding server");
                    excluded.push(server);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// The tracker client.
    pub fn trackers(&self) -> &TrackerClient<C> {
        &self.trackers
    }

    /// The storage selector.
    pub fn selector(&self) -> &StorageSelector {
        &self.selector
    }
}

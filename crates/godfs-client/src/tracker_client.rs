//! Talking to trackers.

use std::sync::Arc;

use godfs_rpc::HeartbeatRequest;
use godfs_rpc::HeartbeatResponse;
use godfs_rpc::RpcConnection;
use godfs_types::Instance;
use godfs_types::Role;
use godfs_types::ServerAddr;
use tracing::debug;
use tracing::warn;

use crate::connector::Connector;
use crate::error::ClientError;
use crate::pool::ConnectionPool;
use crate::pool::PooledConnection;

/// Heartbeats and membership queries against a fixed tracker list.
pub struct TrackerClient<C: Connector<Conn = RpcConnection>> {
    trackers: Vec<ServerAddr>,
    pool: Arc<ConnectionPool<C>>,
}

impl<C: Connector<Conn = RpcConnection>> std::fmt::Debug for TrackerClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerClient").field("trackers", &self.trackers).finish_non_exhaustive()
    }
}

impl<C: Connector<Conn = RpcConnection>> TrackerClient<C> {
    /// Client for `trackers`, sharing `pool`.
    pub fn new(trackers: Vec<ServerAddr>, pool: Arc<ConnectionPool<C>>) -> Self {
        Self { trackers, pool }
    }

    /// Configured trackers.
    pub fn trackers(&self) -> &[ServerAddr] {
        &self.trackers
    }

    /// Send one heartbeat to every tracker.
    ///
    /// Returns the answers that arrived. Fails with
    /// [`ClientError::NoTrackerAvailable`] only when no tracker answered.
    pub async fn heartbeat_all(
        &self,
        request: &HeartbeatRequest,
    ) -> Result<Vec<(ServerAddr, HeartbeatResponse)>, ClientError> {
        let mut answers = Vec::with_capacity(self.trackers.len());
        for tracker in &self.trackers {
            match self.heartbeat(tracker, request.clone()).await {
                Ok(response) => answers.push((tracker.clone(), response)),
                Err(err) => warn!(tracker = %tracker, error = %err, "heartbeat failed"),
            }
        }
        if answers.is_empty() {
            return Err(ClientError::NoTrackerAvailable);
        }
        Ok(answers)
    }

    /// Send one heartbeat to `tracker`.
    pub async fn heartbeat(
        &self,
        tracker: &ServerAddr,
        request: HeartbeatRequest,
    ) -> Result<HeartbeatResponse, ClientError> {
        let mut conn = self.pool.acquire(tracker).await?;
        let result = conn.heartbeat(request).await;
        finish(conn, tracker, result)
    }

    /// Ask trackers in order for registered instances; the first answer wins.
    pub async fn query(
        &self,
        role: Role,
        group: Option<&str>,
        uploadable_only: bool,
    ) -> Result<Vec<Instance>, ClientError> {
        for tracker in &self.trackers {
            let attempt = async {
                let mut conn = self.pool.acquire(tracker).await?;
                let result = conn.query_instances(role, group.map(str::to_string), uploadable_only).await;
                finish(conn, tracker, result)
            };
            match attempt.await {
                Ok(instances) => {
                    debug!(tracker = %tracker, %role, count = instances.len(), "instances queried");
                    return Ok(instances);
                }
                Err(err) => warn!(tracker = %tracker, error = %err, "tracker query failed, trying next"),
            }
        }
        Err(ClientError::NoTrackerAvailable)
    }
}

/// Return the connection to the pool according to how the request went.
pub(crate) fn finish<T>(
    conn: PooledConnection<RpcConnection>,
    server: &ServerAddr,
    result: Result<T, godfs_rpc::RpcError>,
) -> Result<T, ClientError> {
    match result {
        Ok(value) => {
            conn.release();
            Ok(value)
        }
        Err(err) => {
            if err.breaks_connection() {
                conn.discard();
            } else {
                conn.release();
            }
            Err(ClientError::from_rpc(server, err))
        }
    }
}

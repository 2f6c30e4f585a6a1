//! Bridges from the synchronizer's seams to the network.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use godfs_client::ConnectionPool;
use godfs_client::PooledConnection;
use godfs_client::RpcConnector;
use godfs_constants::tracker::MEMBERSHIP_REPORT_MAX_AGE_ROUNDS;
use godfs_rpc::RpcConnection;
use godfs_rpc::RpcError;
use godfs_sync::MembershipView;
use godfs_sync::PeerTransport;
use godfs_sync::SyncError;
use godfs_types::BinlogBatch;
use godfs_types::BinlogQuery;
use godfs_types::FileId;
use godfs_types::Instance;
use godfs_types::InstanceId;
use godfs_types::ServerAddr;
use parking_lot::Mutex;
use parking_lot::RwLock;

/// [`PeerTransport`] over pooled RPC connections.
#[derive(Debug)]
pub struct PooledPeerTransport {
    pool: Arc<ConnectionPool<RpcConnector>>,
}

impl PooledPeerTransport {
    /// Transport sharing `pool`.
    pub fn new(pool: Arc<ConnectionPool<RpcConnector>>) -> Self {
        Self { pool }
    }

    async fn connect(&self, peer: &Instance) -> Result<PooledConnection<RpcConnection>, SyncError> {
        self.pool.acquire(&peer.server).await.map_err(|e| SyncError::Peer {
            peer: peer.id,
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl PeerTransport for PooledPeerTransport {
    async fn read_binlog(&self, peer: &Instance, query: BinlogQuery) -> Result<BinlogBatch, SyncError> {
        let mut conn = self.connect(peer).await?;
        let result = conn.sync_binlog(query).await;
        settle(conn, peer, result)
    }

    async fn fetch_file(&self, server: &Instance, file_id: &FileId) -> Result<Option<Vec<u8>>, SyncError> {
        let mut conn = self.connect(server).await?;
        let result = conn.fetch_file(file_id).await;
        settle(conn, server, result)
    }
}

fn settle<T>(
    conn: PooledConnection<RpcConnection>,
    peer: &Instance,
    result: Result<T, RpcError>,
) -> Result<T, SyncError> {
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
            Err(peer_error(peer, err))
        }
    }
}

fn peer_error(peer: &Instance, err: RpcError) -> SyncError {
    match err {
        RpcError::RemoteIntegrity { message } => SyncError::PeerIntegrity { peer: peer.id, message },
        other => SyncError::Peer {
            peer: peer.id,
            message: other.to_string(),
        },
    }
}

/// [`MembershipView`] fed by heartbeat responses.
///
/// Keeps the last group peer list each tracker reported and serves their
/// union. A tracker that misses a round keeps its report for up to
/// [`MEMBERSHIP_REPORT_MAX_AGE_ROUNDS`] rounds, so one slow tracker does not
/// make its peers flap out of the view.
#[derive(Debug, Default)]
pub struct TrackerMembership {
    reports: Mutex<TrackerReports>,
    members: RwLock<Option<Vec<Instance>>>,
}

#[derive(Debug, Default)]
struct TrackerReports {
    round: u64,
    by_tracker: BTreeMap<ServerAddr, (u64, Vec<Instance>)>,
}

impl TrackerMembership {
    /// An empty view; queries fail until the first update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one heartbeat round: the peers reported by each tracker that
    /// answered. Reports older than the age limit are dropped.
    pub fn update<I>(&self, answers: I)
    where I: IntoIterator<Item = (ServerAddr, Vec<Instance>)> {
        let mut reports = self.reports.lock();
        reports.round += 1;
        let round = reports.round;
        for (tracker, peers) in answers {
            reports.by_tracker.insert(tracker, (round, peers));
        }
        reports.by_tracker.retain(|_, (seen, _)| round - *seen <= MEMBERSHIP_REPORT_MAX_AGE_ROUNDS);

        // Oldest first, so the freshest report of a peer wins.
        let mut ordered: Vec<_> = reports.by_tracker.values().collect();
        ordered.sort_by_key(|(seen, _)| *seen);
        let mut merged: BTreeMap<InstanceId, Instance> = BTreeMap::new();
        for (_, peers) in ordered {
            for peer in peers {
                merged.insert(peer.id, peer.clone());
            }
        }
        *self.members.write() = Some(merged.into_values().collect());
    }

    /// Current members, empty before the first update.
    pub fn snapshot(&self) -> Vec<Instance> {
        self.members.read().clone().unwrap_or_default()
    }
}

#[async_trait]
impl MembershipView for TrackerMembership {
    async fn group_members(&self) -> Result<Vec<Instance>, SyncError> {
        match self.members.read().as_ref() {
            Some(members) => Ok(members.clone()),
            None => Err(SyncError::Membership {
                message: "no tracker has answered a heartbeat yet".to_string(),
            }),
        }
    }
}

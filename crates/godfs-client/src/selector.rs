//! Storage server selection.

use std::collections::HashMap;

use godfs_types::Instance;
use godfs_types::Role;
use godfs_types::ServerAddr;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tracing::debug;
use tracing::warn;

use crate::connector::Connector;
use crate::error::ClientError;
use crate::pool::ConnectionPool;
use crate::pool::PooledConnection;
use crate::verified::least_used;

/// What the selected server will be asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Needs a writable storage server.
    Upload,
    /// Any storage server will do.
    Download,
}

/// Least-used storage selection over discovered and static servers.
///
/// Servers discovered through a tracker are preferred. The static list is
/// only consulted when discovery has produced no matching candidate.
#[derive(Debug, Default)]
pub struct StorageSelector {
    static_servers: Vec<ServerAddr>,
    discovered: RwLock<Vec<Instance>>,
    usage: Mutex<HashMap<ServerAddr, u64>>,
}

impl StorageSelector {
    /// Selector with a static fallback list.
    pub fn new(static_servers: Vec<ServerAddr>) -> Self {
        Self {
            static_servers,
            discovered: RwLock::new(Vec::new()),
            usage: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the discovered storage instances.
    pub fn set_discovered(&self, instances: Vec<Instance>) {
        *self.discovered.write() = instances;
    }

    /// Candidate servers for `op`, optionally restricted to `group`.
    pub fn candidates(&self, group: Option<&str>, op: Operation) -> Vec<ServerAddr> {
        let discovered: Vec<ServerAddr> = self
            .discovered
            .read()
            .iter()
            .filter(|inst| inst.role == Role::Storage)
            .filter(|inst| op == Operation::Download || inst.is_uploadable())
            .filter(|inst| group.is_none_or(|g| inst.group() == Some(g)))
            .map(|inst| inst.server.clone())
            .collect();
        if discovered.is_empty() {
            self.static_servers.clone()
        } else {
            discovered
        }
    }

    /// Pick the least-used candidate not in `excluded`, charging it one use.
    pub fn select(&self, candidates: &[ServerAddr], excluded: &[ServerAddr]) -> Option<ServerAddr> {
        let mut usage = self.usage.lock();
        let chosen = least_used(candidates, &usage, excluded)?.clone();
        *usage.entry(chosen.clone()).or_insert(0) += 1;
        Some(chosen)
    }

    /// Cumulative uses charged to `server`.
    pub fn usage(&self, server: &ServerAddr) -> u64 {
        self.usage.lock().get(server).copied().unwrap_or(0)
    }

    /// Select a server and take a pooled connection to it.
    ///
    /// A server that fails with a transient error is excluded and selection
    /// runs again, so no server is tried twice in one call. Returns the last
    /// transient error once candidates run out, or
    /// [`ClientError::NoStorageAvailable`] when there were none.
    pub async fn select_and_connect<C: Connector>(
        &self,
        pool: &ConnectionPool<C>,
        group: Option<&str>,
        op: Operation,
        excluded: &mut Vec<ServerAddr>,
    ) -> Result<PooledConnection<C::Conn>, ClientError> {
        let candidates = self.candidates(group, op);
        let mut last_error = None;
        while let Some(server) = self.select(&candidates, excluded) {
            match pool.acquire(&server).await {
                Ok(conn) => {
                    debug!(server = %server, ?op, "storage server selected");
                    return Ok(conn);
                }
                Err(err) if err.is_transient() => {
                    warn!(server = %server, error = %err, "storage server unavailable, excluding");
                    excluded.push(server);
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error.unwrap_or(ClientError::NoStorageAvailable))
    }
}

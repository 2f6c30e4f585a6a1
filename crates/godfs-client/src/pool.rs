//! Bounded per-server connection pools.
//!
//! Each server gets a semaphore sized to the per-server cap and a stack of
//! idle connections. Acquiring takes a permit first, then reuses an idle
//! connection or opens a new one, so open sockets per server never exceed
//! the cap. The [`PooledConnection`] guard gives the permit back on drop.

use std::collections::HashMap;
use std::ops::Deref;
use std::ops::DerefMut;
use std::sync::Arc;
use std::time::Duration;

use godfs_constants::network::DEFAULT_MAX_CONNECTIONS_PER_SERVER;
use godfs_constants::network::DEFAULT_POOL_ACQUIRE_TIMEOUT_MS;
use godfs_constants::network::MAX_CONNECTIONS_PER_SERVER;
use godfs_types::ServerAddr;
use parking_lot::Mutex;
use tokio::sync::OwnedSemaphorePermit;
use tokio::sync::Semaphore;
use tracing::debug;
use tracing::warn;

use crate::connector::Connector;
use crate::error::ClientError;

/// What [`ConnectionPool::acquire`] does when a server's pool is at its cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustionPolicy {
    /// Wait for a connection to be returned, up to `timeout`.
    Block {
        /// Longest wait before [`ClientError::PoolExhausted`].
        timeout: Duration,
    },
    /// Return [`ClientError::PoolExhausted`] immediately.
    FailFast,
}

impl Default for ExhaustionPolicy {
    fn default() -> Self {
        Self::Block {
            timeout: Duration::from_millis(DEFAULT_POOL_ACQUIRE_TIMEOUT_MS),
        }
    }
}

/// Pool sizing and exhaustion behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Cap on open connections per server, clamped to
    /// `1..=MAX_CONNECTIONS_PER_SERVER`.
    pub max_connections_per_server: u32,
    /// Behavior at the cap.
    pub exhaustion: ExhaustionPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_server: DEFAULT_MAX_CONNECTIONS_PER_SERVER,
            exhaustion: ExhaustionPolicy::default(),
        }
    }
}

struct ServerPool<T> {
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<T>>,
}

/// Connection pools keyed by server.
pub struct ConnectionPool<C: Connector> {
    connector: C,
    max_per_server: u32,
    exhaustion: ExhaustionPolicy,
    servers: Mutex<HashMap<ServerAddr, Arc<ServerPool<C::Conn>>>>,
}

impl<C: Connector> std::fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max_per_server", &self.max_per_server)
            .field("exhaustion", &self.exhaustion)
            .field("servers", &self.servers.lock().len())
            .finish()
    }
}

impl<C: Connector> ConnectionPool<C> {
    /// Create an empty pool.
    pub fn new(connector: C, config: PoolConfig) -> Self {
        let max_per_server = config.max_connections_per_server.clamp(1, MAX_CONNECTIONS_PER_SERVER);
        Self {
            connector,
            max_per_server,
            exhaustion: config.exhaustion,
            servers: Mutex::new(HashMap::new()),
        }
    }

    /// Take a connection to `server`.
    ///
    /// Reuses an idle connection when one exists. Fails with
    /// [`ClientError::PoolExhausted`] when the cap is reached and the policy
    /// gives up, or with the connector's error when a new connection cannot
    /// be opened.
    pub async fn acquire(&self, server: &ServerAddr) -> Result<PooledConnection<C::Conn>, ClientError> {
        let pool = self.server_pool(server);
        let exhausted = || ClientError::PoolExhausted {
            server: server.clone(),
            max: self.max_per_server,
        };

        let permit = match self.exhaustion {
            ExhaustionPolicy::FailFast => pool.permits.clone().try_acquire_owned().map_err(|_| exhausted())?,
            ExhaustionPolicy::Block { timeout } => {
                match tokio::time::timeout(timeout, pool.permits.clone().acquire_owned()).await {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) | Err(_) => {
                        warn!(server = %server, max = self.max_per_server, "connection pool exhausted");
                        return Err(exhausted());
                    }
                }
            }
        };

        let idle = pool.idle.lock().pop();
        let conn = match idle {
            Some(conn) => conn,
            None => {
                let conn = self.connector.connect(server).await?;
                debug!(server = %server, "pooled connection opened");
                conn
            }
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool,
            server: server.clone(),
            _permit: permit,
        })
    }

    /// Connections currently handed out for `server`.
    pub fn in_use(&self, server: &ServerAddr) -> u32 {
        match self.servers.lock().get(server) {
            Some(pool) => self.max_per_server - pool.permits.available_permits() as u32,
            None => 0,
        }
    }

    /// Idle connections held for `server`.
    pub fn idle_count(&self, server: &ServerAddr) -> usize {
        match self.servers.lock().get(server) {
            Some(pool) => pool.idle.lock().len(),
            None => 0,
        }
    }

    /// Close every idle connection to `server`.
    pub fn clear(&self, server: &ServerAddr) {
        if let Some(pool) = self.servers.lock().get(server) {
            pool.idle.lock().clear();
        }
    }

    /// The per-server cap in effect.
    pub fn max_per_server(&self) -> u32 {
        self.max_per_server
    }

    fn server_pool(&self, server: &ServerAddr) -> Arc<ServerPool<C::Conn>> {
        let mut servers = self.servers.lock();
        servers
            .entry(server.clone())
            .or_insert_with(|| {
                Arc::new(ServerPool {
                    permits: Arc::new(Semaphore::new(self.max_per_server as usize)),
                    idle: Mutex::new(Vec::new()),
                })
            })
            .clone()
    }
}

/// Exclusive use of one pooled connection.
///
/// Call [`release`](Self::release) after a successful operation to return the
/// connection for reuse. [`discard`](Self::discard), or dropping the guard,
/// closes it. Either way the slot is freed.
pub struct PooledConnection<T: Send + 'static> {
    conn: Option<T>,
    pool: Arc<ServerPool<T>>,
    server: ServerAddr,
    _permit: OwnedSemaphorePermit,
}

impl<T: Send + 'static> PooledConnection<T> {
    /// Return a healthy connection to the idle set.
    pub fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.idle.lock().push(conn);
        }
    }

    /// Close a broken connection.
    pub fn discard(mut self) {
        if self.conn.take().is_some() {
            debug!(server = %self.server, "pooled connection discarded");
        }
    }

    /// The server this connection talks to.
    pub fn server(&self) -> &ServerAddr {
        &self.server
    }
}

impl<T: Send + 'static> Deref for PooledConnection<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only release/discard take the connection, and both consume the guard.
        match self.conn.as_ref() {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<T: Send + 'static> DerefMut for PooledConnection<T> {
    fn deref_mut(&mut self) -> &mut T {
        match self.conn.as_mut() {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for PooledConnection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").field("server", &self.server).finish_non_exhaustive()
    }
}

//! Opening connections.

use std::time::Duration;

use async_trait::async_trait;
use godfs_constants::network::CONNECT_TIMEOUT_MS;
use godfs_constants::network::REQUEST_TIMEOUT_MS;
use godfs_rpc::RpcConnection;
use godfs_types::ServerAddr;

use crate::error::ClientError;

/// Opens ready-to-use connections for a [`ConnectionPool`](crate::ConnectionPool).
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The connection type.
    type Conn: Send + 'static;

    /// Connect and authenticate.
    async fn connect(&self, server: &ServerAddr) -> Result<Self::Conn, ClientError>;
}

/// Connects over TCP and authenticates with the cluster secret.
#[derive(Debug, Clone)]
pub struct RpcConnector {
    secret: String,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl RpcConnector {
    /// Connector with default timeouts.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            connect_timeout: Duration::from_millis(CONNECT_TIMEOUT_MS),
            request_timeout: Duration::from_millis(REQUEST_TIMEOUT_MS),
        }
    }

    /// Override the timeouts.
    pub fn with_timeouts(mut self, connect_timeout: Duration, request_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.request_timeout = request_timeout;
        self
    }
}

#[async_trait]
impl Connector for RpcConnector {
    type Conn = RpcConnection;

    async fn connect(&self, server: &ServerAddr) -> Result<RpcConnection, ClientError> {
        let mut conn = RpcConnection::connect(server, self.connect_timeout, self.request_timeout)
            .await
            .map_err(|e| ClientError::from_rpc(server, e))?;
        conn.authenticate(&self.secret).await.map_err(|e| ClientError::from_rpc(server, e))?;
        Ok(conn)
    }
}

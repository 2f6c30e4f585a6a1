//! Client error types.

use godfs_rpc::RpcError;
use godfs_types::FileId;
use godfs_types::ServerAddr;
use snafu::Snafu;

/// Errors surfaced to client callers.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ClientError {
    /// A request to a server failed.
    #[snafu(display("request to {server} failed: {source}"))]
    Rpc {
        /// The server.
        server: ServerAddr,
        /// The RPC error.
        source: RpcError,
    },

    /// The server rejected the cluster secret.
    #[snafu(display("authentication failed at {server}"))]
    AuthenticationFailed {
        /// The server.
        server: ServerAddr,
    },

    /// Every connection to a server is in use.
    #[snafu(display("connection pool for {server} exhausted ({max} connections)"))]
    PoolExhausted {
        /// The server.
        server: ServerAddr,
        /// The per-server cap.
        max: u32,
    },

    /// No storage server is left to try.
    #[snafu(display("no storage server available"))]
    NoStorageAvailable,

    /// No tracker answered.
    #[snafu(display("no tracker server available"))]
    NoTrackerAvailable,

    /// No storage server holds the file.
    #[snafu(display("file not found: {file_id}"))]
    NotFound {
        /// The missing file.
        file_id: FileId,
    },
}

impl ClientError {
    /// Wrap an RPC error from `server`, lifting authentication failures.
    pub fn from_rpc(server: &ServerAddr, source: RpcError) -> Self {
        match source {
            RpcError::AuthenticationFailed => Self::AuthenticationFailed { server: server.clone() },
            source => Self::Rpc {
                server: server.clone(),
                source,
            },
        }
    }

    /// Whether another server might succeed where this one failed.
    ///
    /// Connectivity, authentication and pool exhaustion are transient; a
    /// server that answered with an application error is not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Rpc { source, .. } => source.breaks_connection(),
            Self::AuthenticationFailed { .. } | Self::PoolExhausted { .. } => true,
            Self::NoStorageAvailable | Self::NoTrackerAvailable | Self::NotFound { .. } => false,
        }
    }

    /// Whether this is backpressure rather than failure.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }
}

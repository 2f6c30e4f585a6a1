//! Client side of a connection.

use std::time::Duration;

use godfs_types::BinlogBatch;
use godfs_types::BinlogQuery;
use godfs_types::FileId;
use godfs_types::Instance;
use godfs_types::Role;
use godfs_types::ServerAddr;
use snafu::ResultExt;
use tokio::io::BufReader;
use tokio::io::BufWriter;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tracing::debug;

use crate::error::ConnectSnafu;
use crate::error::RpcError;
use crate::framing::read_frame;
use crate::framing::write_frame;
use crate::messages::HeartbeatRequest;
use crate::messages::HeartbeatResponse;
use crate::messages::RpcRequest;
use crate::messages::RpcResponse;

/// An open, request/response connection to one server.
///
/// Requests are strictly sequential; a connection is owned by one caller at a
/// time (the client pool hands them out exclusively).
pub struct RpcConnection {
    server: ServerAddr,
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    request_timeout: Duration,
    authenticated: bool,
}

impl std::fmt::Debug for RpcConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcConnection")
            .field("server", &self.server)
            .field("authenticated", &self.authenticated)
            .finish_non_exhaustive()
    }
}

impl RpcConnection {
    /// Open a TCP connection.
    pub async fn connect(
        server: &ServerAddr,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, RpcError> {
        let addr = server.to_string();
        let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(&addr)).await {
            Ok(stream) => stream.context(ConnectSnafu { addr: &addr })?,
            Err(_) => {
                return Err(RpcError::ConnectTimeout {
                    addr,
                    timeout_ms: connect_timeout.as_millis() as u64,
                });
            }
        };
        // Frames are flushed explicitly; small request frames should not wait.
        if let Err(e) = stream.set_nodelay(true) {
            debug!(server = %server, error = %e, "failed to disable nagle");
        }
        let (read_half, write_half) = stream.into_split();
        debug!(server = %server, "rpc connection opened");
        Ok(Self {
            server: server.clone(),
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            request_timeout,
            authenticated: false,
        })
    }

    /// Present the cluster secret. Must precede every other request.
    pub async fn authenticate(&mut self, secret: &str) -> Result<(), RpcError> {
        let response = self
            .call(RpcRequest::Authenticate {
                secret: secret.to_string(),
            })
            .await?;
        match response {
            RpcResponse::Authenticated => {
                self.authenticated = true;
                Ok(())
            }
            RpcResponse::AuthenticationFailed => Err(RpcError::AuthenticationFailed),
            other => Err(unexpected("authenticate", &other)),
        }
    }

    /// Send one request and wait for its response.
    pub async fn call(&mut self, request: RpcRequest) -> Result<RpcResponse, RpcError> {
        let kind = request.kind();
        let timeout = self.request_timeout;
        let exchange = async {
            write_frame(&mut self.writer, &request).await?;
            read_frame::<_, RpcResponse>(&mut self.reader).await?.ok_or(RpcError::ConnectionClosed)
        };
        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::RequestTimeout {
                kind,
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Register or renew an instance with a tracker.
    pub async fn heartbeat(&mut self, request: HeartbeatRequest) -> Result<HeartbeatResponse, RpcError> {
        match self.call(RpcRequest::Heartbeat(request)).await? {
            RpcResponse::Heartbeat(response) => Ok(response),
            other => Err(into_error("heartbeat", other)),
        }
    }

    /// Query a tracker for registered instances.
    pub async fn query_instances(
        &mut self,
        role: Role,
        group: Option<String>,
        uploadable_only: bool,
    ) -> Result<Vec<Instance>, RpcError> {
        let request = RpcRequest::QueryInstances {
            role,
            group,
            uploadable_only,
        };
        match self.call(request).await? {
            RpcResponse::Instances(instances) => Ok(instances),
            other => Err(into_error("query_instances", other)),
        }
    }

    /// Read a batch of a storage node's binlog.
    pub async fn sync_binlog(&mut self, query: BinlogQuery) -> Result<BinlogBatch, RpcError> {
        match self.call(RpcRequest::SyncBinlog(query)).await? {
            RpcResponse::Binlog(batch) => Ok(batch),
            other => Err(into_error("sync_binlog", other)),
        }
    }

    /// Fetch file content. `Ok(None)` means the server does not hold it.
    pub async fn fetch_file(&mut self, file_id: &FileId) -> Result<Option<Vec<u8>>, RpcError> {
        let request = RpcRequest::FetchFile {
            file_id: file_id.clone(),
        };
        match self.call(request).await? {
            RpcResponse::File { data } => Ok(Some(data)),
            RpcResponse::NotFound { .. } => Ok(None),
            other => Err(into_error("fetch_file", other)),
        }
    }

    /// Upload content. Returns its address and whether it was already stored.
    pub async fn upload(&mut self, data: Vec<u8>) -> Result<(FileId, bool), RpcError> {
        match self.call(RpcRequest::Upload { data }).await? {
            RpcResponse::Uploaded { file_id, deduplicated } => Ok((file_id, deduplicated)),
            other => Err(into_error("upload", other)),
        }
    }

    /// The server this connection talks to.
    pub fn server(&self) -> &ServerAddr {
        &self.server
    }

    /// Whether [`authenticate`](Self::authenticate) succeeded.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }
}

fn into_error(kind: &'static str, response: RpcResponse) -> RpcError {
    match response {
        RpcResponse::Error { message } => RpcError::Remote { message },
        RpcResponse::IntegrityFault { message } => RpcError::RemoteIntegrity { message },
        RpcResponse::AuthenticationFailed => RpcError::AuthenticationFailed,
        other => unexpected(kind, &other),
    }
}

fn unexpected(kind: &'static str, response: &RpcResponse) -> RpcError {
    RpcError::UnexpectedResponse {
        kind,
        response: format!("{response:?}"),
    }
}

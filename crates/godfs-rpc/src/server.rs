//! Server side: accept loop, authentication gate, dispatch.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use godfs_constants::network::MAX_INBOUND_CONNECTIONS;
use godfs_types::InstanceId;
use snafu::ResultExt;
use tokio::io::AsyncWrite;
use tokio::io::BufReader;
use tokio::io::BufWriter;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::BindSnafu;
use crate::error::IoSnafu;
use crate::error::RpcError;
use crate::framing::read_frame;
use crate::framing::write_frame;
use crate::messages::RpcRequest;
use crate::messages::RpcResponse;

/// Per-connection state visible to the handler.
#[derive(Debug, Clone)]
pub struct Session {
    /// Remote socket address.
    pub peer_addr: SocketAddr,
    /// Instances that announced themselves over this connection.
    instances: Vec<InstanceId>,
}

impl Session {
    /// A fresh session for a connection from `peer_addr`.
    pub fn new(peer_addr: SocketAddr) -> Self {
        Self {
            peer_addr,
            instances: Vec::new(),
        }
    }

    /// Remember that `id` heartbeats over this connection.
    pub fn note_instance(&mut self, id: InstanceId) {
        if !self.instances.contains(&id) {
            self.instances.push(id);
        }
    }

    /// Instances seen on this connection.
    pub fn instances(&self) -> &[InstanceId] {
        &self.instances
    }
}

/// Serves authenticated requests.
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    /// Answer one request. Never sees [`RpcRequest::Authenticate`].
    async fn handle(&self, request: RpcRequest, session: &mut Session) -> RpcResponse;

    /// Called once when an authenticated connection closes.
    async fn on_disconnect(&self, _session: &Session) {}
}

/// Accepts connections and dispatches frames to an [`RpcHandler`].
pub struct RpcServer {
    listener: TcpListener,
    secrets: Arc<Vec<String>>,
    handler: Arc<dyn RpcHandler>,
    connection_permits: Arc<Semaphore>,
}

impl RpcServer {
    /// Bind a listener.
    ///
    /// `secrets` lists every accepted cluster secret: the current one first,
    /// then any previous ones still honored during rotation.
    pub async fn bind(addr: &str, secrets: Vec<String>, handler: Arc<dyn RpcHandler>) -> Result<Self, RpcError> {
        let listener = TcpListener::bind(addr).await.context(BindSnafu { addr })?;
        Ok(Self {
            listener,
            secrets: Arc::new(secrets),
            handler,
            connection_permits: Arc::new(Semaphore::new(MAX_INBOUND_CONNECTIONS as usize)),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, RpcError> {
        self.listener.local_addr().context(IoSnafu)
    }

    /// Accept connections until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let local = self.listener.local_addr().ok();
        info!(addr = ?local, "rpc server listening");
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            let (stream, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };

            let Ok(permit) = self.connection_permits.clone().try_acquire_owned() else {
                warn!(peer = %peer_addr, max = MAX_INBOUND_CONNECTIONS, "connection limit reached, dropping");
                continue;
            };
            let secrets = self.secrets.clone();
            let handler = self.handler.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                let _permit = permit;
                serve_connection(stream, peer_addr, secrets, handler, cancel).await;
            });
        }
        info!(addr = ?local, "rpc server stopped");
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    secrets: Arc<Vec<String>>,
    handler: Arc<dyn RpcHandler>,
    cancel: CancellationToken,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer_addr, error = %e, "failed to disable nagle");
    }
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);
    let mut session = Session::new(peer_addr);
    let mut authenticated = false;

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = read_frame::<_, RpcRequest>(&mut reader) => frame,
        };
        let request = match frame {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(e) => {
                debug!(peer = %peer_addr, error = %e, "dropping connection after bad frame");
                break;
            }
        };

        let response = match request {
            RpcRequest::Authenticate { secret } => {
                if secrets.iter().any(|s| *s == secret) {
                    authenticated = true;
                    RpcResponse::Authenticated
                } else {
                    warn!(peer = %peer_addr, "authentication failed");
                    reject(&mut writer, peer_addr).await;
                    break;
                }
            }
            other if !authenticated => {
                warn!(peer = %peer_addr, kind = other.kind(), "request before authentication");
                reject(&mut writer, peer_addr).await;
                break;
            }
            other => handler.handle(other, &mut session).await,
        };

        if let Err(e) = write_frame(&mut writer, &response).await {
            debug!(peer = %peer_addr, error = %e, "failed to write response");
            break;
        }
    }

    if authenticated {
        handler.on_disconnect(&session).await;
    }
    debug!(peer = %peer_addr, "connection closed");
}

async fn reject<W>(writer: &mut W, peer_addr: SocketAddr)
where W: AsyncWrite + Unpin {
    if let Err(e) = write_frame(writer, &RpcResponse::AuthenticationFailed).await {
        debug!(peer = %peer_addr, error = %e, "failed to send authentication rejection");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use godfs_types::BinlogQuery;
    use godfs_types::Cursor;
    use godfs_types::ServerAddr;

    use super::*;
    use crate::RpcConnection;

    struct Echo;

    #[async_trait]
    impl RpcHandler for Echo {
        async fn handle(&self, request: RpcRequest, _session: &mut Session) -> RpcResponse {
            match request {
                RpcRequest::Upload { data } => RpcResponse::Error {
                    message: format!("{} bytes", data.len()),
                },
                RpcRequest::SyncBinlog(_) => RpcResponse::integrity_fault("binlog segment 0 is missing"),
                other => RpcResponse::error(other.kind()),
            }
        }
    }

    async fn start(secrets: Vec<&str>) -> (ServerAddr, CancellationToken) {
        let secrets = secrets.into_iter().map(String::from).collect();
        let server = RpcServer::bind("127.0.0.1:0", secrets, Arc::new(Echo)).await.unwrap();
        let addr = ServerAddr::from(server.local_addr().unwrap());
        let cancel = CancellationToken::new();
        tokio::spawn(server.run(cancel.clone()));
        (addr, cancel)
    }

    async fn connect(addr: &ServerAddr) -> RpcConnection {
        RpcConnection::connect(addr, Duration::from_secs(2), Duration::from_secs(5)).await.unwrap()
    }

    #[tokio::test]
    async fn test_authenticated_request_is_dispatched() {
        let (addr, cancel) = start(vec!["current"]).await;
        let mut conn = connect(&addr).await;
        conn.authenticate("current").await.unwrap();
        let response = conn.call(RpcRequest::Upload { data: vec![0; 5] }).await.unwrap();
        assert_eq!(response, RpcResponse::error("5 bytes"));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_integrity_fault_reaches_the_caller() {
        let (addr, cancel) = start(vec!["current"]).await;
        let mut conn = connect(&addr).await;
        conn.authenticate("current").await.unwrap();
        let err = conn.sync_binlog(BinlogQuery::from_cursor(Cursor::default(), 10)).await.unwrap_err();
        assert!(err.is_integrity_fault(), "got {err}");
        assert!(!err.breaks_connection());

        // The stream stays aligned for the next request.
        let response = conn.call(RpcRequest::Upload { data: vec![0; 2] }).await.unwrap();
        assert_eq!(response, RpcResponse::error("2 bytes"));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_previous_secret_is_accepted() {
        let (addr, cancel) = start(vec!["current", "previous"]).await;
        let mut conn = connect(&addr).await;
        conn.authenticate("previous").await.unwrap();
        assert!(conn.is_authenticated());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_wrong_secret_is_rejected() {
        let (addr, cancel) = start(vec!["current"]).await;
        let mut conn = connect(&addr).await;
        let err = conn.authenticate("guess").await.unwrap_err();
        assert!(matches!(err, RpcError::AuthenticationFailed));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_request_before_authentication_is_rejected() {
        let (addr, cancel) = start(vec!["current"]).await;
        let mut conn = connect(&addr).await;
        let response = conn.call(RpcRequest::Upload { data: vec![] }).await.unwrap();
        assert_eq!(response, RpcResponse::AuthenticationFailed);
        assert!(conn.call(RpcRequest::Upload { data: vec![] }).await.is_err());
        cancel.cancel();
    }

    #[test]
    fn test_session_dedups_instances() {
        let mut session = Session::new("127.0.0.1:1".parse().unwrap());
        let id = InstanceId::parse("storage1").unwrap();
        session.note_instance(id);
        session.note_instance(id);
        assert_eq!(session.instances(), &[id]);
    }
}

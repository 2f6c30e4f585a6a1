//! Storage selection with failing servers.
//!
//! # Test Coverage
//!
//! - Connect failures exclude a server and selection moves on
//! - No server is tried twice within one selection
//! - Exhausting every candidate returns the last error
//! - An empty candidate set reports no storage available
//! - A full pool is backpressure, retried elsewhere like a connect failure

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use godfs_client::ClientError;
use godfs_client::ConnectionPool;
use godfs_client::Connector;
use godfs_client::ExhaustionPolicy;
use godfs_client::Operation;
use godfs_client::PoolConfig;
use godfs_client::StorageSelector;
use godfs_rpc::RpcError;
use godfs_types::ServerAddr;
use parking_lot::Mutex;

/// Connector whose "connections" are the server address. Servers in `down`
/// refuse to connect.
#[derive(Clone, Default)]
struct FlakyConnector {
    down: Arc<HashSet<ServerAddr>>,
    attempts: Arc<Mutex<Vec<ServerAddr>>>,
}

#[async_trait]
impl Connector for FlakyConnector {
    type Conn = ServerAddr;

    async fn connect(&self, server: &ServerAddr) -> Result<ServerAddr, ClientError> {
        self.attempts.lock().push(server.clone());
        if self.down.contains(server) {
            return Err(ClientError::from_rpc(server, RpcError::ConnectTimeout {
                addr: server.to_string(),
                timeout_ms: 3_000,
            }));
        }
        Ok(server.clone())
    }
}

fn servers() -> Vec<ServerAddr> {
    (0..3).map(|i| ServerAddr::new("10.0.0.1", 23000 + i)).collect()
}

fn setup(down: &[ServerAddr], max: u32) -> (StorageSelector, ConnectionPool<FlakyConnector>, FlakyConnector) {
    let connector = FlakyConnector {
        down: Arc::new(down.iter().cloned().collect()),
        attempts: Arc::default(),
    };
    let pool = ConnectionPool::new(connector.clone(), PoolConfig {
        max_connections_per_server: max,
        exhaustion: ExhaustionPolicy::FailFast,
    });
    (StorageSelector::new(servers()), pool, connector)
}

#[tokio::test]
async fn test_third_server_after_two_failures() {
    let all = servers();
    let (selector, pool, connector) = setup(&all[..2], 4);

    let mut excluded = Vec::new();
    let conn = selector.select_and_connect(&pool, None, Operation::Upload, &mut excluded).await.unwrap();

    assert_eq!(*conn, all[2]);
    assert_eq!(excluded, all[..2].to_vec());
    assert_eq!(*connector.attempts.lock(), all);
}

#[tokio::test]
async fn test_all_down_returns_last_error() {
    let all = servers();
    let (selector, pool, connector) = setup(&all, 4);

    let mut excluded = Vec::new();
    let err = selector.select_and_connect(&pool, None, Operation::Download, &mut excluded).await.unwrap_err();

    match err {
        ClientError::Rpc { server, .. } => assert_eq!(server, all[2]),
        other => panic!("expected the last connect error, got {other}"),
    }
    assert_eq!(*connector.attempts.lock(), all);
    assert_eq!(excluded, all);
}

#[tokio::test]
async fn test_no_candidates() {
    let selector = StorageSelector::new(Vec::new());
    let pool = ConnectionPool::new(FlakyConnector::default(), PoolConfig::default());

    let mut excluded = Vec::new();
    let err = selector.select_and_connect(&pool, None, Operation::Upload, &mut excluded).await.unwrap_err();
    assert!(matches!(err, ClientError::NoStorageAvailable));
}

#[tokio::test]
async fn test_caller_exclusions_respected() {
    let all = servers();
    let (selector, pool, connector) = setup(&[], 4);

    let mut excluded = vec![all[0].clone(), all[1].clone()];
    let conn = selector.select_and_connect(&pool, None, Operation::Upload, &mut excluded).await.unwrap();
    assert_eq!(*conn, all[2]);
    assert_eq!(*connector.attempts.lock(), vec![all[2].clone()]);
}

#[tokio::test]
async fn test_full_pool_moves_to_next_server() {
    let all = servers();
    let (selector, pool, _) = setup(&[], 1);

    // Hold the only slot for the least-used server.
    let held = pool.acquire(&all[0]).await.unwrap();

    let mut excluded = Vec::new();
    let conn = selector.select_and_connect(&pool, None, Operation::Upload, &mut excluded).await.unwrap();
    assert_eq!(*conn, all[1]);
    assert_eq!(excluded, vec![all[0].clone()]);

    held.release();
    conn.release();
    assert_eq!(pool.idle_count(&all[0]), 1);
}

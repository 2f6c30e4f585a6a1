//! Tracker, two storage nodes and a client over real TCP.
//!
//! # Test Coverage
//!
//! - Storage nodes register and learn each other through the tracker
//! - An upload to one node replicates to its group peer
//! - Downloads succeed from any node, unknown ids report not found
//! - Re-uploading replicated content deduplicates
//! - A wrong secret is rejected at connect
//! - A storage node without a reachable tracker refuses to start
//! - A peer serving a gapped binlog halts replication from it

use std::sync::Arc;
use std::time::Duration;

use godfs::NodeConfig;
use godfs::NodeError;
use godfs::StorageNode;
use godfs::TrackerNode;
use godfs_client::ClientError;
use godfs_client::ConnectionPool;
use godfs_client::GodfsClient;
use godfs_client::PoolConfig;
use godfs_client::RpcConnector;
use godfs_types::FileId;
use godfs_types::Role;
use godfs_types::ServerAddr;
use tempfile::TempDir;

const SECRET: &str = "cluster-test-secret";

fn tracker_config(dir: &TempDir) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.node.role = Role::Tracker;
    config.node.data_dir = dir.path().to_path_buf();
    config.node.bind_addr = "127.0.0.1:0".to_string();
    config.node.secret = SECRET.to_string();
    config.heartbeat.interval_ms = 200;
    config.heartbeat.missed_heartbeats = 2;
    config.heartbeat.sweep_interval_ms = 100;
    config
}

fn storage_config(dir: &TempDir, tracker: &ServerAddr) -> NodeConfig {
    let mut config = tracker_config(dir);
    config.node.role = Role::Storage;
    config.node.group = Some("g1".to_string());
    config.node.trackers = vec![tracker.to_string()];
    config.sync.tick_interval_ms = 50;
    config.sync.watch_refresh_interval_ms = 100;
    config.sync.retry_base_delay_ms = 50;
    config.sync.retry_max_delay_ms = 200;
    config.dataset.slots = 1024;
    config
}

fn client(tracker: &ServerAddr, secret: &str) -> GodfsClient<RpcConnector> {
    let pool = Arc::new(ConnectionPool::new(RpcConnector::new(secret), PoolConfig::default()));
    GodfsClient::new(pool, vec![tracker.clone()], Vec::new(), Some("g1".to_string()))
}

/// Poll `check` every 50ms for up to 10s.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}

fn held_by(node: &StorageNode, file_id: &FileId) -> bool {
    node.replica().store.exists(file_id) && node.replica().dataset.contains(file_id)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_upload_replicates_across_group() {
    let tracker_dir = TempDir::new().unwrap();
    let tracker = TrackerNode::start(&tracker_config(&tracker_dir)).await.unwrap();
    let tracker_addr = ServerAddr::from(tracker.local_addr());

    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let a = StorageNode::start(&storage_config(&dir_a, &tracker_addr)).await.unwrap();
    let b = StorageNode::start(&storage_config(&dir_b, &tracker_addr)).await.unwrap();
    assert_ne!(a.instance().id, b.instance().id);
    assert_eq!(tracker.registry().group_members("g1").len(), 2);

    let client = client(&tracker_addr, SECRET);
    assert_eq!(client.refresh_storage().await.unwrap(), 2);

    let content = b"replicated across the group".to_vec();
    let (file_id, deduplicated) = client.upload(content.clone()).await.unwrap();
    assert!(!deduplicated);
    assert_eq!(file_id.as_str().len(), 38);

    assert!(eventually(|| held_by(&a, &file_id) && held_by(&b, &file_id)).await);
    assert_eq!(a.replica().store.read(&file_id).unwrap(), content);
    assert_eq!(b.replica().store.read(&file_id).unwrap(), content);

    // Each node logs the file once; the origin's record is not echoed back.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(a.replica().binlog.total_records(), 1);
    assert_eq!(b.replica().binlog.total_records(), 1);

    assert_eq!(client.download(&file_id).await.unwrap(), content);
    let (again, deduplicated) = client.upload(content).await.unwrap();
    assert_eq!(again, file_id);
    assert!(deduplicated);

    let missing = FileId::parse("00/00/00000000000000000000000000000000").unwrap();
    assert!(matches!(client.download(&missing).await, Err(ClientError::NotFound { .. })));

    let stats = a.synchronizer().stats();
    assert!(stats.iter().all(|(_, s)| !s.halted));

    a.shutdown().await;
    b.shutdown().await;
    tracker.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_gapped_peer_binlog_halts_replication() {
    let tracker_dir = TempDir::new().unwrap();
    let tracker = TrackerNode::start(&tracker_config(&tracker_dir)).await.unwrap();
    let tracker_addr = ServerAddr::from(tracker.local_addr());

    let dir_a = TempDir::new().unwrap();
    let mut config_a = storage_config(&dir_a, &tracker_addr);
    config_a.binlog.max_records_per_segment = 1;
    let a = StorageNode::start(&config_a).await.unwrap();

    let client = client(&tracker_addr, SECRET);
    assert_eq!(client.refresh_storage().await.unwrap(), 1);
    client.upload(b"lands in segment zero".to_vec()).await.unwrap();
    client.upload(b"lands in segment one".to_vec()).await.unwrap();
    assert_eq!(a.replica().binlog.current_index(), 1);
    std::fs::remove_file(a.replica().binlog.dir().join("bin.000")).unwrap();

    let dir_b = TempDir::new().unwrap();
    let b = StorageNode::start(&storage_config(&dir_b, &tracker_addr)).await.unwrap();
    let a_id = a.instance().id;
    assert!(eventually(|| b.synchronizer().peer_stats(&a_id).is_some_and(|s| s.halted)).await);

    let stats = b.synchronizer().peer_stats(&a_id).unwrap();
    assert!(stats.last_error.is_some_and(|e| e.contains("integrity")));
    assert!(b.replica().dataset.is_empty());

    a.shutdown().await;
    b.shutdown().await;
    tracker.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wrong_secret_rejected() {
    let tracker_dir = TempDir::new().unwrap();
    let tracker = TrackerNode::start(&tracker_config(&tracker_dir)).await.unwrap();
    let tracker_addr = ServerAddr::from(tracker.local_addr());
    let dir = TempDir::new().unwrap();
    let node = StorageNode::start(&storage_config(&dir, &tracker_addr)).await.unwrap();

    let intruder = {
        let pool = Arc::new(ConnectionPool::new(RpcConnector::new("wrong"), PoolConfig::default()));
        GodfsClient::new(pool, Vec::new(), vec![node.server().clone()], None)
    };
    let err = intruder.upload(b"nope".to_vec()).await.unwrap_err();
    assert!(matches!(err, ClientError::AuthenticationFailed { .. }), "got {err}");
    assert_eq!(node.replica().binlog.total_records(), 0);

    node.shutdown().await;
    tracker.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_storage_needs_a_tracker() {
    // Bind and drop a listener to get a port nobody serves.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead = ServerAddr::from(listener.local_addr().unwrap());
    drop(listener);

    let dir = TempDir::new().unwrap();
    let result = StorageNode::start(&storage_config(&dir, &dead)).await;
    assert!(matches!(result, Err(NodeError::Registration { .. })));
}

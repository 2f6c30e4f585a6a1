//! Replication between in-process storage replicas.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use godfs_binlog::Binlog;
use godfs_binlog::BinlogConfig;
use godfs_store::ContentStore;
use godfs_store::Dataset;
use godfs_sync::BinlogSynchronizer;
use godfs_sync::CursorStore;
use godfs_sync::LocalReplica;
use godfs_sync::MembershipView;
use godfs_sync::PeerTransport;
use godfs_sync::SyncConfig;
use godfs_sync::SyncError;
use godfs_types::BinlogBatch;
use godfs_types::BinlogQuery;
use godfs_types::Cursor;
use godfs_types::FileId;
use godfs_types::Instance;
use godfs_types::InstanceId;
use godfs_types::RetryPolicy;
use godfs_types::Role;
use godfs_types::ServerAddr;
use parking_lot::Mutex;
use tempfile::TempDir;

const RECORD: u64 = 64;

struct Node {
    _dir: TempDir,
    instance: Instance,
    replica: LocalReplica,
    cursors: Arc<CursorStore>,
}

fn node(name: &str, port: u16, max_records_per_segment: u32) -> Node {
    let dir = TempDir::new().unwrap();
    let id = InstanceId::parse(name).unwrap();
    let replica = LocalReplica {
        instance_id: id,
        binlog: Arc::new(Binlog::open(dir.path(), BinlogConfig { max_records_per_segment }).unwrap()),
        store: Arc::new(ContentStore::open(dir.path()).unwrap()),
        dataset: Arc::new(Dataset::open(dir.path(), 256).unwrap()),
    };
    let cursors = Arc::new(CursorStore::open(dir.path().join("sync/cursors.redb")).unwrap());
    let instance = Instance::new(id, Role::Storage, ServerAddr::new("127.0.0.1", port)).with_group("g1");
    Node {
        _dir: dir,
        instance,
        replica,
        cursors,
    }
}

/// Serves binlogs and content straight out of other replicas.
#[derive(Default)]
struct InProcessTransport {
    replicas: Mutex<HashMap<InstanceId, LocalReplica>>,
    unreachable: Mutex<HashSet<InstanceId>>,
    corrupt: Mutex<HashSet<InstanceId>>,
    fetches: Mutex<Vec<(InstanceId, FileId)>>,
    misaligned: Mutex<bool>,
}

impl InProcessTransport {
    fn add(&self, node: &Node) {
        self.replicas.lock().insert(node.instance.id, node.replica.clone());
    }

    fn replica(&self, id: &InstanceId) -> Result<LocalReplica, SyncError> {
        if self.unreachable.lock().contains(id) {
            return Err(SyncError::Peer {
                peer: *id,
                message: "connection refused".to_string(),
            });
        }
        self.replicas.lock().get(id).cloned().ok_or_else(|| SyncError::Peer {
            peer: *id,
            message: "unknown peer".to_string(),
        })
    }
}

#[async_trait]
impl PeerTransport for InProcessTransport {
    async fn read_binlog(&self, peer: &Instance, query: BinlogQuery) -> Result<BinlogBatch, SyncError> {
        let replica = self.replica(&peer.id)?;
        let mut batch = replica.binlog.read(query)?;
        if *self.misaligned.lock() && !batch.records.is_empty() {
            batch.next.offset += 1;
        }
        Ok(batch)
    }

    async fn fetch_file(&self, server: &Instance, file_id: &FileId) -> Result<Option<Vec<u8>>, SyncError> {
        self.fetches.lock().push((server.id, file_id.clone()));
        // Let concurrent ticks interleave around the fetch.
        tokio::task::yield_now().await;
        let replica = self.replica(&server.id)?;
        match replica.store.read(file_id) {
            Ok(mut data) if self.corrupt.lock().contains(&server.id) => {
                data[0] ^= 0xff;
                Ok(Some(data))
            }
            Ok(data) => Ok(Some(data)),
            Err(godfs_store::StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

struct StaticMembership(Mutex<Vec<Instance>>);

#[async_trait]
impl MembershipView for StaticMembership {
    async fn group_members(&self) -> Result<Vec<Instance>, SyncError> {
        Ok(self.0.lock().clone())
    }
}

fn synchronizer(
    local: &Node,
    transport: &Arc<InProcessTransport>,
    members: Vec<Instance>,
    batch_size: u32,
) -> (Arc<BinlogSynchronizer>, Arc<StaticMembership>) {
    let membership = Arc::new(StaticMembership(Mutex::new(members)));
    let config = SyncConfig {
        batch_size,
        tick_interval: Duration::from_millis(20),
        watch_refresh_interval: Duration::from_millis(20),
        retry: RetryPolicy::capped(Duration::from_millis(10), Duration::from_millis(50)),
    };
    let sync = BinlogSynchronizer::new(
        local.replica.clone(),
        local.cursors.clone(),
        transport.clone(),
        membership.clone(),
        config,
    );
    (Arc::new(sync), membership)
}

fn upload(node: &Node, data: &[u8]) -> FileId {
    node.replica.ingest(data, node.instance.id, None).unwrap().file_id
}

#[tokio::test]
async fn test_two_ticks_of_two_records_each() {
    let a = node("storageA", 1, 100);
    let b = node("storageB", 2, 100);
    let transport = Arc::new(InProcessTransport::default());
    transport.add(&a);
    transport.add(&b);

    let f1 = upload(&a, b"first file");
    let f2 = upload(&a, b"second file");
    let f3 = upload(&a, b"third file");

    let (sync, _) = synchronizer(&b, &transport, vec![a.instance.clone(), b.instance.clone()], 2);

    let first = sync.sync_once(&a.instance).await.unwrap();
    assert_eq!(first.cursor, Cursor::new(0, 2 * RECORD));
    assert_eq!(b.cursors.get(&a.instance.id).unwrap(), Cursor::new(0, 2 * RECORD));
    assert!(b.replica.dataset.contains(&f1));
    assert!(b.replica.dataset.contains(&f2));
    assert!(!b.replica.dataset.contains(&f3));

    let second = sync.sync_once(&a.instance).await.unwrap();
    assert_eq!(second.cursor, Cursor::new(0, 3 * RECORD));
    assert!(b.replica.dataset.contains(&f3));
    assert_eq!(b.replica.store.read(&f3).unwrap(), b"third file");

    // The local records keep the original source.
    let local = b.replica.binlog.read(BinlogQuery::from_cursor(Cursor::default(), 10)).unwrap();
    assert_eq!(local.records.len(), 3);
    assert!(local.records.iter().all(|r| r.source == a.instance.id));

    let idle = sync.sync_once(&a.instance).await.unwrap();
    assert_eq!(idle.fetched, 0);
    assert!(!idle.advanced);
}

#[tokio::test]
async fn test_reapplying_known_file_is_a_noop() {
    let a = node("storageA", 1, 100);
    let b = node("storageB", 2, 100);
    let c = node("storageC", 3, 100);
    let transport = Arc::new(InProcessTransport::default());
    for n in [&a, &b, &c] {
        transport.add(n);
    }
    let f1 = upload(&a, b"shared");
    let members = vec![a.instance.clone(), b.instance.clone(), c.instance.clone()];

    let (c_sync, _) = synchronizer(&c, &transport, members.clone(), 10);
    c_sync.sync_once(&a.instance).await.unwrap();

    let (b_sync, _) = synchronizer(&b, &transport, members, 10);
    let from_a = b_sync.sync_once(&a.instance).await.unwrap();
    assert_eq!(from_a.applied, 1);
    let from_c = b_sync.sync_once(&c.instance).await.unwrap();
    assert_eq!(from_c.applied, 0);
    assert_eq!(from_c.skipped, 1);
    assert!(from_c.advanced);

    assert_eq!(b.replica.store.ref_count(&f1).unwrap(), 1);
    assert_eq!(b.replica.dataset.len(), 1);
    assert_eq!(b.replica.binlog.total_records(), 1);
}

#[tokio::test]
async fn test_self_originated_records_are_skipped() {
    let a = node("storageA", 1, 100);
    let b = node("storageB", 2, 100);
    let transport = Arc::new(InProcessTransport::default());
    transport.add(&a);
    transport.add(&b);

    // A already replicated something that B originated.
    let f = upload(&b, b"from b");
    a.replica.ingest(b"from b", b.instance.id, Some(&f)).unwrap();
    b.replica.dataset.remove(&f).unwrap();

    let (sync, _) = synchronizer(&b, &transport, vec![a.instance.clone()], 10);
    let outcome = sync.sync_once(&a.instance).await.unwrap();
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.applied, 0);
    assert!(transport.fetches.lock().is_empty());
}

#[tokio::test]
async fn test_unreachable_peer_holds_cursor() {
    let a = node("storageA", 1, 100);
    let b = node("storageB", 2, 100);
    let transport = Arc::new(InProcessTransport::default());
    transport.add(&a);
    transport.add(&b);
    upload(&a, b"one");
    upload(&a, b"two");

    let (sync, _) = synchronizer(&b, &transport, vec![a.instance.clone()], 10);

    transport.unreachable.lock().insert(a.instance.id);
    assert!(sync.sync_once(&a.instance).await.is_err());
    assert_eq!(b.cursors.get(&a.instance.id).unwrap(), Cursor::default());
    let stats = sync.peer_stats(&a.instance.id).unwrap();
    assert_eq!(stats.failed, 1);
    assert!(stats.last_error.is_some());

    transport.unreachable.lock().clear();
    let outcome = sync.sync_once(&a.instance).await.unwrap();
    assert_eq!(outcome.applied, 2);
    assert_eq!(outcome.cursor, Cursor::new(0, 2 * RECORD));
}

#[tokio::test]
async fn test_partial_batch_failure_is_retried_whole() {
    let a = node("storageA", 1, 100);
    let b = node("storageB", 2, 100);
    let c = node("storageC", 3, 100);
    let transport = Arc::new(InProcessTransport::default());
    for n in [&a, &b, &c] {
        transport.add(n);
    }

    // A holds a record whose content it has since released and that only C
    // can supply.
    let gone = upload(&a, b"released later");
    a.replica.store.release(&gone).unwrap();
    let kept = upload(&a, b"still here");

    let (sync, membership) = synchronizer(&b, &transport, vec![a.instance.clone(), b.instance.clone()], 10);
    let outcome = sync.sync_once(&a.instance).await.unwrap();
    assert_eq!(outcome.applied, 1);
    assert_eq!(outcome.failed, 1);
    assert!(!outcome.advanced);
    assert!(b.replica.dataset.contains(&kept));

    // C joins and has the content; the retried batch now applies fully.
    c.replica.ingest(b"released later", a.instance.id, Some(&gone)).unwrap();
    membership.0.lock().push(c.instance.clone());
    let retry = sync.sync_once(&a.instance).await.unwrap();
    assert_eq!(retry.applied, 1);
    assert_eq!(retry.skipped, 1);
    assert_eq!(retry.cursor, Cursor::new(0, 2 * RECORD));
    assert!(b.replica.dataset.contains(&gone));
}

#[tokio::test]
async fn test_fetch_falls_back_to_serving_peer() {
    let a = node("storageA", 1, 100);
    let b = node("storageB", 2, 100);
    let c = node("storageC", 3, 100);
    let transport = Arc::new(InProcessTransport::default());
    for n in [&a, &b, &c] {
        transport.add(n);
    }
    let f = upload(&a, b"origin is down");
    let members = vec![a.instance.clone(), b.instance.clone(), c.instance.clone()];
    let (c_sync, _) = synchronizer(&c, &transport, members.clone(), 10);
    c_sync.sync_once(&a.instance).await.unwrap();

    transport.unreachable.lock().insert(a.instance.id);
    let (b_sync, _) = synchronizer(&b, &transport, members, 10);
    let outcome = b_sync.sync_once(&c.instance).await.unwrap();
    assert_eq!(outcome.applied, 1);
    assert!(b.replica.store.exists(&f));

    let fetches = transport.fetches.lock().clone();
    let tried: Vec<InstanceId> = fetches.iter().filter(|(_, id)| *id == f).map(|(s, _)| *s).collect();
    assert_eq!(tried, vec![a.instance.id, a.instance.id, c.instance.id]);
}

#[tokio::test]
async fn test_fetch_skips_candidate_serving_damaged_content() {
    let a = node("storageA", 1, 100);
    let b = node("storageB", 2, 100);
    let c = node("storageC", 3, 100);
    let transport = Arc::new(InProcessTransport::default());
    for n in [&a, &b, &c] {
        transport.add(n);
    }
    let f = upload(&a, b"origin serves garbage");
    let members = vec![a.instance.clone(), b.instance.clone(), c.instance.clone()];
    let (c_sync, _) = synchronizer(&c, &transport, members.clone(), 10);
    c_sync.sync_once(&a.instance).await.unwrap();

    transport.corrupt.lock().insert(a.instance.id);
    let (b_sync, _) = synchronizer(&b, &transport, members, 10);
    let outcome = b_sync.sync_once(&c.instance).await.unwrap();
    assert_eq!(outcome.applied, 1);
    assert_eq!(outcome.failed, 0);
    assert!(outcome.advanced);
    assert!(b.replica.dataset.contains(&f));
    assert_eq!(b.replica.store.read(&f).unwrap(), b"origin serves garbage");

    let fetches = transport.fetches.lock().clone();
    let tried: Vec<InstanceId> = fetches.iter().filter(|(_, id)| *id == f).map(|(s, _)| *s).collect();
    assert_eq!(tried, vec![a.instance.id, a.instance.id, c.instance.id]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_watches_apply_shared_file_once() {
    let a = node("storageA", 1, 100);
    let b = node("storageB", 2, 100);
    let c = node("storageC", 3, 100);
    let transport = Arc::new(InProcessTransport::default());
    for n in [&a, &b, &c] {
        transport.add(n);
    }
    let f = upload(&a, b"seen by two watches");
    c.replica.ingest(b"seen by two watches", a.instance.id, Some(&f)).unwrap();
    let members = vec![a.instance.clone(), b.instance.clone(), c.instance.clone()];

    let (b_sync, _) = synchronizer(&b, &transport, members, 10);
    let (from_a, from_c) = tokio::join!(b_sync.sync_once(&a.instance), b_sync.sync_once(&c.instance));
    let (from_a, from_c) = (from_a.unwrap(), from_c.unwrap());

    assert_eq!(from_a.applied + from_c.applied, 1);
    assert_eq!(from_a.skipped + from_c.skipped, 1);
    assert!(from_a.advanced && from_c.advanced);
    assert_eq!(b.replica.store.ref_count(&f).unwrap(), 1);
    assert_eq!(b.replica.binlog.total_records(), 1);
    assert_eq!(b.replica.dataset.len(), 1);
}

#[tokio::test]
async fn test_peer_segment_rotation_is_followed() {
    let a = node("storageA", 1, 2);
    let b = node("storageB", 2, 100);
    let transport = Arc::new(InProcessTransport::default());
    transport.add(&a);
    transport.add(&b);
    for n in 0..3u8 {
        upload(&a, &[n; 16]);
    }
    assert_eq!(a.replica.binlog.current_index(), 1);

    let (sync, _) = synchronizer(&b, &transport, vec![a.instance.clone()], 10);
    assert_eq!(sync.sync_once(&a.instance).await.unwrap().cursor, Cursor::new(0, 2 * RECORD));
    let rolled = sync.sync_once(&a.instance).await.unwrap();
    assert_eq!(rolled.fetched, 0);
    assert_eq!(rolled.cursor, Cursor::new(1, 0));
    assert_eq!(sync.sync_once(&a.instance).await.unwrap().cursor, Cursor::new(1, RECORD));
    assert_eq!(b.replica.dataset.len(), 3);
}

#[tokio::test]
async fn test_inconsistent_batch_is_an_integrity_fault() {
    let a = node("storageA", 1, 100);
    let b = node("storageB", 2, 100);
    let transport = Arc::new(InProcessTransport::default());
    transport.add(&a);
    upload(&a, b"x");
    *transport.misaligned.lock() = true;

    let (sync, _) = synchronizer(&b, &transport, vec![a.instance.clone()], 10);
    let err = sync.sync_once(&a.instance).await.unwrap_err();
    assert!(err.is_integrity_fault());
    assert!(b.replica.dataset.is_empty());
}

#[tokio::test]
async fn test_watch_set_follows_membership() {
    let a = node("storageA", 1, 100);
    let b = node("storageB", 2, 100);
    let transport = Arc::new(InProcessTransport::default());
    transport.add(&a);
    transport.add(&b);
    let f = upload(&a, b"watched");

    let (sync, membership) = synchronizer(&b, &transport, vec![a.instance.clone(), b.instance.clone()], 10);
    let diff = sync.refresh_watches().await.unwrap();
    assert_eq!(diff.start.len(), 1);
    assert_eq!(sync.watched_peers(), vec![a.instance.id]);

    // Watching again is a no-op.
    assert!(!sync.watch(a.instance.clone()));
    assert!(!sync.watch(b.instance.clone()));

    tokio::time::timeout(Duration::from_secs(5), async {
        while !b.replica.dataset.contains(&f) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    membership.0.lock().retain(|m| m.id != a.instance.id);
    let diff = sync.refresh_watches().await.unwrap();
    assert_eq!(diff.stop, vec![a.instance.id]);
    assert!(sync.watched_peers().is_empty());

    sync.shutdown().await;
}

#[tokio::test]
async fn test_integrity_fault_halts_watch() {
    let a = node("storageA", 1, 100);
    let b = node("storageB", 2, 100);
    let transport = Arc::new(InProcessTransport::default());
    transport.add(&a);
    upload(&a, b"x");
    *transport.misaligned.lock() = true;

    let (sync, _) = synchronizer(&b, &transport, vec![a.instance.clone()], 10);
    assert!(sync.watch(a.instance.clone()));

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if sync.peer_stats(&a.instance.id).is_some_and(|s| s.halted) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(sync.peer_stats(&a.instance.id).unwrap().ticks, 1);
    sync.shutdown().await;
}

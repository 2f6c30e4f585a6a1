//! Storage node: holds content, serves it and replicates its group.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use godfs_binlog::Binlog;
use godfs_client::ConnectionPool;
use godfs_client::RpcConnector;
use godfs_client::TrackerClient;
use godfs_constants::sync::CURSOR_DB_FILE_NAME;
use godfs_constants::sync::DEFAULT_RETRY_BASE_DELAY_MS;
use godfs_constants::sync::SYNC_DIR_NAME;
use godfs_constants::tracker::INITIAL_REGISTRATION_ATTEMPTS;
use godfs_rpc::HeartbeatRequest;
use godfs_rpc::HeartbeatResponse;
use godfs_rpc::RpcHandler;
use godfs_rpc::RpcRequest;
use godfs_rpc::RpcResponse;
use godfs_rpc::RpcServer;
use godfs_rpc::Session;
use godfs_store::ContentStore;
use godfs_store::Dataset;
use godfs_store::StoreError;
use godfs_sync::BinlogSynchronizer;
use godfs_sync::CursorStore;
use godfs_sync::LocalReplica;
use godfs_types::FileId;
use godfs_types::Instance;
use godfs_types::InstanceStatistics;
use godfs_types::RetryPolicy;
use godfs_types::Role;
use godfs_types::ServerAddr;
use snafu::ResultExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::ensure_data_dir;
use crate::adapters::PooledPeerTransport;
use crate::adapters::TrackerMembership;
use crate::config::NodeConfig;
use crate::error::BinlogSnafu;
use crate::error::CursorSnafu;
use crate::error::NodeError;
use crate::error::RpcSnafu;
use crate::error::StoreSnafu;
use crate::identity::load_or_create_instance_id;

/// Serves uploads, downloads and binlog reads from the local replica.
struct StorageService {
    replica: LocalReplica,
    readonly: bool,
    uploads: AtomicU64,
    downloads: AtomicU64,
    uploaded_bytes: AtomicU64,
}

impl StorageService {
    async fn upload(&self, data: Vec<u8>) -> RpcResponse {
        if self.readonly {
            return RpcResponse::error("storage server is readonly");
        }
        let replica = self.replica.clone();
        let len = data.len() as u64;
        let result = tokio::task::spawn_blocking(move || replica.ingest(&data, replica.instance_id, None)).await;
        match result {
            Ok(Ok(outcome)) => {
                self.uploads.fetch_add(1, Ordering::Relaxed);
                if !outcome.deduplicated {
                    self.uploaded_bytes.fetch_add(len, Ordering::Relaxed);
                }
                info!(file_id = %outcome.file_id, len, deduplicated = outcome.deduplicated, "upload stored");
                RpcResponse::Uploaded {
                    file_id: outcome.file_id,
                    deduplicated: outcome.deduplicated,
                }
            }
            Ok(Err(e)) => {
                if e.is_integrity_fault() {
                    error!(error = %e, "upload hit an integrity fault");
                } else {
                    warn!(error = %e, "upload failed");
                }
                RpcResponse::error(e)
            }
            Err(e) => RpcResponse::error(e),
        }
    }

    async fn fetch(&self, file_id: FileId) -> RpcResponse {
        let store = self.replica.store.clone();
        let lookup = file_id.clone();
        match tokio::task::spawn_blocking(move || store.read(&lookup)).await {
            Ok(Ok(data)) => {
                self.downloads.fetch_add(1, Ordering::Relaxed);
                RpcResponse::File { data }
            }
            Ok(Err(StoreError::NotFound { .. })) => RpcResponse::NotFound { file_id },
            Ok(Err(e @ StoreError::CorruptEntry { .. })) => {
                error!(file_id = %file_id, error = %e, "stored entry is damaged");
                RpcResponse::error(e)
            }
            Ok(Err(e)) => {
                warn!(file_id = %file_id, error = %e, "fetch failed");
                RpcResponse::error(e)
            }
            Err(e) => RpcResponse::error(e),
        }
    }

    fn statistics(&self) -> InstanceStatistics {
        InstanceStatistics {
            file_count: self.replica.dataset.len() as u64,
            total_bytes: self.uploaded_bytes.load(Ordering::Relaxed),
            binlog_records: self.replica.binlog.total_records(),
            uploads: self.uploads.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl RpcHandler for StorageService {
    async fn handle(&self, request: RpcRequest, _session: &mut Session) -> RpcResponse {
        match request {
            RpcRequest::Upload { data } => self.upload(data).await,
            RpcRequest::FetchFile { file_id } => self.fetch(file_id).await,
            RpcRequest::SyncBinlog(query) => {
                let binlog = self.replica.binlog.clone();
                match tokio::task::spawn_blocking(move || binlog.read(query)).await {
                    Ok(Ok(batch)) => RpcResponse::Binlog(batch),
                    Ok(Err(e)) if e.is_integrity_fault() => {
                        error!(error = %e, "binlog integrity fault while serving a peer");
                        RpcResponse::integrity_fault(e)
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, "binlog read for peer failed");
                        RpcResponse::error(e)
                    }
                    Err(e) => RpcResponse::error(e),
                }
            }
            other => RpcResponse::error(format!("{} is not served by a storage node", other.kind())),
        }
    }
}

/// A running storage node.
pub struct StorageNode {
    instance: Instance,
    replica: LocalReplica,
    service: Arc<StorageService>,
    synchronizer: Arc<BinlogSynchronizer>,
    membership: Arc<TrackerMembership>,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for StorageNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageNode")
            .field("instance", &self.instance)
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl StorageNode {
    /// Open local state, bind the listener, register with the trackers and
    /// start replication.
    ///
    /// Fails if no tracker accepts a heartbeat within the initial registration
    /// attempts.
    pub async fn start(config: &NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;
        let data_dir = &config.node.data_dir;
        ensure_data_dir(data_dir)?;
        let id = load_or_create_instance_id(data_dir)?;

        let replica = LocalReplica {
            instance_id: id,
            binlog: Arc::new(Binlog::open(data_dir, config.binlog_config()).context(BinlogSnafu)?),
            store: Arc::new(ContentStore::open(data_dir).context(StoreSnafu)?),
            dataset: Arc::new(Dataset::open(data_dir, config.dataset.slots).context(StoreSnafu)?),
        };
        let cursors =
            Arc::new(CursorStore::open(data_dir.join(SYNC_DIR_NAME).join(CURSOR_DB_FILE_NAME)).context(CursorSnafu)?);

        let service = Arc::new(StorageService {
            replica: replica.clone(),
            readonly: config.node.readonly,
            uploads: AtomicU64::new(0),
            downloads: AtomicU64::new(0),
            uploaded_bytes: AtomicU64::new(0),
        });
        let server =
            RpcServer::bind(&config.node.bind_addr, config.secrets(), service.clone()).await.context(RpcSnafu)?;
        let local_addr = server.local_addr().context(RpcSnafu)?;

        let mut instance = Instance::new(id, Role::Storage, config.advertised_addr(local_addr)?)
            .with_readonly(config.node.readonly);
        instance.attributes.group = config.node.group.clone();
        instance.attributes.http_endpoint = config.node.http_endpoint.clone();

        let pool = Arc::new(ConnectionPool::new(RpcConnector::new(config.node.secret.clone()), config.pool_config()));
        let trackers = Arc::new(TrackerClient::new(config.tracker_addrs()?, pool.clone()));
        let membership = Arc::new(TrackerMembership::new());
        let synchronizer = Arc::new(BinlogSynchronizer::new(
            replica.clone(),
            cursors,
            Arc::new(PooledPeerTransport::new(pool)),
            membership.clone(),
            config.sync_config(),
        ));

        let cancel = CancellationToken::new();
        let mut tasks = vec![tokio::spawn(server.run(cancel.child_token()))];

        let heartbeat_interval = Duration::from_millis(config.heartbeat.interval_ms);
        let registration = RetryPolicy::capped(Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS), heartbeat_interval)
            .with_max_attempts(INITIAL_REGISTRATION_ATTEMPTS);
        let heartbeat = Heartbeat {
            instance: instance.clone(),
            service: service.clone(),
            trackers,
            membership: membership.clone(),
        };
        if let Err(e) = heartbeat.register(registration).await {
            cancel.cancel();
            for task in tasks {
                if let Err(join) = task.await {
                    warn!(error = %join, "task failed while aborting start");
                }
            }
            return Err(e);
        }

        tasks.push(tokio::spawn(heartbeat.run(heartbeat_interval, cancel.child_token())));
        tasks.push(synchronizer.spawn());
        info!(
            instance_id = %id,
            addr = %local_addr,
            server = %instance.server,
            group = instance.group().unwrap_or("-"),
            "storage node started"
        );

        Ok(Self {
            instance,
            replica,
            service,
            synchronizer,
            membership,
            local_addr,
            cancel,
            tasks,
        })
    }

    /// The instance announced to trackers.
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Announced RPC endpoint.
    pub fn server(&self) -> &ServerAddr {
        &self.instance.server
    }

    /// Local binlog, content store and dataset.
    pub fn replica(&self) -> &LocalReplica {
        &self.replica
    }

    /// The replication engine.
    pub fn synchronizer(&self) -> &Arc<BinlogSynchronizer> {
        &self.synchronizer
    }

    /// Group members as last reported by the trackers.
    pub fn membership(&self) -> Vec<Instance> {
        self.membership.snapshot()
    }

    /// Load statistics sent with heartbeats.
    pub fn statistics(&self) -> InstanceStatistics {
        self.service.statistics()
    }

    /// Stop heartbeats, replication and the listener.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.synchronizer.shutdown().await;
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "storage task failed");
            }
        }
        info!(instance_id = %self.instance.id, "storage node stopped");
    }
}

/// Periodic registration with every tracker.
struct Heartbeat {
    instance: Instance,
    service: Arc<StorageService>,
    trackers: Arc<TrackerClient<RpcConnector>>,
    membership: Arc<TrackerMembership>,
}

impl Heartbeat {
    /// One round. Feeds the membership view from the answers.
    async fn beat(&self) -> Result<usize, godfs_client::ClientError> {
        let request = HeartbeatRequest {
            instance: self.instance.clone(),
            statistics: self.service.statistics(),
        };
        let answers = self.trackers.heartbeat_all(&request).await?;
        for (tracker, HeartbeatResponse { is_new, .. }) in &answers {
            if *is_new {
                info!(tracker = %tracker, instance_id = %self.instance.id, "registered with tracker");
            }
        }
        let count = answers.len();
        self.membership.update(answers.into_iter().map(|(tracker, response)| (tracker, response.peers)));
        Ok(count)
    }

    async fn register(&self, policy: RetryPolicy) -> Result<(), NodeError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.beat().await {
                Ok(_) => return Ok(()),
                Err(e) if policy.allows_attempt(attempts) => {
                    let delay = policy.delay_for(attempts);
                    warn!(error = %e, attempts, delay_ms = delay.as_millis() as u64, "initial registration failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(error = %e, attempts, "initial registration failed");
                    return Err(NodeError::Registration { attempts });
                }
            }
        }
    }

    async fn run(self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; registration just happened.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.beat().await {
                        Ok(count) => debug!(trackers = count, "heartbeat round done"),
                        Err(e) => warn!(error = %e, "heartbeat round failed"),
                    }
                }
            }
        }
        debug!("heartbeat loop stopped");
    }
}

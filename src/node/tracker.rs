//! Tracker node: the membership authority.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use godfs_constants::network::MAX_QUERY_INSTANCES;
use godfs_rpc::HeartbeatRequest;
use godfs_rpc::HeartbeatResponse;
use godfs_rpc::RpcHandler;
use godfs_rpc::RpcRequest;
use godfs_rpc::RpcResponse;
use godfs_rpc::RpcServer;
use godfs_rpc::Session;
use godfs_tracker::InstanceRegistry;
use godfs_types::InstanceId;
use snafu::ResultExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::ensure_data_dir;
use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::error::RpcSnafu;
use crate::identity::load_or_create_instance_id;

/// Answers heartbeats and membership queries from the registry.
struct TrackerService {
    registry: Arc<InstanceRegistry>,
}

impl TrackerService {
    fn heartbeat(&self, request: HeartbeatRequest, session: &mut Session) -> RpcResponse {
        let HeartbeatRequest { instance, statistics } = request;
        let id = instance.id;
        let group = instance.group().map(str::to_string);
        match self.registry.register(instance, statistics) {
            Ok(outcome) => {
                session.note_instance(id);
                let peers = group.map(|g| self.registry.group_members(&g)).unwrap_or_default();
                RpcResponse::Heartbeat(HeartbeatResponse {
                    is_new: outcome.is_new,
                    peers,
                    ttl_ms: self.registry.config().ttl().as_millis() as u64,
                })
            }
            Err(e) => {
                warn!(instance = %id, error = %e, "registration refused");
                RpcResponse::error(e)
            }
        }
    }
}

#[async_trait]
impl RpcHandler for TrackerService {
    async fn handle(&self, request: RpcRequest, session: &mut Session) -> RpcResponse {
        match request {
            RpcRequest::Heartbeat(heartbeat) => self.heartbeat(heartbeat, session),
            RpcRequest::QueryInstances {
                role,
                group,
                uploadable_only,
            } => {
                let mut instances = if uploadable_only {
                    self.registry.filter_uploadable_instances()
                } else {
                    self.registry.filter_instances(role)
                };
                if let Some(group) = group {
                    instances.retain(|instance| instance.group() == Some(group.as_str()));
                }
                instances.truncate(MAX_QUERY_INSTANCES as usize);
                RpcResponse::Instances(instances)
            }
            other => RpcResponse::error(format!("{} is not served by a tracker", other.kind())),
        }
    }

    async fn on_disconnect(&self, session: &Session) {
        for id in session.instances() {
            if self.registry.future_expire(id) {
                debug!(instance = %id, peer = %session.peer_addr, "heartbeat connection closed");
            }
        }
    }
}

/// A running tracker.
pub struct TrackerNode {
    id: InstanceId,
    registry: Arc<InstanceRegistry>,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for TrackerNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerNode")
            .field("id", &self.id)
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl TrackerNode {
    /// Bind the listener and start the expiry sweeper.
    pub async fn start(config: &NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;
        ensure_data_dir(&config.node.data_dir)?;
        let id = load_or_create_instance_id(&config.node.data_dir)?;

        let registry = Arc::new(InstanceRegistry::new(config.registry_config()));
        let service = Arc::new(TrackerService {
            registry: registry.clone(),
        });
        let server = RpcServer::bind(&config.node.bind_addr, config.secrets(), service).await.context(RpcSnafu)?;
        let local_addr = server.local_addr().context(RpcSnafu)?;

        let cancel = CancellationToken::new();
        let tasks = vec![
            registry.clone().spawn_sweeper(cancel.child_token()),
            tokio::spawn(server.run(cancel.child_token())),
        ];
        info!(instance_id = %id, addr = %local_addr, ttl_ms = registry.config().ttl().as_millis() as u64, "tracker started");

        Ok(Self {
            id,
            registry,
            local_addr,
            cancel,
            tasks,
        })
    }

    /// This tracker's id.
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// The live registry.
    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the listener and the sweeper.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "tracker task failed");
            }
        }
        info!(instance_id = %self.id, "tracker stopped");
    }
}

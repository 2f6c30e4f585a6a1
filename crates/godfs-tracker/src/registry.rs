//! The registry map and its sweeper.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use godfs_constants::tracker::DEFAULT_HEARTBEAT_INTERVAL_MS;
use godfs_constants::tracker::DEFAULT_MISSED_HEARTBEATS;
use godfs_constants::tracker::DEFAULT_SWEEP_INTERVAL_MS;
use godfs_constants::tracker::MAX_INSTANCE_ATTRIBUTES;
use godfs_constants::tracker::MAX_REGISTERED_INSTANCES;
use godfs_types::Instance;
use godfs_types::InstanceId;
use godfs_types::InstanceStatistics;
use godfs_types::Role;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

use crate::error::RegistryError;
use crate::verified;

/// Registry timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Expected interval between heartbeats of one instance.
    pub heartbeat_interval: Duration,
    /// Heartbeat rounds an instance may miss before it expires.
    pub missed_heartbeats: u32,
    /// Interval of the background sweep.
    pub sweep_interval: Duration,
}

impl RegistryConfig {
    /// Time an instance stays registered without renewal.
    pub fn ttl(&self) -> Duration {
        verified::compute_ttl(self.heartbeat_interval, self.missed_heartbeats)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            missed_heartbeats: DEFAULT_MISSED_HEARTBEATS,
            sweep_interval: Duration::from_millis(DEFAULT_SWEEP_INTERVAL_MS),
        }
    }
}

/// One registry entry.
#[derive(Debug, Clone)]
pub struct RegisteredInstance {
    /// What the instance last announced.
    pub instance: Instance,
    /// Load it last reported.
    pub statistics: InstanceStatistics,
    /// First registration with this tracker.
    pub registered_at: Instant,
    /// Most recent heartbeat.
    pub last_heartbeat: Instant,
    /// The entry is removed by the first sweep at or after this instant.
    pub expires_at: Instant,
}

/// Result of a registration or heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterOutcome {
    /// True if the instance was not registered before.
    pub is_new: bool,
    /// New expiry deadline.
    pub expires_at: Instant,
}

/// Authoritative, TTL-bounded view of live instances for one tracker.
///
/// All mutation happens under one lock that is never held across an await.
/// Read operations return snapshots; callers must tolerate that an instance
/// may expire right after a snapshot was taken.
pub struct InstanceRegistry {
    config: RegistryConfig,
    entries: Mutex<BTreeMap<InstanceId, RegisteredInstance>>,
}

impl InstanceRegistry {
    /// Create an empty registry.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Registry timing.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Insert or refresh an instance; its expiry becomes now + TTL.
    pub fn register(
        &self,
        instance: Instance,
        statistics: InstanceStatistics,
    ) -> Result<RegisterOutcome, RegistryError> {
        let extra = instance.attributes.extra.len();
        if extra > MAX_INSTANCE_ATTRIBUTES as usize {
            return Err(RegistryError::TooManyAttributes {
                count: extra,
                max: MAX_INSTANCE_ATTRIBUTES,
            });
        }

        let now = Instant::now();
        let expires_at = verified::compute_deadline(now, self.config.ttl());
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(&instance.id) {
            if entry.instance != instance {
                info!(instance = %instance.id, server = %instance.server, "instance updated its announcement");
            }
            entry.instance = instance;
            entry.statistics = statistics;
            entry.last_heartbeat = now;
            entry.expires_at = expires_at;
            return Ok(RegisterOutcome {
                is_new: false,
                expires_at,
            });
        }

        if entries.len() >= MAX_REGISTERED_INSTANCES as usize {
            return Err(RegistryError::CapacityExceeded {
                max: MAX_REGISTERED_INSTANCES,
            });
        }

        info!(
            instance = %instance.id,
            role = %instance.role,
            server = %instance.server,
            group = instance.group().unwrap_or("-"),
            "instance registered"
        );
        entries.insert(instance.id, RegisteredInstance {
            instance,
            statistics,
            registered_at: now,
            last_heartbeat: now,
            expires_at,
        });
        Ok(RegisterOutcome {
            is_new: true,
            expires_at,
        })
    }

    /// Pull an instance's expiry in to one heartbeat interval from now.
    ///
    /// Used when the connection carrying its heartbeats drops: a quick
    /// reconnect keeps the entry, silence lets it lapse soon. Returns false if
    /// the instance is not registered.
    pub fn future_expire(&self, id: &InstanceId) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(id) else {
            return false;
        };
        entry.expires_at = verified::shortened_deadline(entry.expires_at, now, self.config.heartbeat_interval);
        debug!(instance = %id, "instance expiry shortened after disconnect");
        true
    }

    /// Remove every entry whose deadline has passed. Returns what was removed.
    pub fn sweep(&self) -> Vec<Instance> {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.entries.lock().retain(|_, entry| {
            if verified::is_expired(entry.expires_at, now) {
                expired.push(entry.instance.clone());
                false
            } else {
                true
            }
        });
        for instance in &expired {
            info!(instance = %instance.id, role = %instance.role, server = %instance.server, "instance expired");
        }
        expired
    }

    /// Administrative removal.
    pub fn remove(&self, id: &InstanceId) -> Option<Instance> {
        let removed = self.entries.lock().remove(id).map(|entry| entry.instance);
        if removed.is_some() {
            info!(instance = %id, "instance removed");
        }
        removed
    }

    /// Snapshot of instances with `role`.
    pub fn filter_instances(&self, role: Role) -> Vec<Instance> {
        self.collect(|instance| instance.role == role)
    }

    /// Snapshot of storage instances that accept uploads.
    pub fn filter_uploadable_instances(&self) -> Vec<Instance> {
        self.collect(Instance::is_uploadable)
    }

    /// Snapshot of storage instances in `group`.
    pub fn group_members(&self, group: &str) -> Vec<Instance> {
        self.collect(|instance| instance.is_storage_in_group(group))
    }

    /// A single entry.
    pub fn get(&self, id: &InstanceId) -> Option<RegisteredInstance> {
        self.entries.lock().get(id).cloned()
    }

    /// Number of registered instances.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no instance is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run [`sweep`](Self::sweep) every sweep interval until `cancel` fires.
    pub fn spawn_sweeper(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let period = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(interval_ms = period.as_millis() as u64, "registry sweeper started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let expired = self.sweep();
                        if !expired.is_empty() {
                            debug!(expired = expired.len(), remaining = self.len(), "registry sweep");
                        }
                    }
                }
            }
            debug!("registry sweeper stopped");
        })
    }

    fn collect(&self, keep: impl Fn(&Instance) -> bool) -> Vec<Instance> {
        self.entries.lock().values().map(|entry| &entry.instance).filter(|i| keep(*i)).cloned().collect()
    }
}

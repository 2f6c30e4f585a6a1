//! Node configuration.
//!
//! Loaded in layers, lowest precedence first:
//! 1. Defaults
//! 2. TOML configuration file
//! 3. Environment variables (`GODFS_*`)
//! 4. Command-line arguments (applied by the binary)

use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use godfs_binlog::BinlogConfig;
use godfs_client::ExhaustionPolicy;
use godfs_client::PoolConfig;
use godfs_constants::network::MAX_CONNECTIONS_PER_SERVER;
use godfs_constants::store::MAX_DATASET_SLOTS;
use godfs_constants::tracker::MAX_HEARTBEAT_INTERVAL_MS;
use godfs_constants::tracker::MAX_MISSED_HEARTBEATS;
use godfs_sync::SyncConfig;
use godfs_tracker::RegistryConfig;
use godfs_types::RetryPolicy;
use godfs_types::Role;
use godfs_types::ServerAddr;
use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;
use snafu::Snafu;

/// Default values for configuration.
mod defaults {
    use std::path::PathBuf;

    use godfs_constants::binlog::MAX_BINLOG_RECORDS_PER_SEGMENT;
    use godfs_constants::network::DEFAULT_MAX_CONNECTIONS_PER_SERVER;
    use godfs_constants::network::DEFAULT_POOL_ACQUIRE_TIMEOUT_MS;
    use godfs_constants::store::DEFAULT_DATASET_SLOTS;
    use godfs_constants::sync::DEFAULT_RETRY_BASE_DELAY_MS;
    use godfs_constants::sync::DEFAULT_RETRY_MAX_DELAY_MS;
    use godfs_constants::sync::DEFAULT_SYNC_BATCH_SIZE;
    use godfs_constants::sync::DEFAULT_SYNC_TICK_INTERVAL_MS;
    use godfs_constants::sync::DEFAULT_WATCH_REFRESH_INTERVAL_MS;
    use godfs_constants::tracker::DEFAULT_HEARTBEAT_INTERVAL_MS;
    use godfs_constants::tracker::DEFAULT_MISSED_HEARTBEATS;
    use godfs_constants::tracker::DEFAULT_SWEEP_INTERVAL_MS;
    use godfs_types::Role;

    pub fn role() -> Role { Role::Storage }
    pub fn data_dir() -> PathBuf { "./data".into() }
    pub fn bind_addr() -> String { "0.0.0.0:23000".to_string() }
    pub fn log_filter() -> String { "info".to_string() }

    pub fn heartbeat_interval_ms() -> u64 { DEFAULT_HEARTBEAT_INTERVAL_MS }
    pub fn missed_heartbeats() -> u32 { DEFAULT_MISSED_HEARTBEATS }
    pub fn sweep_interval_ms() -> u64 { DEFAULT_SWEEP_INTERVAL_MS }

    pub fn batch_size() -> u32 { DEFAULT_SYNC_BATCH_SIZE }
    pub fn tick_interval_ms() -> u64 { DEFAULT_SYNC_TICK_INTERVAL_MS }
    pub fn watch_refresh_interval_ms() -> u64 { DEFAULT_WATCH_REFRESH_INTERVAL_MS }
    pub fn retry_base_delay_ms() -> u64 { DEFAULT_RETRY_BASE_DELAY_MS }
    pub fn retry_max_delay_ms() -> u64 { DEFAULT_RETRY_MAX_DELAY_MS }

    pub fn max_connections_per_server() -> u32 { DEFAULT_MAX_CONNECTIONS_PER_SERVER }
    pub fn acquire_timeout_ms() -> u64 { DEFAULT_POOL_ACQUIRE_TIMEOUT_MS }

    pub fn max_records_per_segment() -> u32 { MAX_BINLOG_RECORDS_PER_SEGMENT }

    pub fn dataset_slots() -> u32 { DEFAULT_DATASET_SLOTS }
}

/// Full node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identity, addresses and cluster membership.
    #[serde(default)]
    pub node: NodeSection,
    /// Heartbeat and TTL timing.
    #[serde(default)]
    pub heartbeat: HeartbeatSection,
    /// Binlog synchronizer tuning.
    #[serde(default)]
    pub sync: SyncSection,
    /// Outbound connection pool.
    #[serde(default)]
    pub pool: PoolSection,
    /// Binlog segment sizing.
    #[serde(default)]
    pub binlog: BinlogSection,
    /// Dataset index sizing.
    #[serde(default)]
    pub dataset: DatasetSection,
}

/// `[node]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// Tracker or storage.
    #[serde(default = "defaults::role")]
    pub role: Role,
    /// Root of all persistent state.
    #[serde(default = "defaults::data_dir")]
    pub data_dir: PathBuf,
    /// RPC listen address.
    #[serde(default = "defaults::bind_addr")]
    pub bind_addr: String,
    /// Address announced to the tracker. Defaults to the bound address.
    #[serde(default)]
    pub advertise_addr: Option<String>,
    /// Cluster secret presented on every connection.
    #[serde(default)]
    pub secret: String,
    /// Secrets still accepted while a rotation is rolling out.
    #[serde(default)]
    pub previous_secrets: Vec<String>,
    /// Replication group of a storage node.
    #[serde(default)]
    pub group: Option<String>,
    /// A readonly storage node takes no uploads.
    #[serde(default)]
    pub readonly: bool,
    /// Direct download endpoint announced to the tracker.
    #[serde(default)]
    pub http_endpoint: Option<String>,
    /// Trackers a storage node heartbeats, as `host:port`.
    #[serde(default)]
    pub trackers: Vec<String>,
    /// Tracing filter used when `RUST_LOG` is unset.
    #[serde(default = "defaults::log_filter")]
    pub log_filter: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            role: defaults::role(),
            data_dir: defaults::data_dir(),
            bind_addr: defaults::bind_addr(),
            advertise_addr: None,
            secret: String::new(),
            previous_secrets: Vec::new(),
            group: None,
            readonly: false,
            http_endpoint: None,
            trackers: Vec::new(),
            log_filter: defaults::log_filter(),
        }
    }
}

/// `[heartbeat]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatSection {
    /// Interval between heartbeats.
    #[serde(default = "defaults::heartbeat_interval_ms")]
    pub interval_ms: u64,
    /// Heartbeat rounds a tracker tolerates missing before expiry.
    #[serde(default = "defaults::missed_heartbeats")]
    pub missed_heartbeats: u32,
    /// Interval between tracker expiry sweeps.
    #[serde(default = "defaults::sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            interval_ms: defaults::heartbeat_interval_ms(),
            missed_heartbeats: defaults::missed_heartbeats(),
            sweep_interval_ms: defaults::sweep_interval_ms(),
        }
    }
}

/// `[sync]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSection {
    /// Records fetched per tick.
    #[serde(default = "defaults::batch_size")]
    pub batch_size: u32,
    /// Pause between ticks when caught up.
    #[serde(default = "defaults::tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Interval between watch set refreshes.
    #[serde(default = "defaults::watch_refresh_interval_ms")]
    pub watch_refresh_interval_ms: u64,
    /// First backoff delay after a failed tick.
    #[serde(default = "defaults::retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Backoff ceiling.
    #[serde(default = "defaults::retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Consecutive failed ticks before a peer watch gives up. Unset retries
    /// forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            batch_size: defaults::batch_size(),
            tick_interval_ms: defaults::tick_interval_ms(),
            watch_refresh_interval_ms: defaults::watch_refresh_interval_ms(),
            retry_base_delay_ms: defaults::retry_base_delay_ms(),
            retry_max_delay_ms: defaults::retry_max_delay_ms(),
            max_attempts: None,
        }
    }
}

/// What to do when a server's connection pool is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionMode {
    /// Wait up to `acquire_timeout_ms`.
    #[default]
    Block,
    /// Fail immediately.
    FailFast,
}

/// `[pool]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSection {
    /// Cap on open connections per server.
    #[serde(default = "defaults::max_connections_per_server")]
    pub max_connections_per_server: u32,
    /// Behavior at the cap.
    #[serde(default)]
    pub exhaustion: ExhaustionMode,
    /// Longest wait for a connection under [`ExhaustionMode::Block`].
    #[serde(default = "defaults::acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            max_connections_per_server: defaults::max_connections_per_server(),
            exhaustion: ExhaustionMode::default(),
            acquire_timeout_ms: defaults::acquire_timeout_ms(),
        }
    }
}

/// `[binlog]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinlogSection {
    /// Records per segment before rotation.
    #[serde(default = "defaults::max_records_per_segment")]
    pub max_records_per_segment: u32,
}

impl Default for BinlogSection {
    fn default() -> Self {
        Self {
            max_records_per_segment: defaults::max_records_per_segment(),
        }
    }
}

/// `[dataset]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSection {
    /// Slot count of a newly created index. An existing index keeps its size.
    #[serde(default = "defaults::dataset_slots")]
    pub slots: u32,
}

impl Default for DatasetSection {
    fn default() -> Self {
        Self {
            slots: defaults::dataset_slots(),
        }
    }
}

impl NodeConfig {
    /// Load from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        toml::from_str(&content).context(ParseTomlSnafu { path })
    }

    /// Defaults, overlaid with `path` if given, then with the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from `GODFS_*` variables resolved through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(value) = lookup("GODFS_ROLE") {
            self.node.role = value.parse().map_err(|_| ConfigError::InvalidValue {
                key: "GODFS_ROLE".to_string(),
                value: value.clone(),
                reason: "expected tracker or storage".to_string(),
            })?;
        }
        if let Some(value) = lookup("GODFS_DATA_DIR") {
            self.node.data_dir = value.into();
        }
        if let Some(value) = lookup("GODFS_BIND_ADDR") {
            self.node.bind_addr = value;
        }
        if let Some(value) = lookup("GODFS_ADVERTISE_ADDR") {
            self.node.advertise_addr = Some(value);
        }
        if let Some(value) = lookup("GODFS_SECRET") {
            self.node.secret = value;
        }
        if let Some(value) = lookup("GODFS_GROUP") {
            self.node.group = Some(value);
        }
        if let Some(value) = lookup("GODFS_TRACKERS") {
            self.node.trackers = split_list(&value);
        }
        Ok(())
    }

    /// Check the configuration before anything starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.secret.is_empty() {
            return invalid("node.secret must be set");
        }
        if self.node.bind_addr.parse::<SocketAddr>().is_err() {
            return invalid(format!("node.bind_addr '{}' is not a socket address", self.node.bind_addr));
        }
        if let Some(addr) = &self.node.advertise_addr
            && addr.parse::<ServerAddr>().is_err()
        {
            return invalid(format!("node.advertise_addr '{addr}' is not host:port"));
        }
        self.tracker_addrs()?;

        if self.heartbeat.interval_ms == 0 {
            return invalid("heartbeat.interval_ms must be non-zero");
        }
        if self.heartbeat.interval_ms > MAX_HEARTBEAT_INTERVAL_MS {
            return invalid(format!("heartbeat.interval_ms must be at most {MAX_HEARTBEAT_INTERVAL_MS}"));
        }
        if self.heartbeat.missed_heartbeats > MAX_MISSED_HEARTBEATS {
            return invalid(format!("heartbeat.missed_heartbeats must be at most {MAX_MISSED_HEARTBEATS}"));
        }
        if self.heartbeat.sweep_interval_ms == 0 {
            return invalid("heartbeat.sweep_interval_ms must be non-zero");
        }
        // The sweep must run at least once per TTL or expiry lags.
        if self.heartbeat.sweep_interval_ms > self.registry_config().ttl().as_millis() as u64 {
            return invalid("heartbeat.sweep_interval_ms must not exceed the instance ttl");
        }

        if self.sync.batch_size == 0 {
            return invalid("sync.batch_size must be non-zero");
        }
        if self.sync.tick_interval_ms == 0 || self.sync.watch_refresh_interval_ms == 0 {
            return invalid("sync intervals must be non-zero");
        }
        if self.pool.max_connections_per_server == 0 || self.pool.max_connections_per_server > MAX_CONNECTIONS_PER_SERVER
        {
            return invalid(format!("pool.max_connections_per_server must be in 1..={MAX_CONNECTIONS_PER_SERVER}"));
        }
        if self.binlog.max_records_per_segment == 0 {
            return invalid("binlog.max_records_per_segment must be non-zero");
        }
        if self.dataset.slots == 0 || self.dataset.slots > MAX_DATASET_SLOTS {
            return invalid(format!("dataset.slots must be in 1..={MAX_DATASET_SLOTS}"));
        }

        if self.node.role == Role::Storage {
            if self.node.group.as_deref().is_none_or(str::is_empty) {
                return invalid("storage nodes need node.group");
            }
            if self.node.trackers.is_empty() {
                return invalid("storage nodes need at least one tracker");
            }
        }
        if self.node.role == Role::Client {
            return invalid("node.role must be tracker or storage");
        }
        Ok(())
    }

    /// Parsed tracker addresses.
    pub fn tracker_addrs(&self) -> Result<Vec<ServerAddr>, ConfigError> {
        self.node
            .trackers
            .iter()
            .map(|value| {
                value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "node.trackers".to_string(),
                    value: value.clone(),
                    reason: "expected host:port".to_string(),
                })
            })
            .collect()
    }

    /// Address announced to others, given the address actually bound.
    ///
    /// An unspecified bind address without `advertise_addr` announces
    /// loopback.
    pub fn advertised_addr(&self, bound: SocketAddr) -> Result<ServerAddr, ConfigError> {
        if let Some(value) = &self.node.advertise_addr {
            return value.parse().map_err(|_| ConfigError::InvalidValue {
                key: "node.advertise_addr".to_string(),
                value: value.clone(),
                reason: "expected host:port".to_string(),
            });
        }
        if bound.ip().is_unspecified() {
            return Ok(ServerAddr::new("127.0.0.1", bound.port()));
        }
        Ok(ServerAddr::from(bound))
    }

    /// Accepted secrets, current first.
    pub fn secrets(&self) -> Vec<String> {
        let mut secrets = vec![self.node.secret.clone()];
        secrets.extend(self.node.previous_secrets.iter().filter(|s| !s.is_empty()).cloned());
        secrets
    }

    /// Tracker registry timing.
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            heartbeat_interval: Duration::from_millis(self.heartbeat.interval_ms),
            missed_heartbeats: self.heartbeat.missed_heartbeats,
            sweep_interval: Duration::from_millis(self.heartbeat.sweep_interval_ms),
        }
    }

    /// Synchronizer tuning.
    pub fn sync_config(&self) -> SyncConfig {
        let mut retry = RetryPolicy::capped(
            Duration::from_millis(self.sync.retry_base_delay_ms),
            Duration::from_millis(self.sync.retry_max_delay_ms),
        );
        if let Some(attempts) = self.sync.max_attempts {
            retry = retry.with_max_attempts(attempts);
        }
        SyncConfig {
            batch_size: self.sync.batch_size,
            tick_interval: Duration::from_millis(self.sync.tick_interval_ms),
            watch_refresh_interval: Duration::from_millis(self.sync.watch_refresh_interval_ms),
            retry,
        }
    }

    /// Connection pool settings.
    pub fn pool_config(&self) -> PoolConfig {
        let exhaustion = match self.pool.exhaustion {
            ExhaustionMode::Block => ExhaustionPolicy::Block {
                timeout: Duration::from_millis(self.pool.acquire_timeout_ms),
            },
            ExhaustionMode::FailFast => ExhaustionPolicy::FailFast,
        };
        PoolConfig {
            max_connections_per_server: self.pool.max_connections_per_server,
            exhaustion,
        }
    }

    /// Binlog settings.
    pub fn binlog_config(&self) -> BinlogConfig {
        BinlogConfig {
            max_records_per_segment: self.binlog.max_records_per_segment,
        }
    }
}

fn invalid(message: impl Into<String>) -> Result<(), ConfigError> {
    Err(ConfigError::Validation {
        message: message.into(),
    })
}

fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

/// Configuration loading and validation errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// The config file could not be read.
    #[snafu(display("failed to read config file {}: {source}", path.display()))]
    ReadFile {
        /// The file.
        path: PathBuf,
        /// The I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`NodeConfig`].
    #[snafu(display("failed to parse TOML config file {}: {source}", path.display()))]
    ParseToml {
        /// The file.
        path: PathBuf,
        /// The parse error.
        source: toml::de::Error,
    },

    /// A single value could not be parsed.
    #[snafu(display("invalid value '{value}' for {key}: {reason}"))]
    InvalidValue {
        /// The setting.
        key: String,
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The configuration as a whole is unusable.
    #[snafu(display("configuration validation failed: {message}"))]
    Validation {
        /// What is wrong.
        message: String,
    },
}

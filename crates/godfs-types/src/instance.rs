//! Cluster participants.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::error::TypeError;
use crate::ids::InstanceId;

/// Role of a cluster participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Membership authority.
    Tracker,
    /// Content holder, member of a replication group.
    Storage,
    /// Uploads and downloads through storage nodes.
    Client,
}

impl Role {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tracker => "tracker",
            Self::Storage => "storage",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tracker" => Ok(Self::Tracker),
            "storage" => Ok(Self::Storage),
            "client" => Ok(Self::Client),
            _ => Err(TypeError::UnknownRole { value: s.to_string() }),
        }
    }
}

/// Network endpoint of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerAddr {
    /// Host name or IP address.
    pub host: String,
    /// TCP port of the RPC listener.
    pub port: u16,
}

impl ServerAddr {
    /// Create a new address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ServerAddr {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TypeError::InvalidServerAddr { value: s.to_string() };
        let (host, port) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Self::new(host, port))
    }
}

impl From<std::net::SocketAddr> for ServerAddr {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

/// Typed attributes an instance announces to the tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceAttributes {
    /// Replication group of a storage instance.
    pub group: Option<String>,
    /// A readonly storage instance serves downloads but takes no uploads.
    pub readonly: bool,
    /// HTTP endpoint for direct downloads, if any.
    pub http_endpoint: Option<String>,
    /// Free-form extra attributes.
    pub extra: BTreeMap<String, String>,
}

/// Load statistics reported with every heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatistics {
    /// Files held in the content store.
    pub file_count: u64,
    /// Bytes held in the content store.
    pub total_bytes: u64,
    /// Records in the local binlog.
    pub binlog_records: u64,
    /// Uploads accepted since start.
    pub uploads: u64,
    /// Downloads served since start.
    pub downloads: u64,
}

/// A participant in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Stable id, persisted locally at first boot.
    pub id: InstanceId,
    /// Role in the cluster.
    pub role: Role,
    /// RPC endpoint.
    pub server: ServerAddr,
    /// Announced attributes.
    pub attributes: InstanceAttributes,
}

impl Instance {
    /// Create an instance with default attributes.
    pub fn new(id: InstanceId, role: Role, server: ServerAddr) -> Self {
        Self {
            id,
            role,
            server,
            attributes: InstanceAttributes::default(),
        }
    }

    /// Set the replication group.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.attributes.group = Some(group.into());
        self
    }

    /// Set the readonly flag.
    pub fn with_readonly(mut self, readonly: bool) -> Self {
        self.attributes.readonly = readonly;
        self
    }

    /// The replication group, if any.
    pub fn group(&self) -> Option<&str> {
        self.attributes.group.as_deref()
    }

    /// True for storage instances that accept uploads.
    pub fn is_uploadable(&self) -> bool {
        self.role == Role::Storage && !self.attributes.readonly
    }

    /// True for storage instances in `group`.
    pub fn is_storage_in_group(&self, group: &str) -> bool {
        self.role == Role::Storage && self.group() == Some(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(id: &str) -> Instance {
        Instance::new(InstanceId::parse(id).unwrap(), Role::Storage, ServerAddr::new("127.0.0.1", 9000))
    }

    #[test]
    fn test_role_parse_roundtrip() {
        for role in [Role::Tracker, Role::Storage, Role::Client] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("leader".parse::<Role>().is_err());
    }

    #[test]
    fn test_server_addr_parse() {
        let addr: ServerAddr = "10.0.0.1:23000".parse().unwrap();
        assert_eq!(addr, ServerAddr::new("10.0.0.1", 23000));
        assert_eq!(addr.to_string(), "10.0.0.1:23000");
        assert!("10.0.0.1".parse::<ServerAddr>().is_err());
        assert!(":80".parse::<ServerAddr>().is_err());
        assert!("host:99999".parse::<ServerAddr>().is_err());
    }

    #[test]
    fn test_uploadable_requires_writable_storage() {
        assert!(storage("stor0001").is_uploadable());
        assert!(!storage("stor0001").with_readonly(true).is_uploadable());

        let mut tracker = storage("trak0001");
        tracker.role = Role::Tracker;
        assert!(!tracker.is_uploadable());
    }

    #[test]
    fn test_group_membership() {
        let inst = storage("stor0001").with_group("g1");
        assert!(inst.is_storage_in_group("g1"));
        assert!(!inst.is_storage_in_group("g2"));
        assert!(!storage("stor0002").is_storage_in_group("g1"));
    }
}

//! RPC message types.

use godfs_types::BinlogBatch;
use godfs_types::BinlogQuery;
use godfs_types::FileId;
use godfs_types::Instance;
use godfs_types::InstanceStatistics;
use godfs_types::Role;
use serde::Deserialize;
use serde::Serialize;

/// Registration or heartbeat from an instance to a tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// The announcing instance: id, role, server and attributes.
    pub instance: Instance,
    /// Current load.
    pub statistics: InstanceStatistics,
}

/// Tracker answer to a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    /// True on first registration with this tracker.
    pub is_new: bool,
    /// Live storage instances in the announcer's group, including itself.
    pub peers: Vec<Instance>,
    /// TTL the tracker applies to the announcer.
    pub ttl_ms: u64,
}

/// A request frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcRequest {
    /// Must be the first request on a connection.
    Authenticate {
        /// Shared cluster secret.
        secret: String,
    },
    /// Register or renew an instance (tracker).
    Heartbeat(HeartbeatRequest),
    /// Snapshot of registered instances (tracker).
    QueryInstances {
        /// Only instances with this role.
        role: Role,
        /// Only storage instances in this group.
        group: Option<String>,
        /// Only storage instances that accept uploads.
        uploadable_only: bool,
    },
    /// Read binlog records (storage).
    SyncBinlog(BinlogQuery),
    /// Content of a stored file (storage).
    FetchFile {
        /// The file to fetch.
        file_id: FileId,
    },
    /// Store new content (storage).
    Upload {
        /// File bytes.
        data: Vec<u8>,
    },
}

impl RpcRequest {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::Heartbeat(_) => "heartbeat",
            Self::QueryInstances { .. } => "query_instances",
            Self::SyncBinlog(_) => "sync_binlog",
            Self::FetchFile { .. } => "fetch_file",
            Self::Upload { .. } => "upload",
        }
    }
}

/// A response frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcResponse {
    /// The secret was accepted.
    Authenticated,
    /// The secret was rejected; the server closes the connection.
    AuthenticationFailed,
    /// Answer to [`RpcRequest::Heartbeat`].
    Heartbeat(HeartbeatResponse),
    /// Answer to [`RpcRequest::QueryInstances`].
    Instances(Vec<Instance>),
    /// Answer to [`RpcRequest::SyncBinlog`].
    Binlog(BinlogBatch),
    /// Answer to [`RpcRequest::FetchFile`].
    File {
        /// File bytes.
        data: Vec<u8>,
    },
    /// Answer to [`RpcRequest::Upload`].
    Uploaded {
        /// Address of the stored content.
        file_id: FileId,
        /// True if the content was already present.
        deduplicated: bool,
    },
    /// The requested file is not stored here.
    NotFound {
        /// The missing file.
        file_id: FileId,
    },
    /// The request is not served by this node or failed.
    Error {
        /// Human readable reason.
        message: String,
    },
    /// The server's own data is damaged: a binlog gap or a corrupt record.
    /// Retrying will not help.
    IntegrityFault {
        /// Human readable reason.
        message: String,
    },
}

impl RpcResponse {
    /// Error response from anything displayable.
    pub fn error(message: impl std::fmt::Display) -> Self {
        Self::Error {
            message: message.to_string(),
        }
    }

    /// Integrity fault response from anything displayable.
    pub fn integrity_fault(message: impl std::fmt::Display) -> Self {
        Self::IntegrityFault {
            message: message.to_string(),
        }
    }
}

//! Node error types.

use std::path::PathBuf;

use godfs_binlog::BinlogError;
use godfs_rpc::RpcError;
use godfs_store::StoreError;
use godfs_sync::CursorStoreError;
use godfs_types::TypeError;
use snafu::Snafu;

use crate::config::ConfigError;

/// Errors from starting or running a node.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum NodeError {
    /// The configuration is unusable.
    #[snafu(display("configuration: {source}"))]
    Config {
        /// The config error.
        source: ConfigError,
    },

    /// The instance id file could not be read or written.
    #[snafu(display("instance id file {}: {source}", path.display()))]
    IdentityIo {
        /// The id file.
        path: PathBuf,
        /// The I/O error.
        source: std::io::Error,
    },

    /// The instance id file holds garbage.
    #[snafu(display("instance id file {} is invalid: {source}", path.display()))]
    IdentityInvalid {
        /// The id file.
        path: PathBuf,
        /// The parse error.
        source: TypeError,
    },

    /// The data directory could not be created.
    #[snafu(display("failed to create data directory {}: {source}", path.display()))]
    DataDir {
        /// The directory.
        path: PathBuf,
        /// The I/O error.
        source: std::io::Error,
    },

    /// The binlog failed to open.
    #[snafu(display("binlog: {source}"))]
    Binlog {
        /// The binlog error.
        source: BinlogError,
    },

    /// The content store or dataset failed to open.
    #[snafu(display("store: {source}"))]
    Store {
        /// The store error.
        source: StoreError,
    },

    /// The sync cursor database failed to open.
    #[snafu(display("cursor store: {source}"))]
    Cursor {
        /// The cursor store error.
        source: CursorStoreError,
    },

    /// The RPC listener failed.
    #[snafu(display("rpc: {source}"))]
    Rpc {
        /// The RPC error.
        source: RpcError,
    },

    /// No tracker accepted the initial registration.
    #[snafu(display("no tracker server available after {attempts} registration attempts"))]
    Registration {
        /// Attempts made.
        attempts: u32,
    },
}

impl From<ConfigError> for NodeError {
    fn from(source: ConfigError) -> Self {
        Self::Config { source }
    }
}

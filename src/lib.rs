//! godfs node runtime.
//!
//! Wires the replication core crates into runnable nodes:
//!
//! - [`TrackerNode`]: instance registry behind an RPC listener, with the expiry
//!   sweeper running in the background.
//! - [`StorageNode`]: binlog, content store and dataset behind an RPC
//!   listener, a heartbeat loop feeding the membership view, and the binlog
//!   synchronizer replicating the group.
//!
//! Configuration is layered (defaults, TOML, environment, CLI) in [`config`].

pub mod adapters;
pub mod config;
pub mod error;
pub mod identity;
pub mod node;

pub use config::ConfigError;
pub use config::NodeConfig;
pub use error::NodeError;
pub use node::StorageNode;
pub use node::TrackerNode;

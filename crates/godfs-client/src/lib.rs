//! Client side of godfs.
//!
//! - [`ConnectionPool`]: bounded, per-server pools of authenticated
//!   connections. Exhaustion blocks up to a timeout or fails fast.
//! - [`StorageSelector`]: least-used storage server selection with exclusion
//!   and retry across candidates.
//! - [`TrackerClient`]: heartbeats and membership queries with tracker
//!   failover.
//! - [`GodfsClient`]: upload and download on top of the three.

mod client;
mod connector;
mod error;
mod pool;
mod selector;
mod tracker_client;
pub mod verified;

pub use client::GodfsClient;
pub use connector::Connector;
pub use connector::RpcConnector;
pub use error::ClientError;
pub use pool::ConnectionPool;
pub use pool::ExhaustionPolicy;
pub use pool::PoolConfig;
pub use pool::PooledConnection;
pub use selector::Operation;
pub use selector::StorageSelector;
pub use tracker_client::TrackerClient;

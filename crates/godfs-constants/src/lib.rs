//! Centralized constants for the godfs file store.
//!
//! Every limit used by the binlog, the content store, the tracker registry,
//! the synchronizer and the client lives here, grouped by subsystem. Each
//! constant is bounded by a compile-time assertion in [`assertions`].
//!
//! # Modules
//!
//! - [`binlog`]: record layout, segment sizing, file naming
//! - [`store`]: content addressing and the dataset index
//! - [`tracker`]: heartbeat and TTL timing
//! - [`sync`]: synchronizer batching and backoff
//! - [`network`]: RPC framing, timeouts, connection pool bounds

mod assertions;
pub mod binlog;
pub mod network;
pub mod store;
pub mod sync;
pub mod tracker;

pub use binlog::BINLOG_RECORD_SIZE;
pub use binlog::MAX_BINLOG_RECORDS_PER_SEGMENT;
pub use network::MAX_RPC_FRAME_SIZE;
pub use store::FILE_ID_LEN;
pub use store::INSTANCE_ID_LEN;

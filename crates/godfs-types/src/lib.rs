//! Shared types for the godfs replication core.
//!
//! These types cross every crate boundary: the binlog encodes
//! [`BinlogRecord`]s, the tracker stores [`Instance`]s, the synchronizer
//! persists [`Cursor`]s and the RPC layer ships all of them.
//!
//! Entities are typed at compile time rather than carried around as maps of
//! loosely typed values: an instance's group and readonly flag are fields of
//! [`InstanceAttributes`], not string lookups.

mod binlog;
mod error;
mod ids;
mod instance;
mod retry;

pub use binlog::BinlogBatch;
pub use binlog::BinlogQuery;
pub use binlog::BinlogRecord;
pub use binlog::CURRENT_SEGMENT;
pub use binlog::Cursor;
pub use error::TypeError;
pub use ids::FileId;
pub use ids::InstanceId;
pub use instance::Instance;
pub use instance::InstanceAttributes;
pub use instance::InstanceStatistics;
pub use instance::Role;
pub use instance::ServerAddr;
pub use retry::RetryPolicy;

/// Current time as Unix milliseconds.
///
/// Returns 0 if the system clock is set before the epoch.
pub fn now_unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

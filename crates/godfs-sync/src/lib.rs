//! Binlog synchronizer.
//!
//! Every storage node pulls the binlog of each live peer in its group and
//! applies new records: fetch the content, store it through the content store,
//! append a local binlog record, add the id to the dataset. Progress against
//! each peer is a persisted [`Cursor`](godfs_types::Cursor) that only moves
//! past a batch once every record in it has been applied.
//!
//! ```text
//! per peer:  Unwatched -> Watching -> tick { fetch -> apply -> advance } -> ...
//!                             ^                                          |
//!                             +------------------------------------------+
//!            Watching -> Unwatched   (peer left the membership view)
//! ```
//!
//! Replication is at-least-once; the dataset makes re-application a no-op.

mod cursor_store;
mod error;
mod replica;
mod synchronizer;
mod traits;
pub mod verified;

pub use cursor_store::CursorStore;
pub use cursor_store::CursorStoreError;
pub use error::SyncError;
pub use replica::IngestOutcome;
pub use replica::LocalReplica;
pub use synchronizer::BinlogSynchronizer;
pub use synchronizer::PeerSyncStats;
pub use synchronizer::SyncConfig;
pub use synchronizer::TickOutcome;
pub use traits::MembershipView;
pub use traits::PeerTransport;

//! Append-only binlog of "file arrived" events.
//!
//! Every file a storage node durably holds gets a fixed 64-byte
//! [`BinlogRecord`](godfs_types::BinlogRecord) appended here. Peers in the
//! same group pull the log incrementally and use it as their change feed.
//!
//! ## Layout
//!
//! ```text
//! <data_dir>/binlog/
//!     bin.000        records 0 .. max-1
//!     bin.001        records max .. 2*max-1
//!     ...
//!     binlog.map     3-byte record count per segment, at index * 3
//! ```
//!
//! ## Invariants
//!
//! - Records are appended and never edited in place.
//! - A write returns only after the record is flushed to disk.
//! - Segments are contiguous from `bin.000`; a gap is an integrity fault and
//!   surfaces as [`BinlogError::SegmentMissing`].
//! - Reads return records in append order.

mod error;
mod log;
mod map;
pub mod verified;

pub use error::BinlogError;
pub use log::Binlog;
pub use log::BinlogConfig;

//! Physical storage for godfs storage nodes.
//!
//! - [`ContentStore`]: deduplicating, content-addressed file entries with a
//!   trailing reference count.
//! - [`Dataset`]: persistent set of file ids already held locally, used as an
//!   idempotency guard during replication.
//!
//! ## On-disk layout
//!
//! ```text
//! <data_dir>/objects/<cc>/<dd>/<md5 hex>   content + 8-byte BE refcount
//! <data_dir>/tmp/                          staging for incoming content
//! <data_dir>/dataset/dataset.idx           fixed-slot hash index
//! <data_dir>/dataset/dataset.log           overflow log
//! ```

mod content;
mod dataset;
mod error;
mod locks;
pub mod verified;

pub use content::ContentStore;
pub use content::PutOutcome;
pub use dataset::Dataset;
pub use error::StoreError;

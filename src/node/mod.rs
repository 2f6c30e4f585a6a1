//! Tracker and storage node runtimes.
//!
//! Each node binds an [`RpcServer`](godfs_rpc::RpcServer), spawns its
//! background tasks under one [`CancellationToken`](tokio_util::sync::CancellationToken)
//! and stops them all on `shutdown`.

mod storage;
mod tracker;

pub use storage::StorageNode;
pub use tracker::TrackerNode;

use std::path::Path;

use snafu::ResultExt;

use crate::error::DataDirSnafu;
use crate::error::NodeError;

fn ensure_data_dir(path: &Path) -> Result<(), NodeError> {
    std::fs::create_dir_all(path).context(DataDirSnafu { path })
}

//! Binlog synchronizer batching and backoff.

/// Default number of records requested per tick.
pub const DEFAULT_SYNC_BATCH_SIZE: u32 = 10;

/// Default delay between ticks of an idle peer watch.
pub const DEFAULT_SYNC_TICK_INTERVAL_MS: u64 = 1_000;

/// Default interval of the watch-set refresh.
pub const DEFAULT_WATCH_REFRESH_INTERVAL_MS: u64 = 5_000;

/// Base delay after a failed tick.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;

/// Cap on the delay between failed ticks.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;

/// Maximum peers watched at once.
pub const MAX_WATCHED_PEERS: u32 = 256;

/// Cursor database file name, relative to the sync directory.
pub const CURSOR_DB_FILE_NAME: &str = "cursors.redb";

/// Directory holding synchronizer state.
pub const SYNC_DIR_NAME: &str = "sync";

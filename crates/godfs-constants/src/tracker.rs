//! Tracker heartbeat and registry timing.

/// Default interval between storage heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;

/// Upper bound on the heartbeat interval (1 hour).
pub const MAX_HEARTBEAT_INTERVAL_MS: u64 = 3_600_000;

/// Heartbeat rounds an instance may miss before it expires.
pub const DEFAULT_MISSED_HEARTBEATS: u32 = 2;

/// Upper bound on tolerated missed heartbeats.
pub const MAX_MISSED_HEARTBEATS: u32 = 10;

/// Default interval of the expiry sweep.
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1_000;

/// Maximum number of live instances one tracker holds.
pub const MAX_REGISTERED_INSTANCES: u32 = 4_096;

/// Maximum attributes carried by one instance.
pub const MAX_INSTANCE_ATTRIBUTES: u32 = 64;

/// Attempts made for the initial registration with the trackers.
pub const INITIAL_REGISTRATION_ATTEMPTS: u32 = 5;

/// Heartbeat rounds a tracker's last peer report stays in a storage node's
/// membership view after that tracker stops answering.
pub const MEMBERSHIP_REPORT_MAX_AGE_ROUNDS: u64 = 3;

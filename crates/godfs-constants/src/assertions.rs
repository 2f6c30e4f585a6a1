//! Compile-time relationships between constants.

use super::binlog::*;
use super::network::*;
use super::store::*;
use super::sync::*;
use super::tracker::*;

// ============================================================================
// Binlog Record Layout
// ============================================================================

const _: () = assert!(
    RECORD_FILE_ID_WIDTH
        + RECORD_SOURCE_WIDTH
        + RECORD_FILE_LENGTH_WIDTH
        + RECORD_TIMESTAMP_WIDTH
        + RECORD_FLAG_WIDTH
        <= BINLOG_RECORD_SIZE
);
const _: () = assert!(RECORD_FILE_ID_WIDTH == FILE_ID_LEN);
const _: () = assert!(RECORD_SOURCE_WIDTH == INSTANCE_ID_LEN);

// Segment record counts must fit one map slot
const _: () = assert!(MAX_BINLOG_RECORDS_PER_SEGMENT > 0);
const _: () = assert!(MAX_BINLOG_RECORDS_PER_SEGMENT <= MAX_MAP_SLOT_VALUE);
const _: () = assert!(MAX_BINLOG_READ_BATCH > 0);

// ============================================================================
// Content Store
// ============================================================================

// cc/dd/ + 32 hex digits of MD5
const _: () = assert!(FILE_ID_LEN == SHARD_HEX_DIGITS + 2 + 32);
const _: () = assert!(REF_COUNT_TAIL_SIZE == 8);
const _: () = assert!(MAX_FILE_SIZE > 0);
const _: () = assert!(DEFAULT_DATASET_SLOTS > 0);
const _: () = assert!(DEFAULT_DATASET_SLOTS <= MAX_DATASET_SLOTS);
const _: () = assert!(DATASET_MAX_PROBES > 0);

// ============================================================================
// Tracker Timing
// ============================================================================

const _: () = assert!(DEFAULT_HEARTBEAT_INTERVAL_MS > 0);
const _: () = assert!(DEFAULT_HEARTBEAT_INTERVAL_MS <= MAX_HEARTBEAT_INTERVAL_MS);
// Longest possible TTL stays far from Instant overflow
const _: () = assert!(MAX_HEARTBEAT_INTERVAL_MS * (MAX_MISSED_HEARTBEATS as u64 + 1) <= 86_400_000);
const _: () = assert!(DEFAULT_SWEEP_INTERVAL_MS > 0);
const _: () = assert!(DEFAULT_SWEEP_INTERVAL_MS <= DEFAULT_HEARTBEAT_INTERVAL_MS);
const _: () = assert!(DEFAULT_MISSED_HEARTBEATS >= 1);
const _: () = assert!(DEFAULT_MISSED_HEARTBEATS <= MAX_MISSED_HEARTBEATS);
const _: () = assert!(INITIAL_REGISTRATION_ATTEMPTS > 0);
const _: () = assert!(MEMBERSHIP_REPORT_MAX_AGE_ROUNDS > 0);

// ============================================================================
// Synchronizer
// ============================================================================

const _: () = assert!(DEFAULT_SYNC_BATCH_SIZE > 0);
const _: () = assert!(DEFAULT_SYNC_BATCH_SIZE <= MAX_BINLOG_READ_BATCH);
const _: () = assert!(DEFAULT_RETRY_BASE_DELAY_MS > 0);
const _: () = assert!(DEFAULT_RETRY_BASE_DELAY_MS <= DEFAULT_RETRY_MAX_DELAY_MS);
const _: () = assert!(MAX_WATCHED_PEERS > 0);

// ============================================================================
// Network
// ============================================================================

const _: () = assert!((MAX_RPC_FRAME_SIZE as u64) > MAX_FILE_SIZE);
const _: () = assert!(CONNECT_TIMEOUT_MS < REQUEST_TIMEOUT_MS);
const _: () = assert!(DEFAULT_MAX_CONNECTIONS_PER_SERVER > 0);
const _: () = assert!(DEFAULT_MAX_CONNECTIONS_PER_SERVER <= MAX_CONNECTIONS_PER_SERVER);
const _: () = assert!(MAX_INBOUND_CONNECTIONS > 0);

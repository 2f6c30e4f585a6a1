//! RPC framing, timeouts and connection pool bounds.

/// Largest RPC frame accepted (file payload plus envelope).
pub const MAX_RPC_FRAME_SIZE: u32 = 1_073_741_824 + 64 * 1024;

/// Timeout for establishing a TCP connection.
pub const CONNECT_TIMEOUT_MS: u64 = 3_000;

/// Timeout for one request/response exchange.
pub const REQUEST_TIMEOUT_MS: u64 = 60_000;

/// Default cap on pooled connections per server.
pub const DEFAULT_MAX_CONNECTIONS_PER_SERVER: u32 = 16;

/// Upper bound on pooled connections per server.
pub const MAX_CONNECTIONS_PER_SERVER: u32 = 256;

/// Default wait for a pool slot when blocking is enabled.
pub const DEFAULT_POOL_ACQUIRE_TIMEOUT_MS: u64 = 5_000;

/// Maximum concurrent inbound connections one server handles.
pub const MAX_INBOUND_CONNECTIONS: u32 = 1_024;

/// Maximum instances returned by one query.
pub const MAX_QUERY_INSTANCES: u32 = 1_024;

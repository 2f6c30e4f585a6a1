//! Request/response protocol between godfs nodes.
//!
//! One protocol carries every logical RPC: registration and heartbeats to a
//! tracker, membership queries, binlog sync between storage peers, and file
//! upload/fetch. Each message is a frame of a 4-byte big-endian length followed
//! by a postcard payload.
//!
//! The first request on every connection must be
//! [`RpcRequest::Authenticate`]; the server closes connections that open with
//! anything else or present an unknown secret.

mod client;
mod error;
pub mod framing;
mod messages;
mod server;

pub use client::RpcConnection;
pub use error::RpcError;
pub use messages::HeartbeatRequest;
pub use messages::HeartbeatResponse;
pub use messages::RpcRequest;
pub use messages::RpcResponse;
pub use server::RpcHandler;
pub use server::RpcServer;
pub use server::Session;

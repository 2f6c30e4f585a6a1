//! RPC error types.

use snafu::Snafu;

/// Errors from the RPC layer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RpcError {
    /// TCP connect failed.
    #[snafu(display("failed to connect to {addr}: {source}"))]
    Connect {
        /// Target address.
        addr: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// TCP connect did not finish in time.
    #[snafu(display("connecting to {addr} timed out after {timeout_ms}ms"))]
    ConnectTimeout {
        /// Target address.
        addr: String,
        /// The bound that elapsed.
        timeout_ms: u64,
    },

    /// Listening socket could not be bound.
    #[snafu(display("failed to bind {addr}: {source}"))]
    Bind {
        /// Requested address.
        addr: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Reading or writing a frame failed.
    #[snafu(display("rpc i/o failed: {source}"))]
    Io {
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The peer closed the connection.
    #[snafu(display("connection closed by peer"))]
    ConnectionClosed,

    /// A request did not complete in time.
    #[snafu(display("{kind} request timed out after {timeout_ms}ms"))]
    RequestTimeout {
        /// Request kind.
        kind: &'static str,
        /// The bound that elapsed.
        timeout_ms: u64,
    },

    /// A frame exceeds the size bound.
    #[snafu(display("frame of {len} bytes exceeds the {max} byte limit"))]
    FrameTooLarge {
        /// Frame length.
        len: u64,
        /// The bound.
        max: u32,
    },

    /// A payload could not be encoded.
    #[snafu(display("failed to encode frame: {source}"))]
    Encode {
        /// The postcard error.
        source: postcard::Error,
    },

    /// A payload could not be decoded.
    #[snafu(display("failed to decode frame: {source}"))]
    Decode {
        /// The postcard error.
        source: postcard::Error,
    },

    /// The server rejected the secret.
    #[snafu(display("authentication failed"))]
    AuthenticationFailed,

    /// The server answered with the wrong response type.
    #[snafu(display("unexpected response to {kind}: {response}"))]
    UnexpectedResponse {
        /// Request kind.
        kind: &'static str,
        /// Debug rendering of what came back.
        response: String,
    },

    /// The server reported a failure.
    #[snafu(display("remote error: {message}"))]
    Remote {
        /// The server's message.
        message: String,
    },

    /// The server reported that its own data is damaged.
    #[snafu(display("remote integrity fault: {message}"))]
    RemoteIntegrity {
        /// The server's message.
        message: String,
    },
}

impl RpcError {
    /// Whether the connection that produced this error is unusable.
    ///
    /// Remote errors and unexpected responses leave the stream aligned on a
    /// frame boundary; everything else does not.
    pub fn breaks_connection(&self) -> bool {
        !matches!(
            self,
            Self::Remote { .. } | Self::RemoteIntegrity { .. } | Self::UnexpectedResponse { .. }
        )
    }

    /// Whether the server reported damaged data rather than a passing failure.
    pub fn is_integrity_fault(&self) -> bool {
        matches!(self, Self::RemoteIntegrity { .. })
    }
}

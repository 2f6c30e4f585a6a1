//! Length-prefixed frames.
//!
//! Format: `[u32 big-endian length][postcard body]`.

use std::io::ErrorKind;

use godfs_constants::MAX_RPC_FRAME_SIZE;
use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::ResultExt;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;

use crate::error::DecodeSnafu;
use crate::error::EncodeSnafu;
use crate::error::IoSnafu;
use crate::error::RpcError;

/// Write one frame and flush.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), RpcError>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let body = postcard::to_allocvec(message).context(EncodeSnafu)?;
    if body.len() as u64 > u64::from(MAX_RPC_FRAME_SIZE) {
        return Err(RpcError::FrameTooLarge {
            len: body.len() as u64,
            max: MAX_RPC_FRAME_SIZE,
        });
    }
    writer.write_all(&(body.len() as u32).to_be_bytes()).await.context(IoSnafu)?;
    writer.write_all(&body).await.context(IoSnafu)?;
    writer.flush().await.context(IoSnafu)?;
    Ok(())
}

/// Read one frame.
///
/// Returns `None` if the peer closed the connection cleanly between frames.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, RpcError>
where
    R: AsyncReadExt + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(source) => return Err(RpcError::Io { source }),
    }

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_RPC_FRAME_SIZE {
        return Err(RpcError::FrameTooLarge {
            len: u64::from(len),
            max: MAX_RPC_FRAME_SIZE,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            RpcError::ConnectionClosed
        } else {
            RpcError::Io { source: e }
        }
    })?;
    postcard::from_bytes(&body).map(Some).context(DecodeSnafu)
}

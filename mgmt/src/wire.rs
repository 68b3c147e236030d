// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Frame codec of the management protocol: a big-endian u32 length followed
//! by a JSON document.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("peer closed the connection")]
    Closed,

    #[error("frame of {0} octets exceeds the limit")]
    FrameTooLarge(usize),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec failure: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Read one frame; `Closed` when the peer hung up between frames.
pub async fn read_frame<S, T>(stream: &mut S) -> Result<T, WireError>
where
    S: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(WireError::Closed),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(serde_json::from_slice(&buf)?)
}

/// Write one frame.
pub async fn write_frame<S, T>(stream: &mut S, message: &T) -> Result<(), WireError>
where
    S: AsyncWrite + Unpin,
    T: Serialize,
{
    let buf = serde_json::to_vec(message)?;
    if buf.len() > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(buf.len()));
    }
    stream.write_all(&(buf.len() as u32).to_be_bytes()).await?;
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

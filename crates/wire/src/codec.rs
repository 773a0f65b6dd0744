// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Newline-delimited JSON framing.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on one frame. `put` payloads are base64, so this allows
/// ~24 MB of file content.
pub const MAX_FRAME_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame exceeds {MAX_FRAME_BYTES} bytes")]
    FrameTooLarge,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Write one frame: compact JSON followed by `\n`.
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(frame)?;
    if line.len() > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge);
    }
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. EOF before any bytes is `ConnectionClosed`.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, ProtocolError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(ProtocolError::ConnectionClosed);
    }
    if line.len() > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge);
    }
    Ok(serde_json::from_str(line.trim_end())?)
}

/// [`read_frame`] with a deadline.
pub async fn read_frame_timeout<R, T>(
    reader: &mut R,
    timeout: Duration,
) -> Result<T, ProtocolError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    tokio::time::timeout(timeout, read_frame(reader))
        .await
        .map_err(|_| ProtocolError::Timeout(timeout))?
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;

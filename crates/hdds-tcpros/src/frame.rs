// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message body framing.
//!
//! Topic messages and service requests/responses travel as
//! `body_len (4B LE) || body`. Service responses are preceded by a single
//! status byte.

use crate::error::{Result, TcprosError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Service status byte announcing a response frame.
pub const STATUS_OK: u8 = 1;

/// Service status byte announcing an error message frame.
pub const STATUS_ERROR: u8 = 0;

/// Default maximum message body size (1 GB, the same ceiling roscpp uses).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1_000_000_000;

/// Write one length-prefixed body and flush.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&(body.len() as u32).to_le_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await
}

/// Read one length-prefixed body.
///
/// Returns `Ok(None)` when the peer closed the stream before a new frame
/// started. A stream ending inside the length prefix or the body is an error.
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        match reader.read(&mut len_buf[filled..]).await? {
            0 if filled == 0 => return Ok(None),
            0 => {
                return Err(TcprosError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("connection closed after {} of 4 length bytes", filled),
                )))
            }
            n => filled += n,
        }
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > max_size {
        return Err(TcprosError::FrameTooLarge { len, max: max_size });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Read one length-prefixed body, treating end of stream as an error.
pub async fn expect_frame<R>(reader: &mut R, max_size: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    read_frame(reader, max_size).await?.ok_or_else(|| {
        TcprosError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed before frame",
        ))
    })
}

/// Write a service reply: status byte, then the framed body, then flush.
pub async fn write_service_reply<W>(writer: &mut W, ok: bool, body: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let status = if ok { STATUS_OK } else { STATUS_ERROR };
    writer.write_all(&[status]).await?;
    write_frame(writer, body).await
}

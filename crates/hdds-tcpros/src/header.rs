// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCPROS connection header codec.
//!
//! Every connection starts with a header exchange. A header is a sequence
//! of `key=value` text fields, each prefixed by its byte length, and the
//! whole sequence prefixed by the combined length of all prefixed fields:
//!
//! ```text
//! +------------------+------------------+-----------+------------------+-----
//! | Total len (4B LE)| Field len (4B LE)| key=value | Field len (4B LE)| ...
//! +------------------+------------------+-----------+------------------+-----
//! ```
//!
//! Fields are split on the first `=`. The total length must be consumed
//! exactly by the fields it announces; anything else is a malformed frame.

use crate::error::{Result, TcprosError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of every length prefix in a header frame.
pub const LEN_PREFIX_SIZE: usize = 4;

/// Default upper bound for an incoming header frame (1 MB).
pub const DEFAULT_MAX_HEADER_SIZE: usize = 1024 * 1024;

/// Well-known header field names.
pub mod fields {
    pub const TOPIC: &str = "topic";
    pub const SERVICE: &str = "service";
    pub const MD5SUM: &str = "md5sum";
    pub const TYPE: &str = "type";
    pub const CALLERID: &str = "callerid";
    pub const MESSAGE_DEFINITION: &str = "message_definition";
    pub const LATCHING: &str = "latching";
    pub const REQUEST_TYPE: &str = "request_type";
    pub const RESPONSE_TYPE: &str = "response_type";
    pub const PROBE: &str = "probe";
    pub const ERROR: &str = "error";
    pub const TCP_NODELAY: &str = "tcp_nodelay";
}

/// Wildcard md5sum accepted by both publishers and services.
pub const MD5_WILDCARD: &str = "*";

/// An ordered list of connection header fields.
///
/// Duplicate keys are kept as-is; lookups return the first match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionHeader {
    fields: Vec<(String, String)>,
}

impl ConnectionHeader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field append.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), value.into()));
    }

    /// Header carrying a single `error` field.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new().with(fields::ERROR, message)
    }

    /// First value recorded for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Value of a required field, or [`TcprosError::MissingField`].
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| TcprosError::MissingField(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Encode the full frame, total length prefix included.
    pub fn encode(&self) -> Vec<u8> {
        let body_len: usize = self
            .fields
            .iter()
            .map(|(k, v)| LEN_PREFIX_SIZE + k.len() + 1 + v.len())
            .sum();

        let mut out = Vec::with_capacity(LEN_PREFIX_SIZE + body_len);
        out.extend_from_slice(&(body_len as u32).to_le_bytes());
        for (key, value) in &self.fields {
            let field_len = key.len() + 1 + value.len();
            out.extend_from_slice(&(field_len as u32).to_le_bytes());
            out.extend_from_slice(key.as_bytes());
            out.push(b'=');
            out.extend_from_slice(value.as_bytes());
        }
        out
    }

    /// Parse the field sequence that follows the total length prefix.
    ///
    /// `body` must hold exactly the number of bytes the total length announced.
    pub fn decode_body(body: &[u8]) -> Result<Self> {
        let mut remaining = body.len() as i64;
        let mut pos = 0usize;
        let mut header = Self::new();

        while remaining > 0 {
            if body.len() - pos < LEN_PREFIX_SIZE {
                return Err(TcprosError::malformed(format!(
                    "length mismatch: {} trailing bytes cannot hold a field length",
                    body.len() - pos
                )));
            }
            let mut len_buf = [0u8; LEN_PREFIX_SIZE];
            len_buf.copy_from_slice(&body[pos..pos + LEN_PREFIX_SIZE]);
            let field_len = u32::from_le_bytes(len_buf) as usize;
            pos += LEN_PREFIX_SIZE;

            remaining -= (LEN_PREFIX_SIZE + field_len) as i64;
            if remaining < 0 {
                return Err(TcprosError::malformed(format!(
                    "length mismatch: field of {} bytes overruns header by {} bytes",
                    field_len, -remaining
                )));
            }

            let text = std::str::from_utf8(&body[pos..pos + field_len])
                .map_err(|_| TcprosError::malformed("header field is not valid UTF-8"))?;
            pos += field_len;

            let (key, value) = text.split_once('=').ok_or_else(|| {
                TcprosError::malformed(format!("missing separator in header field '{}'", text))
            })?;
            header.push(key, value);
        }

        Ok(header)
    }

    /// Read one header frame from `reader`.
    ///
    /// Frames announcing more than `max_size` bytes are rejected before any
    /// body byte is read.
    pub async fn read_from<R>(reader: &mut R, max_size: usize) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let total = reader.read_u32_le().await? as usize;
        if total > max_size {
            return Err(TcprosError::malformed(format!(
                "header length {} exceeds limit {}",
                total, max_size
            )));
        }

        let mut body = vec![0u8; total];
        reader.read_exact(&mut body).await?;
        Self::decode_body(&body)
    }

    /// Write this header to `writer` and flush it.
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.encode()).await?;
        writer.flush().await?;
        Ok(())
    }
}

impl FromIterator<(String, String)> for ConnectionHeader {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Whether a peer-supplied md5sum is compatible with ours.
///
/// The wildcard always matches; digests compare case-insensitively.
pub fn md5_compatible(theirs: &str, ours: &str) -> bool {
    theirs == MD5_WILDCARD || theirs.eq_ignore_ascii_case(ours)
}

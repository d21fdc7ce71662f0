// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message codec seam.
//!
//! The transport treats message bodies as opaque bytes produced and consumed
//! by [`RosMessage`] implementations. Generated types implement the trait;
//! the primitives here follow the ROS1 serialization rules (little-endian,
//! strings and arrays prefixed with a `u32` length).

use md5::{Digest, Md5};
use std::fmt;
use thiserror::Error;

/// Message (de)serialization errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unexpected end of message: needed {needed} bytes, {available} available")]
    UnexpectedEof { needed: usize, available: usize },

    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    #[error("Invalid message: {0}")]
    Invalid(String),
}

/// A ROS1 message type.
pub trait RosMessage: Sized + Send + Sync + 'static {
    /// Fully qualified type name, e.g. `std_msgs/String`.
    const TYPE_NAME: &'static str;

    /// Full message definition text as sent in the `message_definition` field.
    const DEFINITION: &'static str;

    /// Type-compatibility digest.
    ///
    /// The default covers flat definitions; types embedding other messages
    /// must override it with the digest produced by their generator.
    fn md5sum() -> String {
        md5_hex(&md5_text(Self::DEFINITION))
    }

    /// Serialized size in bytes.
    fn encoded_len(&self) -> usize;

    fn encode(&self, out: &mut WireWriter);

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, CodecError>;

    fn to_bytes(&self) -> Vec<u8> {
        let mut writer = WireWriter::with_capacity(self.encoded_len());
        self.encode(&mut writer);
        writer.into_inner()
    }

    /// Decode a complete frame body. Bytes left over are an error.
    fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = WireReader::new(bytes);
        let msg = Self::decode(&mut reader)?;
        match reader.remaining() {
            0 => Ok(msg),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}

/// A ROS1 service type.
pub trait RosService: Send + Sync + 'static {
    /// Fully qualified service type name, e.g. `rospy_tutorials/AddTwoInts`.
    const TYPE_NAME: &'static str;

    type Request: RosMessage + fmt::Debug;
    type Response: RosMessage;

    /// Digest over the request text followed by the response text.
    fn md5sum() -> String {
        let mut text = md5_text(<Self::Request as RosMessage>::DEFINITION);
        text.push_str(&md5_text(<Self::Response as RosMessage>::DEFINITION));
        md5_hex(&text)
    }
}

/// Canonical text hashed for a flat message definition.
///
/// Comments and blank lines are dropped, whitespace is normalized, and
/// constants are listed before fields.
pub fn md5_text(definition: &str) -> String {
    let mut constants = Vec::new();
    let mut fields = Vec::new();

    for raw in definition.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (field_type, rest) = match line.split_once(char::is_whitespace) {
            Some((t, r)) => (t, r.trim_start()),
            None => continue,
        };

        let stripped = strip_comment(rest);
        if let Some((name, value)) = stripped.split_once('=') {
            // String constants keep everything after '=' verbatim, '#' included.
            let value = if field_type == "string" {
                rest.split_once('=').map(|(_, v)| v).unwrap_or(value)
            } else {
                value
            };
            constants.push(format!("{} {}={}", field_type, name.trim(), value.trim()));
        } else {
            let name = stripped.trim();
            if !name.is_empty() {
                fields.push(format!("{} {}", field_type, name));
            }
        }
    }

    constants.extend(fields);
    constants.join("\n")
}

fn strip_comment(text: &str) -> &str {
    text.split('#').next().unwrap_or("")
}

/// Lowercase hex md5 of `text`.
pub fn md5_hex(text: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(text.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Little-endian output buffer for message encoding.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_string(&mut self, v: &str) {
        self.put_u32(v.len() as u32);
        self.buf.extend_from_slice(v.as_bytes());
    }

    pub fn put_bytes(&mut self, v: &[u8]) {
        self.put_u32(v.len() as u32);
        self.buf.extend_from_slice(v);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Little-endian cursor for message decoding.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEof {
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}

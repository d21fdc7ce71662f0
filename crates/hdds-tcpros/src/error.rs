// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the TCPROS transport.
//!
//! Failures fall into a small closed set of kinds. The connection acceptor
//! matches on [`TcprosError::is_malformed_header`] to decide between
//! replying with an `error=` header and silently force-closing.

use crate::config::ConfigError;
use crate::message::CodecError;
use thiserror::Error;

/// TCPROS errors.
#[derive(Debug, Error)]
pub enum TcprosError {
    /// Protocol violation detected while exchanging connection headers
    /// (bad framing, md5 mismatch, unknown topic or service).
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    /// A required connection header field is absent.
    #[error("Missing header field '{0}'")]
    MissingField(String),

    /// The peer answered the handshake with an `error=` header.
    #[error("Handshake rejected by {peer}: {message}")]
    Rejected { peer: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// A message frame announced a body larger than the configured limit.
    #[error("Frame too large: {len} > {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// The service server answered with a non-success status byte.
    #[error("Service call to {host}:{port} failed for request {request}: {reason}")]
    ServiceCall {
        host: String,
        port: u16,
        request: String,
        reason: String,
    },

    /// Node status left the running state.
    #[error("Node is shutting down")]
    Stopped,

    #[error("Node listener already started on {0}")]
    AlreadyRunning(std::net::SocketAddr),

    /// Topic or service registration conflict.
    #[error("Registration error: {0}")]
    Registration(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl TcprosError {
    /// Build a malformed-header error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedHeader(message.into())
    }

    /// Whether this failure is a recoverable handshake violation that should
    /// be reported back to the peer as an `error=` header.
    pub fn is_malformed_header(&self) -> bool {
        matches!(self, Self::MalformedHeader(_) | Self::MissingField(_))
    }
}

/// Result alias using [`TcprosError`].
pub type Result<T> = std::result::Result<T, TcprosError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_classification() {
        assert!(TcprosError::malformed("length mismatch").is_malformed_header());
        assert!(TcprosError::MissingField("md5sum".into()).is_malformed_header());

        let io = TcprosError::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(!io.is_malformed_header());
        assert!(!TcprosError::Stopped.is_malformed_header());
    }

    #[test]
    fn test_service_call_display_names_peer() {
        let err = TcprosError::ServiceCall {
            host: "10.0.0.7".into(),
            port: 4711,
            request: "AddTwoIntsRequest { a: 1, b: 2 }".into(),
            reason: "status byte 0".into(),
        };
        let text = err.to_string();
        assert!(text.contains("10.0.0.7:4711"));
        assert!(text.contains("a: 1"));
    }
}

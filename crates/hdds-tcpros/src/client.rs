// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound connection settings shared by subscriptions and service calls.

use crate::config::NodeConfig;
use crate::error::Result;
use crate::frame::DEFAULT_MAX_MESSAGE_SIZE;
use crate::header::DEFAULT_MAX_HEADER_SIZE;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Limits applied to client-initiated connections.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub connect_timeout: Duration,
    pub max_header_size: usize,
    pub max_message_size: usize,
    pub tcp_nodelay: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            tcp_nodelay: false,
        }
    }
}

impl From<&NodeConfig> for ClientOptions {
    fn from(config: &NodeConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            max_header_size: config.max_header_size,
            max_message_size: config.max_message_size,
            tcp_nodelay: config.tcp_nodelay,
        }
    }
}

/// Open a TCP connection to `host:port` within the connect timeout.
pub async fn connect(host: &str, port: u16, options: &ClientOptions) -> Result<TcpStream> {
    let stream = match tokio::time::timeout(options.connect_timeout, TcpStream::connect((host, port)))
        .await
    {
        Ok(result) => result?,
        Err(_) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {}:{} timed out", host, port),
            )
            .into())
        }
    };

    if options.tcp_nodelay {
        stream.set_nodelay(true)?;
    }
    debug!("Connected to {}:{}", host, port);
    Ok(stream)
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection acceptor.
//!
//! Owns the listening socket. Every accepted connection gets its own task,
//! which reads one header and routes it:
//!
//! - `probe=1`: closed without reply
//! - `topic`: publisher-side handshake, then the connection joins the
//!   publication's subscriber list
//! - `service`: one request/response exchange, then close
//!
//! A header that cannot be parsed is dropped silently. A header that parses
//! but fails validation (unknown topic, md5 mismatch, missing field) gets an
//! `error=` reply before the connection is closed.

use crate::config::NodeConfig;
use crate::error::{Result, TcprosError};
use crate::header::{fields, ConnectionHeader};
use crate::publication::{self, Publication};
use crate::registry::Registry;
use crate::service::{self, ServiceEntry};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Byte stream an acceptor can serve.
pub trait ConnectionStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Apply a subscriber's `tcp_nodelay` request.
    fn set_nodelay(&self, _nodelay: bool) -> std::io::Result<()> {
        Ok(())
    }
}

impl ConnectionStream for TcpStream {
    fn set_nodelay(&self, nodelay: bool) -> std::io::Result<()> {
        TcpStream::set_nodelay(self, nodelay)
    }
}

impl ConnectionStream for tokio::io::DuplexStream {}

/// What an incoming header asked for.
enum Route {
    Probe,
    Topic {
        publication: Arc<Publication>,
        reply: ConnectionHeader,
        subscriber: String,
        nodelay: bool,
    },
    Service {
        service: Arc<ServiceEntry>,
        reply: ConnectionHeader,
    },
    Unmatched,
}

/// Shared state of all connection tasks.
#[derive(Debug)]
pub(crate) struct AcceptContext {
    pub(crate) registry: Arc<Registry>,
    pub(crate) max_header_size: usize,
    pub(crate) max_message_size: usize,
}

impl AcceptContext {
    pub(crate) fn new(registry: Arc<Registry>, config: &NodeConfig) -> Self {
        Self {
            registry,
            max_header_size: config.max_header_size,
            max_message_size: config.max_message_size,
        }
    }
}

/// Listening side of a node.
pub struct Acceptor {
    listener: TcpListener,
    context: Arc<AcceptContext>,
    shutdown: Arc<Notify>,
}

impl Acceptor {
    /// Bind the listener.
    pub async fn bind(
        addr: SocketAddr,
        registry: Arc<Registry>,
        config: &NodeConfig,
        shutdown: Arc<Notify>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            context: Arc::new(AcceptContext::new(registry, config)),
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the shutdown notifier fires.
    pub async fn run(self) {
        info!(
            "TCPROS listening on {}",
            self.listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "?".into())
        );

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            debug!("New connection from {}", peer_addr);
                            let context = self.context.clone();
                            tokio::spawn(async move {
                                handle_connection(context, stream, peer_addr.to_string()).await;
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("TCPROS acceptor shutting down");
                    break;
                }
            }
        }
    }
}

/// Serve one accepted connection to completion.
pub(crate) async fn handle_connection<S: ConnectionStream>(
    context: Arc<AcceptContext>,
    mut stream: S,
    peer: String,
) {
    let header = match ConnectionHeader::read_from(&mut stream, context.max_header_size).await {
        Ok(header) => header,
        Err(e) => {
            info!("Dropping connection from {}: unreadable header: {}", peer, e);
            let _ = stream.shutdown().await;
            return;
        }
    };

    let route = match route(&context.registry, &header, &peer) {
        Ok(route) => route,
        Err(e) => {
            warn!("Rejecting connection from {}: {}", peer, e);
            if let Err(write_err) = ConnectionHeader::error(e.to_string())
                .write_to(&mut stream)
                .await
            {
                debug!("Could not send error header to {}: {}", peer, write_err);
            }
            let _ = stream.shutdown().await;
            return;
        }
    };

    let result = match route {
        Route::Probe => {
            debug!("Probe from {}", peer);
            let _ = stream.shutdown().await;
            Ok(())
        }
        Route::Topic {
            publication,
            reply,
            subscriber,
            nodelay,
        } => {
            if nodelay {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
                }
            }
            publication::serve_subscriber(publication, reply, subscriber, stream).await
        }
        Route::Service { service, reply } => {
            service::serve_request(service, reply, stream, context.max_message_size).await
        }
        Route::Unmatched => {
            debug!("Header from {} names no topic, service or probe", peer);
            let _ = stream.shutdown().await;
            Ok(())
        }
    };

    if let Err(e) = result {
        warn!("Connection from {} failed: {}", peer, e);
    }
}

/// Classify a header and validate it against the registry.
///
/// Every error returned here is a malformed-header condition.
fn route(registry: &Registry, header: &ConnectionHeader, peer: &str) -> Result<Route> {
    if header.get(fields::PROBE) == Some("1") {
        return Ok(Route::Probe);
    }

    if let Some(topic) = header.get(fields::TOPIC) {
        let publication = registry
            .publication(topic)
            .ok_or_else(|| TcprosError::malformed(format!("unknown topic {}", topic)))?;
        let reply = publication.negotiate(header, registry.caller_id())?;
        return Ok(Route::Topic {
            publication,
            reply,
            subscriber: header.get(fields::CALLERID).unwrap_or(peer).to_string(),
            nodelay: header.get(fields::TCP_NODELAY) == Some("1"),
        });
    }

    if let Some(name) = header.get(fields::SERVICE) {
        let service = registry
            .service(name)
            .ok_or_else(|| TcprosError::malformed(format!("unknown service {}", name)))?;
        let reply = service.negotiate(header, registry.caller_id())?;
        return Ok(Route::Service { service, reply });
    }

    Ok(Route::Unmatched)
}

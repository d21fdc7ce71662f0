// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node facade.
//!
//! A [`Node`] owns the registry, the listening acceptor and the shared
//! [`NodeStatus`]. Publications, subscriptions and services are created
//! through it so that they all see the same caller id, limits and shutdown
//! state.

use crate::acceptor::Acceptor;
use crate::client::ClientOptions;
use crate::config::NodeConfig;
use crate::error::{Result, TcprosError};
use crate::message::{RosMessage, RosService};
use crate::publication::{Publication, Publisher, TopicType};
use crate::registry::{Registry, SubscriptionEntry};
use crate::service::{self, ServiceEntry};
use crate::subscription::{Subscription, SubscriptionControl};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::{debug, info};

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Running,
    ShuttingDown,
}

/// Shared, cloneable view of the node state.
///
/// Ingestion tasks poll it before every frame.
#[derive(Debug, Clone)]
pub struct NodeStatus(Arc<AtomicU8>);

const STATE_RUNNING: u8 = 0;
const STATE_SHUTTING_DOWN: u8 = 1;

impl NodeStatus {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(STATE_RUNNING)))
    }

    pub fn state(&self) -> NodeState {
        match self.0.load(Ordering::Acquire) {
            STATE_RUNNING => NodeState::Running,
            _ => NodeState::ShuttingDown,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == NodeState::Running
    }

    /// Move to `ShuttingDown`. Irreversible.
    pub fn shutdown(&self) {
        self.0.store(STATE_SHUTTING_DOWN, Ordering::Release);
    }
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// TCPROS node.
#[derive(Clone)]
pub struct Node {
    config: Arc<NodeConfig>,
    registry: Arc<Registry>,
    status: NodeStatus,
    shutdown: Arc<Notify>,
    local_addr: Arc<Mutex<Option<SocketAddr>>>,
    subscriptions: Arc<Mutex<Vec<Weak<dyn SubscriptionControl>>>>,
}

impl Node {
    /// Create a node. Nothing is bound until [`Node::start`].
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry: Arc::new(Registry::new(config.name.clone())),
            config: Arc::new(config),
            status: NodeStatus::new(),
            shutdown: Arc::new(Notify::new()),
            local_addr: Arc::new(Mutex::new(None)),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn caller_id(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn status(&self) -> &NodeStatus {
        &self.status
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn client_options(&self) -> ClientOptions {
        ClientOptions::from(self.config.as_ref())
    }

    /// Bind the listener and start accepting connections in the background.
    pub async fn start(&self) -> Result<SocketAddr> {
        if !self.status.is_running() {
            return Err(TcprosError::Stopped);
        }
        if let Some(addr) = *self.local_addr.lock() {
            return Err(TcprosError::AlreadyRunning(addr));
        }

        let bind = SocketAddr::new(self.config.bind_address, self.config.port);
        let acceptor = Acceptor::bind(
            bind,
            self.registry.clone(),
            &self.config,
            self.shutdown.clone(),
        )
        .await?;
        let addr = acceptor.local_addr()?;

        {
            let mut slot = self.local_addr.lock();
            if let Some(existing) = *slot {
                return Err(TcprosError::AlreadyRunning(existing));
            }
            *slot = Some(addr);
        }

        tokio::spawn(acceptor.run());
        info!("Node {} serving TCPROS on {}", self.caller_id(), addr);
        Ok(addr)
    }

    /// Address of the listener, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Advertise `topic`. Re-advertising with the same type returns a handle
    /// on the existing publication.
    pub fn advertise<M: RosMessage>(&self, topic: &str, latching: bool) -> Result<Publisher<M>> {
        self.ensure_running()?;
        let publication = Publication::new(
            topic,
            TopicType::of::<M>(),
            latching,
            self.registry.broken_sockets().clone(),
        )
        .with_write_timeout(self.config.write_timeout());
        let publication = self.registry.add_publication(publication)?;
        debug!("Advertised {} as {}", topic, M::TYPE_NAME);
        Ok(Publisher::new(publication))
    }

    /// Stop publishing `topic` and close its subscriber connections.
    pub async fn unadvertise(&self, topic: &str) -> bool {
        match self.registry.remove_publication(topic) {
            Some(publication) => {
                publication.close().await;
                debug!("Unadvertised {}", topic);
                true
            }
            None => false,
        }
    }

    /// Subscribe to `topic`. Connect it to publishers with
    /// [`Subscription::connect`].
    pub fn subscribe<M: RosMessage>(
        &self,
        topic: &str,
        queue_size: Option<usize>,
    ) -> Result<Arc<Subscription<M>>> {
        self.ensure_running()?;
        self.registry.add_subscription(SubscriptionEntry {
            topic: topic.to_string(),
            topic_type: TopicType::of::<M>(),
        })?;

        let subscription = Arc::new(Subscription::<M>::new(
            topic,
            queue_size.unwrap_or(self.config.default_queue_size),
            self.caller_id(),
            self.status.clone(),
            self.client_options(),
        ));

        let control: Arc<dyn SubscriptionControl> = subscription.clone();
        let mut subscriptions = self.subscriptions.lock();
        subscriptions.retain(|weak| weak.strong_count() > 0);
        subscriptions.push(Arc::downgrade(&control));
        Ok(subscription)
    }

    /// Drop the registry entry for `topic` and stop every live subscription on it.
    pub fn unsubscribe(&self, topic: &str) -> bool {
        let removed = self.registry.remove_subscription(topic).is_some();
        let mut subscriptions = self.subscriptions.lock();
        subscriptions.retain(|weak| match weak.upgrade() {
            Some(sub) if sub.topic() == topic => {
                sub.shutdown();
                false
            }
            Some(_) => true,
            None => false,
        });
        removed
    }

    /// Serve `name` with `callback`.
    pub fn advertise_service<S, F>(&self, name: &str, callback: F) -> Result<()>
    where
        S: RosService,
        F: Fn(S::Request) -> std::result::Result<S::Response, String> + Send + Sync + 'static,
    {
        self.ensure_running()?;
        self.registry
            .add_service(ServiceEntry::new::<S, F>(name, callback))?;
        debug!("Advertised service {} as {}", name, S::TYPE_NAME);
        Ok(())
    }

    pub fn unadvertise_service(&self, name: &str) -> bool {
        self.registry.remove_service(name).is_some()
    }

    /// Call a remote service.
    pub async fn call_service<S: RosService>(
        &self,
        host: &str,
        port: u16,
        name: &str,
        request: &S::Request,
    ) -> Result<S::Response> {
        self.ensure_running()?;
        service::call::<S>(
            self.caller_id(),
            host,
            port,
            name,
            request,
            &self.client_options(),
        )
        .await
    }

    /// Probe a remote service server.
    pub async fn probe_service(&self, host: &str, port: u16, name: &str) -> Result<()> {
        service::probe(self.caller_id(), host, port, name, &self.client_options()).await
    }

    /// Stop accepting, close publisher connections and stop ingestion.
    pub async fn shutdown(&self) {
        if !self.status.is_running() {
            return;
        }
        self.status.shutdown();
        self.shutdown.notify_one();

        for topic in self.registry.published_topics() {
            if let Some(publication) = self.registry.remove_publication(&topic) {
                publication.close().await;
            }
        }
        for name in self.registry.service_names() {
            self.registry.remove_service(&name);
        }

        let subscriptions: Vec<_> = self.subscriptions.lock().drain(..).collect();
        for sub in subscriptions.iter().filter_map(Weak::upgrade) {
            sub.shutdown();
        }
        info!("Node {} shut down", self.caller_id());
    }

    fn ensure_running(&self) -> Result<()> {
        if self.status.is_running() {
            Ok(())
        } else {
            Err(TcprosError::Stopped)
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.config.name)
            .field("state", &self.status.state())
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscriber side of a topic.
//!
//! [`Subscription::connect`] performs the client handshake against a remote
//! publisher, then hands the connection to a dedicated ingestion task. The
//! task reads one frame at a time, decodes it and pushes it into the
//! subscription's drop-oldest buffer. It checks the node status before every
//! frame and owns the connection until it exits.

use crate::buffer::MessageBuffer;
use crate::client::{self, ClientOptions};
use crate::error::{Result, TcprosError};
use crate::frame;
use crate::header::{fields, md5_compatible, ConnectionHeader};
use crate::message::RosMessage;
use crate::node::NodeStatus;
use crate::publication::TopicType;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// One locally consumed topic.
pub struct Subscription<M: RosMessage> {
    topic: String,
    topic_type: TopicType,
    caller_id: String,
    buffer: Arc<MessageBuffer<M>>,
    status: NodeStatus,
    options: ClientOptions,
    links: Mutex<Vec<JoinHandle<()>>>,
    live_links: Arc<AtomicUsize>,
}

impl<M: RosMessage> Subscription<M> {
    pub fn new(
        topic: impl Into<String>,
        queue_size: usize,
        caller_id: impl Into<String>,
        status: NodeStatus,
        options: ClientOptions,
    ) -> Self {
        Self {
            topic: topic.into(),
            topic_type: TopicType::of::<M>(),
            caller_id: caller_id.into(),
            buffer: Arc::new(MessageBuffer::new(queue_size)),
            status,
            options,
            links: Mutex::new(Vec::new()),
            live_links: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn topic_type(&self) -> &TopicType {
        &self.topic_type
    }

    pub fn buffer(&self) -> &Arc<MessageBuffer<M>> {
        &self.buffer
    }

    /// Wait for the next message; `None` after [`shutdown`](Self::shutdown).
    pub async fn recv(&self) -> Option<M> {
        self.buffer.recv().await
    }

    pub fn try_recv(&self) -> Option<M> {
        self.buffer.try_pop()
    }

    /// Like [`recv`](Self::recv), but also returns `None` once the queue is
    /// empty and no publisher link is left to refill it.
    pub async fn recv_while_linked(&self) -> Option<M> {
        loop {
            if let Some(msg) = self.buffer.try_pop() {
                return Some(msg);
            }
            if self.buffer.is_closed() || self.live_links.load(Ordering::Acquire) == 0 {
                return None;
            }
            self.buffer.notified().await;
        }
    }

    /// Number of ingestion tasks still running.
    pub fn active_links(&self) -> usize {
        let mut links = self.links.lock();
        links.retain(|h| !h.is_finished());
        links.len()
    }

    /// Header sent to publishers.
    pub fn request_header(&self) -> ConnectionHeader {
        let header = ConnectionHeader::new()
            .with(fields::TOPIC, self.topic.as_str())
            .with(fields::MD5SUM, self.topic_type.md5sum.as_str())
            .with(fields::TYPE, self.topic_type.type_name.as_str())
            .with(fields::CALLERID, self.caller_id.as_str());
        if self.options.tcp_nodelay {
            header.with(fields::TCP_NODELAY, "1")
        } else {
            header
        }
    }

    /// Connect to a publisher and start ingesting its messages.
    ///
    /// Returns the publisher's reply header. Handshake failures propagate;
    /// failures after the handshake only end the ingestion task.
    pub async fn connect(&self, host: &str, port: u16) -> Result<ConnectionHeader> {
        let stream = client::connect(host, port, &self.options).await?;
        self.attach(stream, format!("{}:{}", host, port)).await
    }

    /// Run the handshake over an established stream, then spawn ingestion.
    pub async fn attach<S>(&self, mut stream: S, peer: impl Into<String>) -> Result<ConnectionHeader>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let peer = peer.into();
        match self.handshake(&mut stream, &peer).await {
            Ok(reply) => {
                self.spawn_ingestion(stream, peer);
                Ok(reply)
            }
            Err(e) => {
                if e.is_malformed_header() {
                    let _ = ConnectionHeader::error(e.to_string())
                        .write_to(&mut stream)
                        .await;
                }
                let _ = stream.shutdown().await;
                Err(e)
            }
        }
    }

    async fn handshake<S>(&self, stream: &mut S, peer: &str) -> Result<ConnectionHeader>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.request_header().write_to(stream).await?;

        let reply = ConnectionHeader::read_from(stream, self.options.max_header_size).await?;
        if let Some(message) = reply.get(fields::ERROR) {
            return Err(TcprosError::Rejected {
                peer: peer.to_string(),
                message: message.to_string(),
            });
        }

        reply.require(fields::TYPE)?;
        let theirs = reply.require(fields::MD5SUM)?;
        if !md5_compatible(theirs, &self.topic_type.md5sum) {
            return Err(TcprosError::malformed(format!(
                "md5 mismatch on topic {}: publisher sent {}, subscriber has {}",
                self.topic, theirs, self.topic_type.md5sum
            )));
        }

        debug!(
            "Handshake with {} on {} complete (latching={})",
            peer,
            self.topic,
            reply.get(fields::LATCHING).unwrap_or("0")
        );
        Ok(reply)
    }

    fn spawn_ingestion<S>(&self, stream: S, peer: String)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let task = Ingestion {
            topic: self.topic.clone(),
            peer,
            buffer: self.buffer.clone(),
            status: self.status.clone(),
            max_message_size: self.options.max_message_size,
            _link: LinkGuard::new(self.live_links.clone(), self.buffer.clone()),
        };
        let handle = tokio::spawn(task.run(stream));

        let mut links = self.links.lock();
        links.retain(|h| !h.is_finished());
        links.push(handle);
    }

    /// Stop every ingestion task and wake pending receivers.
    pub fn shutdown(&self) {
        for handle in self.links.lock().drain(..) {
            handle.abort();
        }
        self.buffer.close();
    }
}

impl<M: RosMessage> Drop for Subscription<M> {
    fn drop(&mut self) {
        for handle in self.links.get_mut().drain(..) {
            handle.abort();
        }
    }
}

/// Node-level control over subscriptions of any message type.
pub(crate) trait SubscriptionControl: Send + Sync {
    fn topic(&self) -> &str;
    fn shutdown(&self);
}

impl<M: RosMessage> SubscriptionControl for Subscription<M> {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn shutdown(&self) {
        Subscription::shutdown(self);
    }
}

/// Counts one live publisher link; dropping it wakes the consumer.
struct LinkGuard<M> {
    live: Arc<AtomicUsize>,
    buffer: Arc<MessageBuffer<M>>,
}

impl<M> LinkGuard<M> {
    fn new(live: Arc<AtomicUsize>, buffer: Arc<MessageBuffer<M>>) -> Self {
        live.fetch_add(1, Ordering::AcqRel);
        Self { live, buffer }
    }
}

impl<M> Drop for LinkGuard<M> {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
        self.buffer.wake();
    }
}

struct Ingestion<M> {
    topic: String,
    peer: String,
    buffer: Arc<MessageBuffer<M>>,
    status: NodeStatus,
    max_message_size: usize,
    _link: LinkGuard<M>,
}

impl<M: RosMessage> Ingestion<M> {
    /// Owns the connection; it is shut down once, whichever way the loop ends.
    /// An aborted task drops the stream instead.
    async fn run<S>(self, mut stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        match self.ingest(&mut stream).await {
            Ok(()) => info!("Publisher {} closed {}", self.peer, self.topic),
            Err(TcprosError::Stopped) => {
                info!("Node stopping, leaving {} from {}", self.topic, self.peer)
            }
            Err(e) => info!(
                "Ingestion of {} from {} stopped: {}",
                self.topic, self.peer, e
            ),
        }
        let _ = stream.shutdown().await;
    }

    async fn ingest<S>(&self, stream: &mut S) -> Result<()>
    where
        S: AsyncRead + Unpin,
    {
        loop {
            if !self.status.is_running() {
                return Err(TcprosError::Stopped);
            }

            let Some(body) = frame::read_frame(stream, self.max_message_size).await? else {
                return Ok(());
            };
            let msg = M::from_bytes(&body)?;

            let dropped = self.buffer.push(msg);
            if dropped > 0 {
                info!(
                    "Dropped {} message(s) on {} (queue size {})",
                    dropped,
                    self.topic,
                    self.buffer.capacity()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgs::StringMsg;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn subscription(queue_size: usize, status: NodeStatus) -> Subscription<StringMsg> {
        Subscription::new(
            "/chatter",
            queue_size,
            "/listener",
            status,
            ClientOptions::default(),
        )
    }

    /// Publisher half of a handshake: read the request, answer with `reply`.
    async fn accept(server: &mut DuplexStream, reply: ConnectionHeader) -> ConnectionHeader {
        let request = ConnectionHeader::read_from(server, 4096).await.unwrap();
        reply.write_to(server).await.unwrap();
        request
    }

    fn publisher_reply(md5sum: &str) -> ConnectionHeader {
        ConnectionHeader::new()
            .with(fields::TYPE, "std_msgs/String")
            .with(fields::CALLERID, "/talker")
            .with(fields::MESSAGE_DEFINITION, "string data")
            .with(fields::LATCHING, "0")
            .with(fields::MD5SUM, md5sum)
    }

    async fn wait_for_links(sub: &Subscription<StringMsg>, expected: usize) {
        for _ in 0..200 {
            if sub.active_links() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} active links, got {}", expected, sub.active_links());
    }

    #[tokio::test]
    async fn test_handshake_and_ingestion() {
        let sub = subscription(10, NodeStatus::new());
        let (client_side, mut server_side) = tokio::io::duplex(4096);

        let publisher = tokio::spawn(async move {
            let request = accept(&mut server_side, publisher_reply(&StringMsg::md5sum())).await;
            for text in ["one", "two"] {
                frame::write_frame(&mut server_side, &StringMsg::new(text).to_bytes())
                    .await
                    .unwrap();
            }
            request
        });

        let reply = sub.attach(client_side, "duplex").await.unwrap();
        assert_eq!(reply.get(fields::CALLERID), Some("/talker"));

        let request = publisher.await.unwrap();
        assert_eq!(request.get(fields::TOPIC), Some("/chatter"));
        assert_eq!(request.get(fields::TYPE), Some("std_msgs/String"));
        assert_eq!(request.get(fields::CALLERID), Some("/listener"));
        assert_eq!(
            request.get(fields::MD5SUM),
            Some(StringMsg::md5sum().as_str())
        );

        let first = tokio::time::timeout(Duration::from_secs(2), sub.recv()).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), sub.recv()).await.unwrap();
        assert_eq!(first.unwrap().data, "one");
        assert_eq!(second.unwrap().data, "two");

        // The publisher task ended and dropped its side: the loop exits.
        wait_for_links(&sub, 0).await;
    }

    #[tokio::test]
    async fn test_rejected_handshake_propagates() {
        let sub = subscription(10, NodeStatus::new());
        let (client_side, mut server_side) = tokio::io::duplex(4096);

        tokio::spawn(async move {
            accept(&mut server_side, ConnectionHeader::error("unknown topic /chatter")).await;
        });

        match sub.attach(client_side, "duplex").await {
            Err(TcprosError::Rejected { message, .. }) => {
                assert_eq!(message, "unknown topic /chatter")
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
        assert_eq!(sub.active_links(), 0);
    }

    #[tokio::test]
    async fn test_md5_mismatch_in_reply_sends_error_header() {
        let sub = subscription(10, NodeStatus::new());
        let (client_side, mut server_side) = tokio::io::duplex(4096);

        let publisher = tokio::spawn(async move {
            accept(&mut server_side, publisher_reply("0123456789abcdef")).await;
            ConnectionHeader::read_from(&mut server_side, 4096).await.unwrap()
        });

        let err = sub.attach(client_side, "duplex").await.unwrap_err();
        assert!(err.is_malformed_header());

        let error_reply = publisher.await.unwrap();
        let text = error_reply.get(fields::ERROR).unwrap();
        assert!(text.contains("0123456789abcdef"));
    }

    #[tokio::test]
    async fn test_drop_oldest_under_overflow() {
        let sub = subscription(2, NodeStatus::new());
        let (client_side, mut server_side) = tokio::io::duplex(4096);

        let publisher = tokio::spawn(async move {
            accept(&mut server_side, publisher_reply("*")).await;
            for text in ["a", "b", "c"] {
                frame::write_frame(&mut server_side, &StringMsg::new(text).to_bytes())
                    .await
                    .unwrap();
            }
        });

        sub.attach(client_side, "duplex").await.unwrap();
        publisher.await.unwrap();
        wait_for_links(&sub, 0).await;

        let left: Vec<String> = sub.buffer().drain().into_iter().map(|m| m.data).collect();
        assert_eq!(left, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(sub.buffer().dropped_total(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_frame_ends_ingestion_and_closes() {
        let sub = subscription(10, NodeStatus::new());
        let (client_side, mut server_side) = tokio::io::duplex(4096);

        sub.spawn_ingestion(client_side, "duplex".to_string());

        frame::write_frame(&mut server_side, &StringMsg::new("ok").to_bytes())
            .await
            .unwrap();
        // Declared string length runs past the frame body.
        frame::write_frame(&mut server_side, &[50, 0, 0, 0, b'x'])
            .await
            .unwrap();
        let _ = frame::write_frame(&mut server_side, &StringMsg::new("late").to_bytes()).await;

        wait_for_links(&sub, 0).await;
        assert_eq!(sub.try_recv().map(|m| m.data), Some("ok".to_string()));
        assert!(sub.try_recv().is_none());

        // Our side was closed: reads see end of stream.
        let mut rest = Vec::new();
        server_side.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_stopped_status_ends_loop_at_next_message() {
        let status = NodeStatus::new();
        let sub = subscription(10, status.clone());
        let (client_side, mut server_side) = tokio::io::duplex(4096);

        sub.spawn_ingestion(client_side, "duplex".to_string());
        frame::write_frame(&mut server_side, &StringMsg::new("first").to_bytes())
            .await
            .unwrap();
        let first = tokio::time::timeout(Duration::from_secs(2), sub.recv()).await.unwrap();
        assert_eq!(first.unwrap().data, "first");

        status.shutdown();
        // The loop is blocked in a read: the frame in flight is still
        // delivered, the flag is seen before the next read.
        frame::write_frame(&mut server_side, &StringMsg::new("second").to_bytes())
            .await
            .unwrap();
        wait_for_links(&sub, 0).await;
        assert_eq!(sub.try_recv().map(|m| m.data), Some("second".to_string()));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lost_publisher_ends_linked_receive() {
        let sub = subscription(10, NodeStatus::new());
        assert!(sub.recv_while_linked().await.is_none());

        let (client_side, mut server_side) = tokio::io::duplex(4096);
        let publisher = tokio::spawn(async move {
            accept(&mut server_side, publisher_reply("*")).await;
            frame::write_frame(&mut server_side, &StringMsg::new("last").to_bytes())
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        });
        sub.attach(client_side, "duplex").await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), sub.recv_while_linked())
            .await
            .unwrap();
        assert_eq!(first.map(|m| m.data), Some("last".to_string()));

        // The publisher drops its end: the waiting receiver is released.
        let after = tokio::time::timeout(Duration::from_secs(2), sub.recv_while_linked())
            .await
            .unwrap();
        assert!(after.is_none());
        assert!(!sub.buffer().is_closed());
        publisher.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_wakes_receivers() {
        let sub = Arc::new(subscription(10, NodeStatus::new()));
        let (client_side, _server_side) = tokio::io::duplex(4096);
        sub.spawn_ingestion(client_side, "duplex".to_string());

        let waiter = {
            let sub = sub.clone();
            tokio::spawn(async move { sub.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        sub.shutdown();

        let got = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(got.is_none());
        assert_eq!(sub.active_links(), 0);
    }
}

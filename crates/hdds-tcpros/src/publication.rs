// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publisher side of a topic.
//!
//! A [`Publication`] owns the outbound connections of every subscriber that
//! completed the handshake. Publishing writes the framed body to each one in
//! turn; a connection whose write fails is recorded in the
//! [`BrokenSocketRegistry`] and skipped from then on, never retried.

use crate::error::{Result, TcprosError};
use crate::frame;
use crate::header::{fields, md5_compatible, ConnectionHeader};
use crate::message::RosMessage;
use dashmap::DashSet;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Write half of a subscriber socket.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Process-unique identity of a subscriber connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Live outbound stream to one remote subscriber.
pub struct SubscriberConnection {
    id: ConnectionId,
    callerid: String,
    writer: BoxedWriter,
}

impl SubscriberConnection {
    pub fn new<W>(callerid: impl Into<String>, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id: ConnectionId::next(),
            callerid: callerid.into(),
            writer: Box::new(writer),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Caller id the subscriber announced during the handshake.
    pub fn callerid(&self) -> &str {
        &self.callerid
    }
}

impl std::fmt::Debug for SubscriberConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberConnection")
            .field("id", &self.id)
            .field("callerid", &self.callerid)
            .finish_non_exhaustive()
    }
}

/// Connections whose writes have failed once.
///
/// Entries are only ever added.
#[derive(Debug, Default)]
pub struct BrokenSocketRegistry {
    broken: DashSet<ConnectionId>,
}

impl BrokenSocketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.broken.contains(&id)
    }

    /// Record `id` as broken. Returns `false` if it already was.
    pub fn mark(&self, id: ConnectionId) -> bool {
        self.broken.insert(id)
    }

    pub fn len(&self) -> usize {
        self.broken.len()
    }

    pub fn is_empty(&self) -> bool {
        self.broken.is_empty()
    }
}

/// Write one framed message to a subscriber.
///
/// Returns 1 when the body was written and flushed, 0 when the connection
/// is (or just became) broken. Failures never reach the caller.
pub async fn write_message(
    conn: &mut SubscriberConnection,
    body: &[u8],
    broken: &BrokenSocketRegistry,
    timeout: Option<Duration>,
) -> usize {
    if broken.contains(conn.id) {
        return 0;
    }

    let write = frame::write_frame(&mut conn.writer, body);
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, write).await {
            Ok(r) => r,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("write stalled for {:?}", limit),
            )),
        },
        None => write.await,
    };

    match result {
        Ok(()) => 1,
        Err(e) => {
            info!(
                "error {} when writing to {} ({}), skipping from now on",
                e, conn.callerid, conn.id
            );
            broken.mark(conn.id);
            0
        }
    }
}

/// Type metadata announced for a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicType {
    pub type_name: String,
    pub definition: String,
    pub md5sum: String,
}

impl TopicType {
    pub fn of<M: RosMessage>() -> Self {
        Self {
            type_name: M::TYPE_NAME.to_string(),
            definition: M::DEFINITION.to_string(),
            md5sum: M::md5sum(),
        }
    }
}

/// One locally published topic.
pub struct Publication {
    topic: String,
    topic_type: TopicType,
    latching: bool,
    subscribers: Mutex<Vec<SubscriberConnection>>,
    latched: parking_lot::Mutex<Option<Arc<Vec<u8>>>>,
    broken: Arc<BrokenSocketRegistry>,
    write_timeout: Option<Duration>,
}

impl Publication {
    pub fn new(
        topic: impl Into<String>,
        topic_type: TopicType,
        latching: bool,
        broken: Arc<BrokenSocketRegistry>,
    ) -> Self {
        Self {
            topic: topic.into(),
            topic_type,
            latching,
            subscribers: Mutex::new(Vec::new()),
            latched: parking_lot::Mutex::new(None),
            broken,
            write_timeout: None,
        }
    }

    /// Bound every subscriber write by `timeout`.
    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn topic_type(&self) -> &TopicType {
        &self.topic_type
    }

    pub fn is_latching(&self) -> bool {
        self.latching
    }

    /// Last published body, kept only when latching.
    pub fn latched_message(&self) -> Option<Arc<Vec<u8>>> {
        self.latched.lock().clone()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Caller ids of registered subscribers, in subscribe order.
    pub async fn subscriber_callerids(&self) -> Vec<String> {
        self.subscribers
            .lock()
            .await
            .iter()
            .map(|c| c.callerid.clone())
            .collect()
    }

    /// Validate a subscriber handshake and build the reply header.
    pub fn negotiate(&self, request: &ConnectionHeader, caller_id: &str) -> Result<ConnectionHeader> {
        let theirs = request.require(fields::MD5SUM)?;
        if !md5_compatible(theirs, &self.topic_type.md5sum) {
            return Err(TcprosError::malformed(format!(
                "md5 mismatch on topic {}: subscriber sent {}, publisher has {}",
                self.topic, theirs, self.topic_type.md5sum
            )));
        }

        Ok(ConnectionHeader::new()
            .with(fields::TYPE, self.topic_type.type_name.as_str())
            .with(fields::CALLERID, caller_id)
            .with(
                fields::MESSAGE_DEFINITION,
                self.topic_type.definition.as_str(),
            )
            .with(fields::LATCHING, if self.latching { "1" } else { "0" })
            .with(fields::MD5SUM, self.topic_type.md5sum.as_str())
            .with(fields::TOPIC, self.topic.as_str()))
    }

    /// Append a subscriber, replaying the latched message to it alone.
    ///
    /// Returns the number of latched messages written (0 or 1).
    pub async fn add_subscriber(&self, mut conn: SubscriberConnection) -> usize {
        let mut subscribers = self.subscribers.lock().await;

        let latched = if self.latching {
            self.latched_message()
        } else {
            None
        };
        let written = match latched {
            Some(body) => write_message(&mut conn, &body, &self.broken, self.write_timeout).await,
            None => 0,
        };

        debug!(
            "Subscriber {} ({}) attached to {}",
            conn.callerid, conn.id, self.topic
        );
        subscribers.push(conn);
        written
    }

    /// Broadcast a serialized message to every subscriber.
    ///
    /// Returns how many subscribers received it.
    pub async fn publish(&self, body: Vec<u8>) -> usize {
        let mut subscribers = self.subscribers.lock().await;

        let body = Arc::new(body);
        if self.latching {
            *self.latched.lock() = Some(body.clone());
        }

        let mut written = 0;
        for conn in subscribers.iter_mut() {
            written += write_message(conn, &body, &self.broken, self.write_timeout).await;
        }
        written
    }

    /// Shut down every subscriber connection.
    pub async fn close(&self) {
        let mut subscribers = self.subscribers.lock().await;
        for mut conn in subscribers.drain(..) {
            // Best effort: the peer may already be gone.
            let _ = conn.writer.shutdown().await;
        }
    }
}

impl std::fmt::Debug for Publication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publication")
            .field("topic", &self.topic)
            .field("type", &self.topic_type.type_name)
            .field("latching", &self.latching)
            .finish_non_exhaustive()
    }
}

/// Reply to an accepted subscriber and register its connection.
pub(crate) async fn serve_subscriber<S>(
    publication: Arc<Publication>,
    reply: ConnectionHeader,
    subscriber: String,
    stream: S,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    // Subscribers never send anything after their header.
    let (_reader, mut writer) = tokio::io::split(stream);

    if let Err(e) = reply.write_to(&mut writer).await {
        let _ = writer.shutdown().await;
        return Err(e);
    }

    let conn = SubscriberConnection::new(subscriber, writer);
    info!(
        "New subscriber {} ({}) on {}",
        conn.callerid(),
        conn.id(),
        publication.topic()
    );
    publication.add_subscriber(conn).await;
    Ok(())
}

/// Typed handle on a [`Publication`].
pub struct Publisher<M> {
    publication: Arc<Publication>,
    _marker: PhantomData<fn(M)>,
}

impl<M: RosMessage> Publisher<M> {
    pub(crate) fn new(publication: Arc<Publication>) -> Self {
        Self {
            publication,
            _marker: PhantomData,
        }
    }

    /// Serialize and broadcast `msg`; returns the number of subscribers reached.
    pub async fn publish(&self, msg: &M) -> usize {
        self.publication.publish(msg.to_bytes()).await
    }

    pub fn topic(&self) -> &str {
        self.publication.topic()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.publication.subscriber_count().await
    }

    pub fn publication(&self) -> &Arc<Publication> {
        &self.publication
    }
}

impl<M> Clone for Publisher<M> {
    fn clone(&self) -> Self {
        Self {
            publication: self.publication.clone(),
            _marker: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgs::StringMsg;
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;
    use std::task::{Context, Poll};
    use tokio::io::AsyncReadExt;

    /// Writer that counts write attempts and optionally fails them.
    struct ProbeWriter {
        attempts: Arc<AtomicUsize>,
        fail: bool,
    }

    impl ProbeWriter {
        fn new(fail: bool) -> (Self, Arc<AtomicUsize>) {
            let attempts = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    attempts: attempts.clone(),
                    fail,
                },
                attempts,
            )
        }
    }

    impl AsyncWrite for ProbeWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
            } else {
                Poll::Ready(Ok(buf.len()))
            }
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn publication(latching: bool) -> Publication {
        Publication::new(
            "/chatter",
            TopicType::of::<StringMsg>(),
            latching,
            Arc::new(BrokenSocketRegistry::new()),
        )
    }

    #[tokio::test]
    async fn test_broadcast_isolates_failing_subscriber() {
        let publication = publication(false);
        let (w1, a1) = ProbeWriter::new(false);
        let (w2, a2) = ProbeWriter::new(true);
        let (w3, a3) = ProbeWriter::new(false);
        publication.add_subscriber(SubscriberConnection::new("/one", w1)).await;
        publication.add_subscriber(SubscriberConnection::new("/two", w2)).await;
        publication.add_subscriber(SubscriberConnection::new("/three", w3)).await;

        let body = StringMsg::new("hello").to_bytes();
        assert_eq!(publication.publish(body.clone()).await, 2);
        let failed_attempts = a2.load(Ordering::SeqCst);
        assert!(failed_attempts > 0);

        assert_eq!(publication.publish(body).await, 2);
        assert_eq!(a2.load(Ordering::SeqCst), failed_attempts);
        assert!(a1.load(Ordering::SeqCst) > 0);
        assert!(a3.load(Ordering::SeqCst) > 0);
        assert_eq!(publication.broken.len(), 1);
    }

    #[tokio::test]
    async fn test_write_message_skips_known_broken() {
        let broken = BrokenSocketRegistry::new();
        let (writer, attempts) = ProbeWriter::new(false);
        let mut conn = SubscriberConnection::new("/peer", writer);
        broken.mark(conn.id());

        assert_eq!(write_message(&mut conn, b"x", &broken, None).await, 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_write_timeout_marks_broken() {
        let broken = BrokenSocketRegistry::new();
        // Tiny duplex: a large body blocks once the pipe is full.
        let (client, _server) = tokio::io::duplex(8);
        let mut conn = SubscriberConnection::new("/slow", client);

        let written = write_message(
            &mut conn,
            &[0u8; 1024],
            &broken,
            Some(Duration::from_millis(20)),
        )
        .await;
        assert_eq!(written, 0);
        assert!(broken.contains(conn.id()));
    }

    #[tokio::test]
    async fn test_latched_message_goes_to_new_subscriber_only() {
        let publication = publication(true);
        let (old_writer, old_attempts) = ProbeWriter::new(false);
        publication
            .add_subscriber(SubscriberConnection::new("/old", old_writer))
            .await;

        let body = StringMsg::new("latched").to_bytes();
        assert_eq!(publication.publish(body.clone()).await, 1);
        let old_before = old_attempts.load(Ordering::SeqCst);

        let (client, mut server) = tokio::io::duplex(1024);
        let replayed = publication
            .add_subscriber(SubscriberConnection::new("/new", client))
            .await;
        assert_eq!(replayed, 1);
        assert_eq!(old_attempts.load(Ordering::SeqCst), old_before);

        let len = server.read_u32_le().await.unwrap() as usize;
        let mut got = vec![0u8; len];
        server.read_exact(&mut got).await.unwrap();
        assert_eq!(got, body);
    }

    #[tokio::test]
    async fn test_non_latching_keeps_no_cache() {
        let publication = publication(false);
        publication.publish(StringMsg::new("x").to_bytes()).await;
        assert!(publication.latched_message().is_none());

        let (writer, attempts) = ProbeWriter::new(false);
        let replayed = publication
            .add_subscriber(SubscriberConnection::new("/late", writer))
            .await;
        assert_eq!(replayed, 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_negotiate_md5_gate() {
        let publication = Publication::new(
            "/chatter",
            TopicType {
                type_name: "std_msgs/String".into(),
                definition: "string data".into(),
                md5sum: "abc123".into(),
            },
            true,
            Arc::new(BrokenSocketRegistry::new()),
        );

        let wildcard = ConnectionHeader::new().with(fields::MD5SUM, "*");
        let reply = publication.negotiate(&wildcard, "/talker").unwrap();
        assert_eq!(reply.get(fields::MD5SUM), Some("abc123"));
        assert_eq!(reply.get(fields::LATCHING), Some("1"));
        assert_eq!(reply.get(fields::CALLERID), Some("/talker"));
        assert_eq!(reply.get(fields::TYPE), Some("std_msgs/String"));
        assert_eq!(reply.get(fields::MESSAGE_DEFINITION), Some("string data"));

        let exact = ConnectionHeader::new().with(fields::MD5SUM, "ABC123");
        assert!(publication.negotiate(&exact, "/talker").is_ok());

        let wrong = ConnectionHeader::new().with(fields::MD5SUM, "xyz999");
        let err = publication.negotiate(&wrong, "/talker").unwrap_err();
        assert!(err.is_malformed_header());
        let text = err.to_string();
        assert!(text.contains("xyz999") && text.contains("abc123"));

        let missing = ConnectionHeader::new().with(fields::TOPIC, "/chatter");
        assert!(matches!(
            publication.negotiate(&missing, "/talker"),
            Err(TcprosError::MissingField(_))
        ));
    }
}

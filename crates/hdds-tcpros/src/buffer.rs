// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded message queue with drop-oldest overflow.
//!
//! One ingestion task produces, application code consumes. When the queue
//! is full the oldest unread message is evicted to make room, like a
//! KeepLast history.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;

/// Drop-oldest bounded queue.
#[derive(Debug)]
pub struct MessageBuffer<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped_total: AtomicU64,
}

impl<T> MessageBuffer<T> {
    /// Create a buffer holding at most `capacity` messages (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped_total: AtomicU64::new(0),
        }
    }

    /// Enqueue `item`, evicting the oldest entries if the buffer is full.
    ///
    /// Returns the number of messages dropped by this call.
    pub fn push(&self, item: T) -> usize {
        let mut dropped = 0;
        {
            let mut queue = self.queue.lock();
            while queue.len() >= self.capacity {
                queue.pop_front();
                dropped += 1;
            }
            queue.push_back(item);
        }

        if dropped > 0 {
            self.dropped_total
                .fetch_add(dropped as u64, Ordering::Relaxed);
        }
        self.notify.notify_one();
        dropped
    }

    /// Dequeue the oldest message without waiting.
    pub fn try_pop(&self) -> Option<T> {
        self.queue.lock().pop_front()
    }

    /// Wait for the next message.
    ///
    /// Returns `None` once the buffer is closed and drained.
    pub async fn recv(&self) -> Option<T> {
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Take every queued message, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.queue.lock().drain(..).collect()
    }

    /// Wake pending receivers; they return `None` after draining.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Wake one waiting receiver without enqueuing anything.
    pub(crate) fn wake(&self) {
        self.notify.notify_one();
    }

    /// Future completing on the next push, close or wake.
    pub(crate) fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages evicted since creation.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_push_below_capacity_drops_nothing() {
        let buffer = MessageBuffer::new(3);
        assert_eq!(buffer.push(1), 0);
        assert_eq!(buffer.push(2), 0);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_full_buffer_drops_oldest() {
        let buffer = MessageBuffer::new(3);
        for i in 1..=3 {
            buffer.push(i);
        }

        assert_eq!(buffer.push(4), 1);
        assert_eq!(buffer.drain(), vec![2, 3, 4]);
        assert_eq!(buffer.dropped_total(), 1);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let buffer = MessageBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        buffer.push("a");
        assert_eq!(buffer.push("b"), 1);
        assert_eq!(buffer.try_pop(), Some("b"));
        assert_eq!(buffer.try_pop(), None);
    }

    #[tokio::test]
    async fn test_recv_waits_for_producer() {
        let buffer = Arc::new(MessageBuffer::new(4));
        let producer = buffer.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.push(42);
        });

        let got = tokio::time::timeout(Duration::from_secs(2), buffer.recv())
            .await
            .unwrap();
        assert_eq!(got, Some(42));
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let buffer = MessageBuffer::new(4);
        buffer.push(1);
        buffer.close();

        assert_eq!(buffer.recv().await, Some(1));
        assert_eq!(buffer.recv().await, None);
    }
}

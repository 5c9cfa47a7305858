//! In-process broker backed by one `tokio::sync::broadcast` channel per topic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use latch_core::Topic;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, info};

use crate::subscription::{Delivery, Subscription, SubscriptionId};
use crate::{BusError, EventBus, Payload, Result};

/// Default per-topic buffer size.
pub const DEFAULT_CAPACITY: usize = 1024;

struct Inner {
    topics: HashMap<Topic, broadcast::Sender<Payload>>,
    closed: bool,
}

/// Broadcast-channel event bus living inside the server process.
///
/// Each subscriber gets its own receiver; `capacity` bounds how far a single
/// subscriber may fall behind before it starts observing [`Delivery::Lagged`].
pub struct InProcessBus {
    capacity: usize,
    inner: RwLock<Inner>,
    next_id: AtomicU64,
}

impl InProcessBus {
    /// Create a bus whose topics buffer up to `capacity` payloads.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(Inner {
                topics: HashMap::new(),
                closed: false,
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Shut the bus down.
    ///
    /// Every live subscription stream ends; later publishes and subscribes
    /// fail with [`BusError::Closed`].
    pub fn close(&self) {
        let mut inner = self.inner.write();
        if inner.closed {
            return;
        }
        inner.closed = true;
        let topics = inner.topics.len();
        inner.topics.clear();
        info!(topics, "event bus closed");
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl EventBus for InProcessBus {
    async fn publish(&self, topic: &Topic, payload: Payload) -> Result<usize> {
        let inner = self.inner.read();
        if inner.closed {
            return Err(BusError::Closed);
        }
        let Some(tx) = inner.topics.get(topic) else {
            return Ok(0);
        };
        // A send error only means nobody is subscribed right now.
        Ok(tx.send(payload).unwrap_or(0))
    }

    async fn subscribe(&self, topic: &Topic) -> Result<Subscription> {
        let rx = {
            let mut inner = self.inner.write();
            if inner.closed {
                return Err(BusError::Closed);
            }
            let capacity = self.capacity;
            inner
                .topics
                .entry(topic.clone())
                .or_insert_with(|| broadcast::channel(capacity).0)
                .subscribe()
        };
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(subscription = %id, %topic, "subscribed");

        let stream = BroadcastStream::new(rx).map(|item| match item {
            Ok(payload) => Delivery::Message(payload),
            Err(BroadcastStreamRecvError::Lagged(n)) => Delivery::Lagged(n),
        });
        Ok(Subscription::new(id, topic.clone(), stream))
    }

    fn subscriber_count(&self, topic: &Topic) -> usize {
        self.inner
            .read()
            .topics
            .get(topic)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

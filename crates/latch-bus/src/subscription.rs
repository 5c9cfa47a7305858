//! A single subscriber's view of a topic.

use std::fmt;

use futures::stream::{BoxStream, Stream, StreamExt};
use latch_core::Topic;
use tracing::debug;

use crate::Payload;

/// Identifier of one subscription, unique within a bus instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

/// One item observed on a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// A published payload, verbatim.
    Message(Payload),
    /// The subscriber fell behind and this many payloads were skipped.
    Lagged(u64),
}

/// A dedicated subscription owned by exactly one consumer.
///
/// The stream ends (`recv` returns `None`) when the bus closes the topic.
pub struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    stream: BoxStream<'static, Delivery>,
}

impl Subscription {
    /// Wrap a bus-specific stream.
    pub fn new<S>(id: SubscriptionId, topic: Topic, stream: S) -> Self
    where
        S: Stream<Item = Delivery> + Send + 'static,
    {
        Self {
            id,
            topic,
            stream: stream.boxed(),
        }
    }

    /// Subscription identifier.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Topic this subscription is bound to.
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Wait for the next delivery. Cancel-safe.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.stream.next().await
    }

    /// Cancel the subscription. No further deliveries are observed.
    pub fn unsubscribe(self) {
        debug!(subscription = %self.id, topic = %self.topic, "unsubscribed");
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

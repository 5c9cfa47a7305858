//! Test doubles shared by unit tests.

use async_trait::async_trait;
use latch_bus::{BusError, EventBus, Payload, Subscription};
use latch_core::Topic;

/// A bus whose every operation fails as if the broker were unreachable.
pub(crate) struct FailingBus;

#[async_trait]
impl EventBus for FailingBus {
    async fn publish(&self, _: &Topic, _: Payload) -> latch_bus::Result<usize> {
        Err(BusError::Unavailable("connection refused".into()))
    }

    async fn subscribe(&self, _: &Topic) -> latch_bus::Result<Subscription> {
        Err(BusError::Unavailable("connection refused".into()))
    }

    fn subscriber_count(&self, _: &Topic) -> usize {
        0
    }
}

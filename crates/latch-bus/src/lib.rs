//! # latch-bus
//!
//! Publish/subscribe transport used to fan change notifications out to relay
//! workers.
//!
//! - [`EventBus`]: the capability the rest of the system depends on
//! - [`Subscription`]: one subscriber's private stream of payloads, cancelled
//!   by [`Subscription::unsubscribe`] (or by dropping it)
//! - [`InProcessBus`]: broadcast-channel broker, one channel per topic
//!
//! Delivery semantics: a publish reaches exactly the subscriptions that are
//! live at the moment of the publish, in publish order per subscription. A
//! subscription that falls further behind than the bus buffer observes
//! [`Delivery::Lagged`] instead of the skipped payloads.

#![deny(unsafe_code)]

pub mod memory;
pub mod subscription;

use std::sync::Arc;

use async_trait::async_trait;
use latch_core::Topic;
use thiserror::Error;

pub use memory::InProcessBus;
pub use subscription::{Delivery, Subscription, SubscriptionId};

/// Serialized event text as it travels through the bus.
pub type Payload = Arc<str>;

/// Errors surfaced by a bus implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The bus has been shut down.
    #[error("event bus is closed")]
    Closed,
    /// The bus could not be reached.
    #[error("event bus unavailable: {0}")]
    Unavailable(String),
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// A publish/subscribe transport.
///
/// Implementations must allow `publish` concurrently with any number of live
/// subscriptions.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Hand `payload` to every current subscriber of `topic`.
    ///
    /// Returns the number of subscriptions the payload was handed to. Does
    /// not wait for any subscriber to consume it.
    async fn publish(&self, topic: &Topic, payload: Payload) -> Result<usize>;

    /// Open a new, dedicated subscription to `topic`.
    async fn subscribe(&self, topic: &Topic) -> Result<Subscription>;

    /// Number of live subscriptions on `topic`.
    fn subscriber_count(&self, topic: &Topic) -> usize;
}

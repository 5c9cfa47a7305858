//! Publish side of the relay: write handlers hand change events here.

use std::sync::Arc;

use latch_bus::{BusError, EventBus};
use latch_core::{ChangeEvent, Topic};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::metrics::{RELAY_EVENTS_PUBLISHED_TOTAL, RELAY_PUBLISH_ERRORS_TOTAL};

/// Why an event did not reach the bus.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The event could not be encoded.
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
    /// The bus rejected the publish.
    #[error("failed to publish event: {0}")]
    Bus(#[from] BusError),
}

/// Serializes change events once and publishes them on the relay topic.
///
/// Publishing is fire-and-forget: there is no retry, and failures never roll
/// back the mutation that produced the event.
pub struct PublishGateway {
    bus: Arc<dyn EventBus>,
    topic: Topic,
}

impl PublishGateway {
    /// Create a gateway publishing on `topic`.
    pub fn new(bus: Arc<dyn EventBus>, topic: Topic) -> Self {
        Self { bus, topic }
    }

    /// Topic events are published on.
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Publish `event`, returning how many subscriptions it was handed to.
    #[instrument(skip_all, fields(event = %event.kind()))]
    pub async fn publish(&self, event: &ChangeEvent) -> Result<usize, PublishError> {
        let kind = event.kind().as_str();
        let json = match event.to_json() {
            Ok(json) => json,
            Err(e) => {
                metrics::counter!(RELAY_PUBLISH_ERRORS_TOTAL, "event" => kind).increment(1);
                return Err(e.into());
            }
        };
        match self.bus.publish(&self.topic, Arc::from(json)).await {
            Ok(recipients) => {
                metrics::counter!(RELAY_EVENTS_PUBLISHED_TOTAL, "event" => kind).increment(1);
                debug!(recipients, "event published");
                Ok(recipients)
            }
            Err(e) => {
                metrics::counter!(RELAY_PUBLISH_ERRORS_TOTAL, "event" => kind).increment(1);
                Err(e.into())
            }
        }
    }

    /// Publish `event` and log, rather than return, any failure.
    pub async fn notify(&self, event: &ChangeEvent) {
        if let Err(e) = self.publish(event).await {
            warn!(event = %event.kind(), error = %e, "change notification not published");
        }
    }
}

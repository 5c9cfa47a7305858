//! Per-connection state shared between the relay worker and the registry.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use latch_bus::Payload;
use latch_core::ConnectionId;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;

/// Lifecycle of one relay connection.
///
/// `Connecting -> Active -> Closing -> Closed`, with `Connecting -> Closed`
/// when the subscription cannot be opened. `Closed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    /// Accepted; subscription not yet established.
    Connecting,
    /// Subscribed and forwarding events.
    Active,
    /// Teardown in progress.
    Closing,
    /// Fully torn down.
    Closed,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Active | Self::Closed)
                | (Self::Active, Self::Closing)
                | (Self::Closing, Self::Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Rejected state change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid connection transition {from} -> {to}")]
pub struct InvalidTransition {
    /// State the connection was in.
    pub from: ConnectionState,
    /// State that was requested.
    pub to: ConnectionState,
}

/// A close frame the server initiates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CloseReason {
    /// WebSocket close code.
    pub code: u16,
    /// Human-readable reason.
    pub reason: &'static str,
}

/// Items queued for the socket writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized change event, written verbatim as a text frame.
    Event(Payload),
    /// Keep-alive ping.
    Ping,
    /// Finish writing. Sends a close frame first when one is given.
    Close(Option<CloseReason>),
}

/// Result of queueing an item for the writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Queued for writing.
    Queued,
    /// Queue full; the item was discarded.
    Dropped,
    /// The writer is gone.
    Closed,
}

/// Serializable snapshot of one connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// Connection identifier.
    pub id: ConnectionId,
    /// Current lifecycle state.
    pub state: ConnectionState,
    /// When the connection was accepted (RFC 3339).
    pub connected_at: String,
    /// Events queued for the client so far.
    pub delivered: u64,
    /// Events this client never received.
    pub dropped: u64,
    /// Keep-alive pings queued.
    pub pings: u64,
}

/// A connected viewer.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    state: Mutex<ConnectionState>,
    /// Send channel to the socket writer task.
    tx: mpsc::Sender<Outbound>,
    /// When this connection was established.
    pub connected_at: Instant,
    connected_at_utc: DateTime<Utc>,
    /// When the last pong (or any client frame) was received.
    last_pong: Mutex<Instant>,
    delivered: AtomicU64,
    dropped: AtomicU64,
    pings: AtomicU64,
}

impl ClientConnection {
    /// Create a connection in the `Connecting` state.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Outbound>) -> Self {
        let now = Instant::now();
        Self {
            id,
            state: Mutex::new(ConnectionState::Connecting),
            tx,
            connected_at: now,
            connected_at_utc: Utc::now(),
            last_pong: Mutex::new(now),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            pings: AtomicU64::new(0),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Move to `next`, returning the previous state.
    pub fn transition(&self, next: ConnectionState) -> Result<ConnectionState, InvalidTransition> {
        let mut state = self.state.lock();
        let from = *state;
        if !from.can_transition_to(next) {
            return Err(InvalidTransition { from, to: next });
        }
        *state = next;
        Ok(from)
    }

    /// Queue an event for the client without waiting.
    pub fn send_event(&self, payload: Payload) -> SendOutcome {
        let outcome = self.try_queue(Outbound::Event(payload));
        match outcome {
            SendOutcome::Queued => {
                let _ = self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            SendOutcome::Dropped => self.record_dropped(1),
            SendOutcome::Closed => {}
        }
        outcome
    }

    /// Queue a keep-alive ping. A full queue skips this ping.
    pub fn send_ping(&self) -> SendOutcome {
        let outcome = self.try_queue(Outbound::Ping);
        if outcome == SendOutcome::Queued {
            let _ = self.pings.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    /// Ask the writer to finish, optionally with a close frame.
    pub fn send_close(&self, reason: Option<CloseReason>) -> SendOutcome {
        self.try_queue(Outbound::Close(reason))
    }

    fn try_queue(&self, item: Outbound) -> SendOutcome {
        match self.tx.try_send(item) {
            Ok(()) => SendOutcome::Queued,
            Err(TrySendError::Full(_)) => SendOutcome::Dropped,
            Err(TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Count events this client missed.
    pub fn record_dropped(&self, n: u64) {
        let _ = self.dropped.fetch_add(n, Ordering::Relaxed);
    }

    /// Events queued for this client.
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Events this client never received.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Keep-alive pings queued.
    pub fn ping_count(&self) -> u64 {
        self.pings.load(Ordering::Relaxed)
    }

    /// Record client activity.
    pub fn mark_alive(&self) {
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Snapshot for the `/connections` endpoint.
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.clone(),
            state: self.state(),
            connected_at: self
                .connected_at_utc
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            delivered: self.delivered_count(),
            dropped: self.drop_count(),
            pings: self.ping_count(),
        }
    }
}

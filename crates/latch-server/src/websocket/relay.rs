//! Per-connection relay worker.
//!
//! One worker runs per WebSocket client. It owns that client's bus
//! subscription and keep-alive timer, and a writer task that drains the
//! bounded outbound queue into the socket. The worker is generic over the
//! socket halves so tests can drive it through in-memory channels.

use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message};
use futures::{Sink, SinkExt, Stream, StreamExt};
use latch_bus::{BusError, Delivery, EventBus};
use latch_core::{ConnectionId, Topic};
use latch_settings::RelaySettings;
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::connection::{ClientConnection, CloseReason, ConnectionState, Outbound, SendOutcome};
use super::keepalive::{KeepAlive, is_unresponsive};
use super::registry::ConnectionRegistry;
use crate::metrics::{
    RELAY_DELIVERY_DROPS_TOTAL, RELAY_EVENTS_DELIVERED_TOTAL, RELAY_PINGS_SENT_TOTAL,
    RELAY_SUBSCRIPTION_ERRORS_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

/// Subscription could not be opened, or was lost mid-session.
pub const CLOSE_SUBSCRIPTION_ERROR: CloseReason = CloseReason {
    code: 1011,
    reason: "Subscription error",
};
/// Another live connection already uses the requested identifier.
pub const CLOSE_DUPLICATE: CloseReason = CloseReason {
    code: 1008,
    reason: "Duplicate connection",
};
/// The server is stopping.
pub const CLOSE_SHUTDOWN: CloseReason = CloseReason {
    code: 1001,
    reason: "Server shutting down",
};
/// The client stopped answering pings.
pub const CLOSE_UNRESPONSIVE: CloseReason = CloseReason {
    code: 1001,
    reason: "Ping timeout",
};

/// How long teardown waits for the writer to flush its queue.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything a relay worker needs besides its socket.
#[derive(Clone)]
pub struct RelayContext {
    /// Bus every worker subscribes to.
    pub bus: Arc<dyn EventBus>,
    /// Live connection registry.
    pub registry: Arc<ConnectionRegistry>,
    /// Topic carrying change events.
    pub topic: Topic,
    /// Keep-alive period.
    pub ping_interval: Duration,
    /// Liveness timeout; `None` disables it.
    pub pong_timeout: Option<Duration>,
    /// Per-connection outbound queue length.
    pub outbound_queue: usize,
    /// Cancelled when the server shuts down.
    pub shutdown: CancellationToken,
}

impl RelayContext {
    /// Build a context from relay settings.
    pub fn new(
        bus: Arc<dyn EventBus>,
        registry: Arc<ConnectionRegistry>,
        settings: &RelaySettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            bus,
            registry,
            topic: Topic::new(settings.topic.clone()),
            ping_interval: settings.ping_interval(),
            pong_timeout: settings.pong_timeout(),
            outbound_queue: settings.outbound_queue.max(1),
            shutdown,
        }
    }
}

/// Why an active connection was torn down.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TeardownReason {
    /// The client sent a close frame.
    ClientClosed,
    /// Socket read/write failure or abrupt disconnect.
    Transport(String),
    /// The bus ended the subscription.
    SubscriptionLost,
    /// The server is shutting down.
    Shutdown,
    /// No pong within the configured timeout.
    Unresponsive,
}

impl TeardownReason {
    /// Metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::Transport(_) => "transport",
            Self::SubscriptionLost => "subscription_lost",
            Self::Shutdown => "shutdown",
            Self::Unresponsive => "unresponsive",
        }
    }

    /// Close frame the server sends, if any.
    pub fn close_reason(&self) -> Option<CloseReason> {
        match self {
            Self::ClientClosed | Self::Transport(_) => None,
            Self::SubscriptionLost => Some(CLOSE_SUBSCRIPTION_ERROR),
            Self::Shutdown => Some(CLOSE_SHUTDOWN),
            Self::Unresponsive => Some(CLOSE_UNRESPONSIVE),
        }
    }
}

impl Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(detail) => write!(f, "transport error: {detail}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Why a connection never became active.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// The identifier is already live.
    Duplicate,
    /// The bus refused the subscription.
    Subscription(BusError),
}

/// How a relay worker ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Closed before reaching `Active`.
    Rejected(RejectReason),
    /// Ran and was torn down.
    Closed(TeardownReason),
}

/// Run the relay for one client until it disconnects or the server stops.
#[instrument(skip_all, fields(conn_id = %id))]
pub async fn run_relay<W, R, E>(sink: W, mut stream: R, id: ConnectionId, ctx: RelayContext) -> RelayOutcome
where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display + Send,
    R: Stream<Item = Result<Message, E>> + Unpin + Send,
    E: Display + Send,
{
    let (tx, rx) = mpsc::channel(ctx.outbound_queue);
    let connection = Arc::new(ClientConnection::new(id, tx));

    let registration = match ctx.registry.register(connection.clone()) {
        Ok(registration) => registration,
        Err(e) => {
            warn!(error = %e, "rejecting connection");
            reject(sink, CLOSE_DUPLICATE).await;
            return RelayOutcome::Rejected(RejectReason::Duplicate);
        }
    };
    metrics::counter!(WS_CONNECTIONS_TOTAL).increment(1);

    let mut subscription = match ctx.bus.subscribe(&ctx.topic).await {
        Ok(subscription) => subscription,
        Err(e) => {
            metrics::counter!(RELAY_SUBSCRIPTION_ERRORS_TOTAL).increment(1);
            metrics::counter!(WS_DISCONNECTIONS_TOTAL, "reason" => "subscription_error").increment(1);
            warn!(error = %e, "subscription failed, closing connection");
            reject(sink, CLOSE_SUBSCRIPTION_ERROR).await;
            let _ = connection.transition(ConnectionState::Closed);
            drop(registration);
            return RelayOutcome::Rejected(RejectReason::Subscription(e));
        }
    };

    let _ = connection.transition(ConnectionState::Active);
    info!(subscription = %subscription.id(), topic = %ctx.topic, "relay active");

    let writer_failed = CancellationToken::new();
    let mut writer = tokio::spawn(write_outbound(sink, rx, writer_failed.clone()));
    let mut keepalive = KeepAlive::new(ctx.ping_interval);

    let reason = loop {
        tokio::select! {
            biased;

            () = ctx.shutdown.cancelled() => break TeardownReason::Shutdown,

            () = writer_failed.cancelled() => {
                break TeardownReason::Transport("socket write failed".into());
            }

            frame = stream.next() => match frame {
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "client sent close");
                    break TeardownReason::ClientClosed;
                }
                Some(Ok(Message::Text(_) | Message::Binary(_))) => {
                    connection.mark_alive();
                    trace!("ignoring client data frame");
                }
                Some(Ok(_)) => connection.mark_alive(),
                Some(Err(e)) => break TeardownReason::Transport(e.to_string()),
                None => break TeardownReason::Transport("connection reset".into()),
            },

            delivery = subscription.recv() => match delivery {
                Some(Delivery::Message(payload)) => match connection.send_event(payload) {
                    SendOutcome::Queued => {}
                    SendOutcome::Dropped => {
                        metrics::counter!(RELAY_DELIVERY_DROPS_TOTAL, "cause" => "queue_full").increment(1);
                        debug!("outbound queue full, event dropped");
                    }
                    SendOutcome::Closed => {
                        break TeardownReason::Transport("outbound queue closed".into());
                    }
                },
                Some(Delivery::Lagged(skipped)) => {
                    connection.record_dropped(skipped);
                    metrics::counter!(RELAY_DELIVERY_DROPS_TOTAL, "cause" => "lagged").increment(skipped);
                    warn!(skipped, "subscription lagged, events dropped");
                }
                None => break TeardownReason::SubscriptionLost,
            },

            _ = keepalive.tick() => {
                if is_unresponsive(connection.last_pong_elapsed(), ctx.pong_timeout) {
                    break TeardownReason::Unresponsive;
                }
                match connection.send_ping() {
                    SendOutcome::Queued => metrics::counter!(RELAY_PINGS_SENT_TOTAL).increment(1),
                    SendOutcome::Dropped => debug!("outbound queue full, ping skipped"),
                    SendOutcome::Closed => {
                        break TeardownReason::Transport("outbound queue closed".into());
                    }
                }
            }
        }
    };

    // Closing: timer, then subscription, then the socket.
    let _ = connection.transition(ConnectionState::Closing);
    drop(keepalive);
    subscription.unsubscribe();

    let flushed = match reason {
        TeardownReason::Transport(_) => false,
        _ => connection.send_close(reason.close_reason()) == SendOutcome::Queued,
    };
    if !flushed {
        writer.abort();
    }
    if time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        warn!("writer did not drain in time");
        writer.abort();
    }

    let _ = connection.transition(ConnectionState::Closed);
    drop(registration);

    metrics::counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
    metrics::histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
    info!(
        %reason,
        delivered = connection.delivered_count(),
        dropped = connection.drop_count(),
        "relay closed"
    );
    RelayOutcome::Closed(reason)
}

/// Drain the outbound queue into the socket.
///
/// Cancels `failed` on the first write error.
async fn write_outbound<W>(mut sink: W, mut rx: mpsc::Receiver<Outbound>, failed: CancellationToken)
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    while let Some(item) = rx.recv().await {
        let (message, is_event, last) = match item {
            Outbound::Event(payload) => (Message::Text(payload.to_string().into()), true, false),
            Outbound::Ping => (Message::Ping(Bytes::new()), false, false),
            Outbound::Close(Some(close)) => (close_message(close), false, true),
            Outbound::Close(None) => break,
        };
        if let Err(e) = sink.send(message).await {
            debug!(error = %e, "socket write failed");
            failed.cancel();
            return;
        }
        if is_event {
            metrics::counter!(RELAY_EVENTS_DELIVERED_TOTAL).increment(1);
        }
        if last {
            break;
        }
    }
    let _ = sink.close().await;
}

/// Close a socket that never became active.
async fn reject<W>(mut sink: W, close: CloseReason)
where
    W: Sink<Message> + Unpin,
{
    let _ = sink.send(close_message(close)).await;
    let _ = sink.close().await;
}

fn close_message(close: CloseReason) -> Message {
    Message::Close(Some(CloseFrame {
        code: close.code,
        reason: close.reason.to_owned().into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FailingBus;
    use assert_matches::assert_matches;
    use futures::channel::mpsc as channel;
    use latch_bus::InProcessBus;
    use std::io;
    use tokio::task::JoinHandle;

    type ClientTx = channel::UnboundedSender<Result<Message, io::Error>>;
    type ServerRx = channel::UnboundedReceiver<Message>;

    fn context(bus: Arc<dyn EventBus>, ping_interval: Duration) -> RelayContext {
        RelayContext {
            bus,
            registry: Arc::new(ConnectionRegistry::new()),
            topic: Topic::default(),
            ping_interval,
            pong_timeout: None,
            outbound_queue: 16,
            shutdown: CancellationToken::new(),
        }
    }

    fn spawn_relay(id: &str, ctx: &RelayContext) -> (ClientTx, ServerRx, JoinHandle<RelayOutcome>) {
        let (server_tx, server_rx) = channel::unbounded::<Message>();
        let (client_tx, client_rx) = channel::unbounded::<Result<Message, io::Error>>();
        let handle = tokio::spawn(run_relay(
            server_tx,
            client_rx,
            ConnectionId::from(id),
            ctx.clone(),
        ));
        (client_tx, server_rx, handle)
    }

    async fn wait_active(ctx: &RelayContext, id: &str) {
        let id = ConnectionId::from(id);
        while ctx.registry.state_of(&id) != Some(ConnectionState::Active) {
            tokio::task::yield_now().await;
        }
    }

    fn drain(rx: &mut ServerRx) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    fn text(message: &Message) -> &str {
        match message {
            Message::Text(text) => text.as_str(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    fn close_code(message: &Message) -> (u16, String) {
        match message {
            Message::Close(Some(frame)) => (frame.code, frame.reason.as_str().to_owned()),
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_gets_pings_and_no_events() {
        let bus = Arc::new(InProcessBus::new(64));
        let ctx = context(bus, Duration::from_secs(25));
        let (_client, mut server_rx, _handle) = spawn_relay("idle", &ctx);
        wait_active(&ctx, "idle").await;

        time::sleep(Duration::from_secs(30)).await;

        let frames = drain(&mut server_rx);
        let pings = frames.iter().filter(|m| matches!(m, Message::Ping(_))).count();
        let texts = frames.iter().filter(|m| matches!(m, Message::Text(_))).count();
        assert!(pings >= 1, "expected a keep-alive ping, got {frames:?}");
        assert_eq!(texts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn no_ping_before_first_interval() {
        let bus = Arc::new(InProcessBus::new(64));
        let ctx = context(bus, Duration::from_secs(25));
        let (_client, mut server_rx, _handle) = spawn_relay("early", &ctx);
        wait_active(&ctx, "early").await;

        time::sleep(Duration::from_secs(24)).await;
        assert!(drain(&mut server_rx).is_empty());
    }

    #[tokio::test]
    async fn events_forwarded_verbatim_in_order() {
        let bus = Arc::new(InProcessBus::new(64));
        let ctx = context(bus.clone(), Duration::from_secs(25));
        let (_client, mut server_rx, _handle) = spawn_relay("ordered", &ctx);
        wait_active(&ctx, "ordered").await;

        for i in 0..10 {
            let _ = bus
                .publish(&Topic::default(), Arc::from(format!("e{i}")))
                .await
                .unwrap();
        }
        for i in 0..10 {
            let message = server_rx.next().await.unwrap();
            assert_eq!(text(&message), format!("e{i}"));
        }
        tokio::task::yield_now().await;
        assert!(drain(&mut server_rx).is_empty());
    }

    #[tokio::test]
    async fn events_before_subscription_are_not_replayed() {
        let bus = Arc::new(InProcessBus::new(64));
        let ctx = context(bus.clone(), Duration::from_secs(25));
        let (_first, mut first_rx, _h1) = spawn_relay("first", &ctx);
        wait_active(&ctx, "first").await;
        let _ = bus.publish(&Topic::default(), Arc::from("early")).await.unwrap();

        let (_second, mut second_rx, _h2) = spawn_relay("second", &ctx);
        wait_active(&ctx, "second").await;
        let _ = bus.publish(&Topic::default(), Arc::from("late")).await.unwrap();

        assert_eq!(text(&first_rx.next().await.unwrap()), "early");
        assert_eq!(text(&first_rx.next().await.unwrap()), "late");
        assert_eq!(text(&second_rx.next().await.unwrap()), "late");
    }

    #[tokio::test]
    async fn client_close_tears_down_everything() {
        let bus = Arc::new(InProcessBus::new(64));
        let ctx = context(bus.clone(), Duration::from_secs(25));
        let (client, mut server_rx, handle) = spawn_relay("closer", &ctx);
        wait_active(&ctx, "closer").await;
        assert_eq!(bus.subscriber_count(&Topic::default()), 1);

        client.unbounded_send(Ok(Message::Close(None))).unwrap();
        let outcome = handle.await.unwrap();

        assert_eq!(outcome, RelayOutcome::Closed(TeardownReason::ClientClosed));
        assert!(ctx.registry.is_empty());
        assert_eq!(bus.subscriber_count(&Topic::default()), 0);
        assert!(server_rx.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn abrupt_disconnect_cleans_up_and_stops_pings() {
        let bus = Arc::new(InProcessBus::new(64));
        let ctx = context(bus.clone(), Duration::from_secs(1));
        let (client, mut server_rx, handle) = spawn_relay("gone", &ctx);
        wait_active(&ctx, "gone").await;

        drop(client);
        let outcome = handle.await.unwrap();

        assert_matches!(outcome, RelayOutcome::Closed(TeardownReason::Transport(_)));
        assert!(ctx.registry.is_empty());
        assert_eq!(bus.subscriber_count(&Topic::default()), 0);

        time::sleep(Duration::from_secs(10)).await;
        let frames = drain(&mut server_rx);
        assert!(
            !frames.iter().any(|m| matches!(m, Message::Ping(_))),
            "ping after teardown: {frames:?}"
        );
        assert!(server_rx.next().await.is_none());
    }

    #[tokio::test]
    async fn transport_error_tears_down() {
        let bus = Arc::new(InProcessBus::new(64));
        let ctx = context(bus.clone(), Duration::from_secs(25));
        let (client, _server_rx, handle) = spawn_relay("broken", &ctx);
        wait_active(&ctx, "broken").await;

        client
            .unbounded_send(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer")))
            .unwrap();
        let outcome = handle.await.unwrap();
        assert_eq!(
            outcome,
            RelayOutcome::Closed(TeardownReason::Transport("reset by peer".into()))
        );
        assert_eq!(bus.subscriber_count(&Topic::default()), 0);
    }

    #[tokio::test]
    async fn subscription_failure_closes_with_1011() {
        let ctx = context(Arc::new(FailingBus), Duration::from_secs(25));
        let (_client, mut server_rx, handle) = spawn_relay("nosub", &ctx);

        let outcome = handle.await.unwrap();
        assert_matches!(
            outcome,
            RelayOutcome::Rejected(RejectReason::Subscription(BusError::Unavailable(_)))
        );
        let close = server_rx.next().await.unwrap();
        assert_eq!(close_code(&close), (1011, "Subscription error".to_owned()));
        assert!(server_rx.next().await.is_none());
        assert!(ctx.registry.is_empty());
    }

    #[tokio::test]
    async fn duplicate_id_rejected_with_1008() {
        let bus = Arc::new(InProcessBus::new(64));
        let ctx = context(bus.clone(), Duration::from_secs(25));
        let (_first, _first_rx, _h1) = spawn_relay("same", &ctx);
        wait_active(&ctx, "same").await;

        let (_second, mut second_rx, h2) = spawn_relay("same", &ctx);
        assert_eq!(h2.await.unwrap(), RelayOutcome::Rejected(RejectReason::Duplicate));
        let close = second_rx.next().await.unwrap();
        assert_eq!(close_code(&close), (1008, "Duplicate connection".to_owned()));

        assert_eq!(
            ctx.registry.state_of(&ConnectionId::from("same")),
            Some(ConnectionState::Active)
        );
        assert_eq!(bus.subscriber_count(&Topic::default()), 1);
    }

    #[tokio::test]
    async fn shutdown_closes_with_1001() {
        let bus = Arc::new(InProcessBus::new(64));
        let ctx = context(bus.clone(), Duration::from_secs(25));
        let (_client, mut server_rx, handle) = spawn_relay("bye", &ctx);
        wait_active(&ctx, "bye").await;

        ctx.shutdown.cancel();
        assert_eq!(
            handle.await.unwrap(),
            RelayOutcome::Closed(TeardownReason::Shutdown)
        );
        let close = server_rx.next().await.unwrap();
        assert_eq!(close_code(&close), (1001, "Server shutting down".to_owned()));
        assert!(ctx.registry.is_empty());
    }

    #[tokio::test]
    async fn bus_close_ends_session_with_1011() {
        let bus = Arc::new(InProcessBus::new(64));
        let ctx = context(bus.clone(), Duration::from_secs(25));
        let (_client, mut server_rx, handle) = spawn_relay("lost", &ctx);
        wait_active(&ctx, "lost").await;

        bus.close();
        assert_eq!(
            handle.await.unwrap(),
            RelayOutcome::Closed(TeardownReason::SubscriptionLost)
        );
        let close = server_rx.next().await.unwrap();
        assert_eq!(close_code(&close).0, 1011);
    }

    #[tokio::test]
    async fn bus_lag_counts_as_drop() {
        let bus = Arc::new(InProcessBus::new(2));
        let ctx = context(bus.clone(), Duration::from_secs(25));
        let (_client, mut server_rx, _handle) = spawn_relay("slow", &ctx);
        wait_active(&ctx, "slow").await;
        let conn = ctx.registry.get(&ConnectionId::from("slow")).unwrap();

        // No yield between publishes, so the worker falls behind the bus.
        for i in 0..5 {
            let _ = bus
                .publish(&Topic::default(), Arc::from(format!("e{i}")))
                .await
                .unwrap();
        }
        assert_eq!(text(&server_rx.next().await.unwrap()), "e3");
        assert_eq!(text(&server_rx.next().await.unwrap()), "e4");
        assert_eq!(conn.drop_count(), 3);
    }

    #[tokio::test]
    async fn full_outbound_queue_drops_events() {
        let bus = Arc::new(InProcessBus::new(64));
        let mut ctx = context(bus.clone(), Duration::from_secs(25));
        ctx.outbound_queue = 1;

        // A socket that accepts one frame and then stalls.
        let (server_tx, _server_rx) = channel::channel::<Message>(0);
        let (_client, client_rx) = channel::unbounded::<Result<Message, io::Error>>();
        let _handle = tokio::spawn(run_relay(
            server_tx,
            client_rx,
            ConnectionId::from("stalled"),
            ctx.clone(),
        ));
        wait_active(&ctx, "stalled").await;
        let conn = ctx.registry.get(&ConnectionId::from("stalled")).unwrap();

        for i in 0..10 {
            let _ = bus
                .publish(&Topic::default(), Arc::from(format!("e{i}")))
                .await
                .unwrap();
            tokio::task::yield_now().await;
        }
        while conn.delivered_count() + conn.drop_count() < 10 {
            tokio::task::yield_now().await;
        }
        assert!(conn.drop_count() >= 1);
        assert_eq!(conn.state(), ConnectionState::Active);
    }

    #[tokio::test]
    async fn stalled_peer_does_not_hold_back_healthy_one() {
        let bus = Arc::new(InProcessBus::new(64));
        let ctx = context(bus.clone(), Duration::from_secs(25));
        let (_healthy, mut healthy_rx, _h1) = spawn_relay("healthy", &ctx);

        let mut stalled_ctx = ctx.clone();
        stalled_ctx.outbound_queue = 1;
        let (server_tx, _stalled_rx) = channel::channel::<Message>(0);
        let (_stalled, client_rx) = channel::unbounded::<Result<Message, io::Error>>();
        let _h2 = tokio::spawn(run_relay(
            server_tx,
            client_rx,
            ConnectionId::from("stalled"),
            stalled_ctx,
        ));
        wait_active(&ctx, "healthy").await;
        wait_active(&ctx, "stalled").await;
        let stalled = ctx.registry.get(&ConnectionId::from("stalled")).unwrap();
        let healthy = ctx.registry.get(&ConnectionId::from("healthy")).unwrap();

        for i in 0..10 {
            let _ = bus
                .publish(&Topic::default(), Arc::from(format!("e{i}")))
                .await
                .unwrap();
            tokio::task::yield_now().await;
        }
        for i in 0..10 {
            assert_eq!(text(&healthy_rx.next().await.unwrap()), format!("e{i}"));
        }
        while stalled.delivered_count() + stalled.drop_count() < 10 {
            tokio::task::yield_now().await;
        }

        assert!(stalled.drop_count() > 0);
        assert_eq!(healthy.drop_count(), 0);
        assert_eq!(stalled.state(), ConnectionState::Active);
        assert_eq!(healthy.state(), ConnectionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn unresponsive_client_closed_when_timeout_enabled() {
        let bus = Arc::new(InProcessBus::new(64));
        let mut ctx = context(bus.clone(), Duration::from_secs(1));
        ctx.pong_timeout = Some(Duration::from_secs(2));
        let (_client, mut server_rx, handle) = spawn_relay("silent", &ctx);

        assert_eq!(
            handle.await.unwrap(),
            RelayOutcome::Closed(TeardownReason::Unresponsive)
        );
        let frames = drain(&mut server_rx);
        assert!(frames.iter().any(|m| matches!(m, Message::Ping(_))));
        assert_eq!(close_code(frames.last().unwrap()), (1001, "Ping timeout".to_owned()));
        assert_eq!(bus.subscriber_count(&Topic::default()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pongs_keep_connection_alive() {
        let bus = Arc::new(InProcessBus::new(64));
        let mut ctx = context(bus, Duration::from_secs(1));
        ctx.pong_timeout = Some(Duration::from_secs(2));
        let (client, _server_rx, _handle) = spawn_relay("chatty", &ctx);
        wait_active(&ctx, "chatty").await;

        for _ in 0..5 {
            time::sleep(Duration::from_millis(900)).await;
            client.unbounded_send(Ok(Message::Pong(Bytes::new()))).unwrap();
        }
        assert_eq!(
            ctx.registry.state_of(&ConnectionId::from("chatty")),
            Some(ConnectionState::Active)
        );
    }

    #[test]
    fn teardown_close_frames() {
        assert_eq!(TeardownReason::ClientClosed.close_reason(), None);
        assert_eq!(TeardownReason::Transport("x".into()).close_reason(), None);
        assert_eq!(TeardownReason::Shutdown.close_reason(), Some(CLOSE_SHUTDOWN));
        assert_eq!(
            TeardownReason::SubscriptionLost.close_reason(),
            Some(CLOSE_SUBSCRIPTION_ERROR)
        );
        assert_eq!(TeardownReason::Transport("eof".into()).to_string(), "transport error: eof");
    }

    #[test]
    fn context_from_settings() {
        let settings = RelaySettings {
            pong_timeout_secs: Some(60),
            ..RelaySettings::default()
        };
        let ctx = RelayContext::new(
            Arc::new(InProcessBus::default()),
            Arc::new(ConnectionRegistry::new()),
            &settings,
            CancellationToken::new(),
        );
        assert_eq!(ctx.topic, Topic::default());
        assert_eq!(ctx.ping_interval, Duration::from_secs(25));
        assert_eq!(ctx.pong_timeout, Some(Duration::from_secs(60)));
        assert_eq!(ctx.outbound_queue, 256);
    }
}

//! `LatchServer`: Axum HTTP + WebSocket server.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use futures::StreamExt;
use latch_bus::EventBus;
use latch_core::{ConnectionId, Topic};
use latch_settings::LatchSettings;
use latch_store::AccessStore;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::gateway::PublishGateway;
use crate::handlers;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::{ConnectionRegistry, RelayContext, run_relay};

/// Server startup failures.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The bound address could not be read back.
    #[error("failed to read local address: {0}")]
    LocalAddr(#[source] io::Error),
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Card and scan-history store.
    pub store: Arc<AccessStore>,
    /// Publishes change events after mutations.
    pub gateway: Arc<PublishGateway>,
    /// Everything a relay worker needs.
    pub relay: RelayContext,
    /// Tracks relay workers for graceful shutdown.
    pub tracker: TaskTracker,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Largest inbound WebSocket message accepted.
    pub max_message_size: usize,
}

/// The Latch relay server.
pub struct LatchServer {
    settings: LatchSettings,
    state: AppState,
    shutdown: Arc<ShutdownCoordinator>,
}

impl LatchServer {
    /// Create a server over `store`, publishing and subscribing through `bus`.
    pub fn new(settings: LatchSettings, store: Arc<AccessStore>, bus: Arc<dyn EventBus>) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let gateway = Arc::new(PublishGateway::new(
            bus.clone(),
            Topic::new(settings.relay.topic.clone()),
        ));
        let relay = RelayContext::new(bus, registry, &settings.relay, shutdown.token());
        let state = AppState {
            store,
            gateway,
            relay,
            tracker: shutdown.tracker().clone(),
            start_time: Instant::now(),
            metrics: None,
            max_message_size: settings.server.max_message_size,
        };
        Self {
            settings,
            state,
            shutdown,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/scan", post(handlers::scan))
            .route("/add-card", post(handlers::add_card))
            .route("/delete-card", delete(handlers::delete_card))
            .route("/valid-cards", get(handlers::valid_cards))
            .route("/scan-history", get(handlers::scan_history))
            .route("/health", get(handlers::health))
            .route("/connections", get(handlers::connections))
            .route("/metrics", get(handlers::render_metrics))
            .route("/ws", get(ws_handler))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and start serving in the background.
    pub async fn listen(&self) -> Result<ServerHandle, ServerError> {
        let addr = format!("{}:{}", self.settings.server.host, self.settings.server.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;
        info!(%local_addr, "latch server listening");

        let router = self.router();
        let token = self.shutdown.token();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
        });
        Ok(ServerHandle {
            addr: local_addr,
            task,
        })
    }

    /// Stop accepting connections, close every relay, and wait for them.
    ///
    /// Returns `false` if the drain timed out.
    pub async fn shutdown_gracefully(&self, handle: ServerHandle) -> bool {
        let timeout = self.settings.relay.shutdown_timeout();
        let drained = self.shutdown.graceful_shutdown(timeout).await;
        match tokio::time::timeout(timeout, handle.task).await {
            Ok(Ok(Ok(()))) => debug!("listener stopped"),
            Ok(Ok(Err(e))) => warn!(error = %e, "listener exited with error"),
            Ok(Err(e)) => warn!(error = %e, "listener task failed"),
            Err(_) => warn!("listener did not stop in time"),
        }
        drained
    }

    /// Connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.state.relay.registry
    }

    /// Publish gateway.
    pub fn gateway(&self) -> &Arc<PublishGateway> {
        &self.state.gateway
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server settings.
    pub fn settings(&self) -> &LatchSettings {
        &self.settings
    }
}

/// A running listener.
pub struct ServerHandle {
    addr: SocketAddr,
    task: JoinHandle<io::Result<()>>,
}

impl ServerHandle {
    /// Address actually bound (resolves port `0`).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// `GET /ws` query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Client-chosen stable identifier.
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
}

/// GET /ws: upgrade and hand the socket to a relay worker.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    if state.relay.shutdown.is_cancelled() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Server shutting down.").into_response();
    }
    let id = match params.client_id.as_deref() {
        Some(raw) => match ConnectionId::from_client(raw) {
            Some(id) => id,
            None => return (StatusCode::BAD_REQUEST, "Invalid clientId.").into_response(),
        },
        None => ConnectionId::new(),
    };

    let ctx = state.relay.clone();
    let tracker = state.tracker.clone();
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| {
            let (sink, stream) = socket.split();
            tracker.track_future(async move {
                let _ = run_relay(sink, stream, id, ctx).await;
            })
        })
}

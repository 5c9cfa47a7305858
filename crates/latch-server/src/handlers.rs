//! HTTP handlers for the card and scan endpoints.
//!
//! Every successful mutation is followed by a change notification through the
//! [`PublishGateway`](crate::gateway::PublishGateway). A failed notification
//! is logged and never changes the response.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use latch_core::{ChangeEvent, ScanEntry};
use latch_store::{AccessStore, StoreError};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::health::{self, HealthResponse};
use crate::server::AppState;
use crate::websocket::ConnectionInfo;

/// Request failures and the response each maps to.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No card identifier in the body.
    #[error("Card is required.")]
    CardRequired,
    /// Card identifier rejected by the store.
    #[error("Invalid card.")]
    InvalidCard,
    /// Body is not valid JSON.
    #[error("Invalid JSON body.")]
    InvalidBody,
    /// Card already in the valid set.
    #[error("Card already exists.")]
    CardExists,
    /// Card not in the valid set.
    #[error("Card not found.")]
    CardNotFound,
    /// Store failure.
    #[error("Internal server error.")]
    Internal,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::CardRequired | Self::InvalidCard | Self::InvalidBody | Self::CardExists => {
                StatusCode::BAD_REQUEST
            }
            Self::CardNotFound => StatusCode::NOT_FOUND,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidCard(_) => Self::InvalidCard,
            other => {
                error!(error = %other, "store operation failed");
                Self::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// `POST /scan` body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanRequest {
    /// Card presented at the reader.
    pub entered_key: Option<String>,
}

/// `POST /add-card` body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AddCardRequest {
    /// Card to add.
    pub new_key_code: Option<String>,
}

/// `DELETE /delete-card` body.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DeleteCardRequest {
    /// Card to remove.
    pub card: Option<String>,
}

/// Parse a JSON body, treating an empty body as all fields missing.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|_| ApiError::InvalidBody)
}

fn required(card: Option<String>) -> Result<String, ApiError> {
    card.map(|c| c.trim().to_owned())
        .filter(|c| !c.is_empty())
        .ok_or(ApiError::CardRequired)
}

/// Run a store operation on the blocking pool.
async fn with_store<T, F>(store: &Arc<AccessStore>, op: F) -> Result<T, ApiError>
where
    F: FnOnce(&AccessStore) -> latch_store::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    let result = tokio::task::spawn_blocking(move || op(&store))
        .await
        .map_err(|e| {
            error!(error = %e, "store task failed");
            ApiError::Internal
        })?;
    Ok(result?)
}

/// POST /scan
#[instrument(skip_all)]
pub async fn scan(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let request: ScanRequest = parse_body(&body)?;
    let key = required(request.entered_key)?;
    let entry = with_store(&state.store, move |store| store.record_scan(&key)).await?;

    state.gateway.notify(&ChangeEvent::new_scan(&entry)).await;

    info!(entered_key = %entry.entered_key, success = entry.success, "card scanned");
    let response = if entry.success {
        (StatusCode::OK, "Access granted!")
    } else {
        (StatusCode::UNAUTHORIZED, "Access denied!")
    };
    Ok(response.into_response())
}

/// POST /add-card
#[instrument(skip_all)]
pub async fn add_card(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let request: AddCardRequest = parse_body(&body)?;
    let card = required(request.new_key_code)?;
    let added = {
        let card = card.clone();
        with_store(&state.store, move |store| store.add_card(&card)).await?
    };
    if !added {
        return Err(ApiError::CardExists);
    }

    state.gateway.notify(&ChangeEvent::card_added(&card)).await;

    info!(%card, "card added");
    Ok((StatusCode::OK, "Card added successfully!").into_response())
}

/// DELETE /delete-card
#[instrument(skip_all)]
pub async fn delete_card(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let request: DeleteCardRequest = parse_body(&body)?;
    let card = required(request.card)?;
    let removed = {
        let card = card.clone();
        with_store(&state.store, move |store| store.remove_card(&card)).await?
    };
    if !removed {
        return Err(ApiError::CardNotFound);
    }

    state.gateway.notify(&ChangeEvent::card_removed(&card)).await;

    info!(%card, "card deleted");
    Ok((StatusCode::OK, format!("Card '{card}' deleted successfully.")).into_response())
}

/// GET /valid-cards
pub async fn valid_cards(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    let cards = with_store(&state.store, AccessStore::valid_cards).await?;
    Ok(Json(cards))
}

/// GET /scan-history
pub async fn scan_history(State(state): State<AppState>) -> Result<Json<Vec<ScanEntry>>, ApiError> {
    let history = with_store(&state.store, AccessStore::scan_history).await?;
    Ok(Json(history))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.relay.registry.count(),
    ))
}

/// GET /connections
pub async fn connections(State(state): State<AppState>) -> Json<Vec<ConnectionInfo>> {
    Json(state.relay.registry.snapshot())
}

/// GET /metrics
pub async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "Metrics are not enabled.").into_response(),
    }
}

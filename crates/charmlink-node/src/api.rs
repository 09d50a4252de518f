use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{error, warn};

use charmlink_engine::hosts::{ForegroundSession, TransportEvent};
use charmlink_engine::{Engine, EngineError};
use charmlink_types::api::{
    ArchiveRequest, OpenResponse, SendCharmRequest, SendResponse, SendTextRequest, SendTokenRequest,
    TransportEventRequest,
};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub engine: Engine,
    pub session: ForegroundSession,
    pub worker_tx: mpsc::Sender<TransportEvent>,
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    /// Resume after this id; omit to start from the beginning.
    pub after: Option<i64>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    100
}

fn status_for(e: &EngineError) -> StatusCode {
    match e {
        EngineError::UnknownContact(_) => StatusCode::NOT_FOUND,
        EngineError::Ledger(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn engine_error(e: EngineError) -> StatusCode {
    let status = status_for(&e);
    if status.is_server_error() {
        error!("Request failed: {}", e);
    } else {
        warn!("Request rejected: {}", e);
    }
    status
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(counterparty): Path<String>,
    Query(query): Query<MessageQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let limit = query.limit.clamp(1, 500);
    let messages = state
        .engine
        .store()
        .query_after(&counterparty, query.after.unwrap_or(0), limit)
        .await
        .map_err(engine_error)?;
    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(counterparty): Path<String>,
    Json(req): Json<SendTextRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.text.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let message = state
        .engine
        .send_message(&counterparty, &req.text)
        .await
        .map_err(engine_error)?;
    Ok((StatusCode::CREATED, Json(SendResponse::from(&message))))
}

pub async fn send_charm(
    State(state): State<AppState>,
    Path(counterparty): Path<String>,
    Json(req): Json<SendCharmRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.amount <= 0 {
        return Err(StatusCode::BAD_REQUEST);
    }
    let message = state
        .engine
        .send_charm(&counterparty, &req.charm_id, req.amount)
        .await
        .map_err(engine_error)?;
    Ok((StatusCode::CREATED, Json(SendResponse::from(&message))))
}

pub async fn send_token(
    State(state): State<AppState>,
    Path(counterparty): Path<String>,
    Json(req): Json<SendTokenRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.amount <= 0 {
        return Err(StatusCode::BAD_REQUEST);
    }
    let message = state
        .engine
        .send_token(&counterparty, &req.token, req.amount)
        .await
        .map_err(engine_error)?;
    Ok((StatusCode::CREATED, Json(SendResponse::from(&message))))
}

pub async fn open_conversation(
    State(state): State<AppState>,
    Path(counterparty): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    state
        .session
        .open_conversation(&counterparty)
        .await
        .map_err(engine_error)?;
    let installed = state.engine.presence().is_installed(&counterparty).await;
    Ok(Json(OpenResponse { installed }))
}

pub async fn archive_conversation(
    State(state): State<AppState>,
    Path(counterparty): Path<String>,
    Json(req): Json<ArchiveRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    state
        .engine
        .set_archived(&counterparty, req.archived)
        .await
        .map_err(engine_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Webhook for the transport daemon. Events are queued for the background
/// worker; the response only acknowledges the hand-off.
pub async fn transport_event(
    State(state): State<AppState>,
    Json(req): Json<TransportEventRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    state
        .worker_tx
        .send(TransportEvent {
            sender: req.sender,
            channel: req.channel,
            payload: req.payload,
        })
        .await
        .map_err(|_| {
            error!("Background worker is gone, refusing transport event");
            StatusCode::SERVICE_UNAVAILABLE
        })?;
    Ok(StatusCode::ACCEPTED)
}

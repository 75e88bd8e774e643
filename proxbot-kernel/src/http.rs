//! HTTP ingress.
//!
//! A chat gateway posts normalized updates to `/updates` and relays the
//! returned reply. Every route except `/health` requires the `x-api-key`
//! header; an unset key locks the API entirely.

use crate::auth::AccessGate;
use crate::directory::Directory;
use crate::dispatch::{Dispatcher, Inbound};
use crate::health::{BotHealth, HealthTracker};
use crate::models::{GuestKind, GuestRecord};
use crate::session::SessionStore;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use proxbot_host::HostMetrics;
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub sessions: SessionStore,
    pub gate: AccessGate,
    pub directory: Directory,
    pub metrics: Arc<dyn HostMetrics>,
    pub health: HealthTracker,
    pub api_key: Option<String>,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/updates", post(post_update))
        .route("/sessions/{chat_id}", delete(close_session))
        .route("/guests/{kind}", get(get_guests))
        .route("/host/status", get(get_host_status))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

async fn require_api_key(
    State(app): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let Some(expected) = app.api_key.as_deref().filter(|k| !k.is_empty()) else {
        warn!("PROXBOT_API_KEY not set, API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);

    if !ok {
        warn!("Rejected request to {} with missing or wrong API key", req.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<BotHealth> {
    Json(app.health.snapshot())
}

// POST /updates
async fn post_update(State(app): State<AppState>, Json(update): Json<Inbound>) -> Response {
    if !app.gate.check(&update).await {
        return StatusCode::NO_CONTENT.into_response();
    }

    let session = app.sessions.open(update.chat_id);
    match app.dispatcher.handle(&session, &update).await {
        Some(reply) => Json(reply).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

// DELETE /sessions/{chat_id}
async fn close_session(State(app): State<AppState>, Path(chat_id): Path<i64>) -> StatusCode {
    if app.sessions.close(chat_id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

// GET /guests/{kind}
async fn get_guests(
    State(app): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<Vec<GuestRecord>>, StatusCode> {
    let kind = GuestKind::from_slug(&kind).ok_or(StatusCode::NOT_FOUND)?;
    let mut guests = app.directory.list_guests(kind).await;
    guests.sort_by_key(|g| g.id);
    Ok(Json(guests))
}

// GET /host/status
async fn get_host_status(State(app): State<AppState>) -> Result<String, StatusCode> {
    let metrics = app.metrics.clone();
    match tokio::task::spawn_blocking(move || metrics.host_status_summary()).await {
        Ok(Ok(summary)) => Ok(summary),
        Ok(Err(e)) => {
            error!("Host status failed: {:#}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(e) => {
            error!("Host status task failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::{sync::Arc, time::Instant};
use tokio::time::Duration;
use tracing::{debug, warn};
use wlk_proto::relay::{AckRequest, CreatedSession, SessionData};

use crate::{
    metrics::SessionMetrics,
    session::{SessionStore, SessionStoreError},
};

pub const DEFAULT_WAIT_MS: u64 = 25_000;
pub const MAX_WAIT_MS: u64 = 60_000;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SessionStore>,
    pub metrics: Arc<SessionMetrics>,
    pub shutdown: tokio::sync::watch::Receiver<bool>,
}

#[derive(Debug, Deserialize)]
pub struct WaitParams {
    pub wait_ms: Option<u64>,
}

fn store_error(state: &AppState, err: SessionStoreError) -> Response {
    state.metrics.error_counts.inc();
    let status = match err {
        SessionStoreError::AlreadyExists => StatusCode::CONFLICT,
        SessionStoreError::NotFound | SessionStoreError::AlreadyAcked => StatusCode::NOT_FOUND,
        SessionStoreError::Consumed => StatusCode::GONE,
        SessionStoreError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        SessionStoreError::InvalidData => StatusCode::BAD_REQUEST,
    };
    (status, err.to_string()).into_response()
}

fn parse_body<T: serde::de::DeserializeOwned>(state: &AppState, body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        state.metrics.error_counts.inc();
        (StatusCode::BAD_REQUEST, format!("invalid body: {e}")).into_response()
    })
}

fn observe(state: &AppState, start: Instant) {
    state.metrics.request_latency.observe(start.elapsed().as_secs_f64());
    state.metrics.active_sessions.set(state.store.len() as f64);
}

// POST /wallet/v1/sessions
pub async fn create_session(State(state): State<AppState>, body: Bytes) -> Response {
    let start = Instant::now();

    let req: SessionData = match parse_body(&state, &body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    let result = state.store.create(&req.data);
    observe(&state, start);
    match result {
        Ok(session) => {
            state.metrics.sessions_created.inc();
            debug!(session = %session, "session created");
            (StatusCode::OK, Json(CreatedSession { session })).into_response()
        }
        Err(e) => store_error(&state, e),
    }
}

// GET /wallet/v1/sessions/{session}
pub async fn get_session(State(state): State<AppState>, Path(session): Path<String>) -> Response {
    let start = Instant::now();
    let result = state.store.fetch(&session);
    observe(&state, start);
    match result {
        Ok(data) => {
            state.metrics.sessions_fetched.inc();
            (StatusCode::OK, Json(SessionData { data })).into_response()
        }
        Err(e) => store_error(&state, e),
    }
}

// POST /wallet/v1/sessions/{session}/ack
pub async fn ack_session(
    State(state): State<AppState>,
    Path(session): Path<String>,
    body: Bytes,
) -> Response {
    let start = Instant::now();

    let req: AckRequest = match parse_body(&state, &body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    let result = state.store.ack(&session, &req.data);
    observe(&state, start);
    match result {
        Ok(()) => {
            state.metrics.sessions_acked.inc();
            (StatusCode::OK, "ok").into_response()
        }
        Err(e) => store_error(&state, e),
    }
}

// GET /wallet/v1/sessions/{session}/response?wait_ms=25000
pub async fn get_response(
    State(state): State<AppState>,
    Path(session): Path<String>,
    Query(params): Query<WaitParams>,
) -> Response {
    let start = Instant::now();

    // Check shutdown
    if *state.shutdown.borrow() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }

    let wait = Duration::from_millis(params.wait_ms.unwrap_or(DEFAULT_WAIT_MS).min(MAX_WAIT_MS));

    let mut shutdown = state.shutdown.clone();
    let result = tokio::select! {
        result = state.store.await_response(&session, wait) => result,
        _ = async {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    return;
                }
            }
            std::future::pending::<()>().await
        } => {
            return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
        }
    };
    observe(&state, start);

    match result {
        Ok(Some(data)) => (StatusCode::OK, Json(AckRequest { data })).into_response(),
        Ok(None) => (StatusCode::NO_CONTENT, Bytes::new()).into_response(),
        Err(e) => store_error(&state, e),
    }
}

// GET /health
pub async fn get_health(State(state): State<AppState>) -> Response {
    use serde_json::json;

    let response = json!({
        "status": "healthy",
        "sessions": state.store.len(),
        "version": env!("CARGO_PKG_VERSION"),
    });

    (StatusCode::OK, Json(response)).into_response()
}

// GET /metrics
pub async fn get_metrics(State(state): State<AppState>) -> Response {
    match state.metrics.export_prometheus() {
        Ok(text) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            warn!("failed to export metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
        }
    }
}

//! Route handler functions for all API endpoints.
//!
//! Each handler extracts its input via axum extractors, calls into the
//! conversation pipeline held by AppState and returns a streamed answer or
//! a JSON response.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use parley_core::types::{ConversationTurn, PipelineRequest};

use crate::error::ApiError;
use crate::responder::StreamingResponder;
use crate::state::AppState;

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub index_size: u64,
    pub sessions: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub session_id: String,
    pub turns: Vec<ConversationTurn>,
}

// =============================================================================
// Ask endpoint
// =============================================================================

/// POST / - answer a question within a session, streamed.
///
/// Body: `{"question": "...", "sessionId": "..."}`. The answer is streamed
/// as `text/plain` unless the client accepts `text/event-stream`. Failures
/// before the first token produce a JSON error with a non-2xx status.
pub async fn ask(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<PipelineRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let responder = StreamingResponder::negotiate(&headers);
    let session_id = request.session_id.clone();

    let answer = state.orchestrator.ask(request).await?;

    info!(
        session_id = %session_id,
        exchange_id = %answer.exchange_id(),
        fragments = answer.fragments(),
        mode = ?responder,
        "Streaming answer"
    );
    Ok(responder.respond(answer))
}

// =============================================================================
// Session inspection
// =============================================================================

/// GET /sessions/{id}/history - turns of a session in chronological order.
///
/// Unknown sessions return an empty list and are not created.
pub async fn session_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    if session_id.trim().is_empty() {
        return Err(ApiError::BadRequest("Session id must not be empty".to_string()));
    }

    let turns = state
        .orchestrator
        .history(&session_id)
        .await?
        .map(|history| history.turns)
        .unwrap_or_default();

    Ok(Json(HistoryResponse { session_id, turns }))
}

// =============================================================================
// Health
// =============================================================================

/// GET /health - liveness plus index and session counts.
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let uptime = state.start_time.elapsed().as_secs();
    let index_size = state.orchestrator.retriever().index().len() as u64;
    let sessions = state.orchestrator.store().session_count().await? as u64;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: uptime,
        index_size,
        sessions,
    }))
}

//! HTTP handlers over [`ChatService`](parley_engine::ChatService).

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;

use parley_core::events::TurnEvent;
use parley_core::ids::ThreadId;
use parley_core::messages::Message;
use parley_engine::{EngineError, SessionSummary};
use parley_telemetry::{LogQuery, LogRecord};

use crate::server::AppState;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("thread not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (code, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::ThreadBusy(_) => ApiError::Conflict(e.to_string()),
            other => {
                tracing::error!(kind = other.error_kind(), error = %other, "request failed");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Every known thread with its display title, most recent first.
pub async fn list_threads(State(st): State<AppState>) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    Ok(Json(st.service.sessions()?))
}

pub async fn create_thread(State(st): State<AppState>) -> impl IntoResponse {
    let thread_id = st.service.new_thread();
    let title = st.service.title(&thread_id);
    (
        StatusCode::CREATED,
        Json(SessionSummary { thread_id, title }),
    )
}

/// User and assistant turns only; tool traffic is omitted. Unknown threads
/// have an empty history.
pub async fn get_messages(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    Ok(Json(st.service.load_history(&ThreadId::from_raw(id))?))
}

#[derive(Debug, Deserialize)]
pub struct SendBody {
    pub text: String,
}

/// Run a turn and stream its events as SSE. Each event is named after its
/// `type` and carries the JSON-encoded [`TurnEvent`].
pub async fn post_message(
    State(st): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SendBody>,
) -> Result<Response, ApiError> {
    if body.text.trim().is_empty() {
        return Err(ApiError::BadRequest("text must not be empty".into()));
    }
    let turn = st.service.send(&ThreadId::from_raw(id), body.text)?;
    let stream = turn.map(|event| Ok::<_, Infallible>(sse_event(&event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()).into_response())
}

fn sse_event(event: &TurnEvent) -> Event {
    Event::default()
        .event(event.event_type())
        .json_data(event)
        .unwrap_or_else(|e| {
            Event::default()
                .event("failed")
                .data(json!({ "type": "failed", "error": e.to_string() }).to_string())
        })
}

#[derive(Debug, Deserialize)]
pub struct RenameBody {
    pub title: String,
}

pub async fn rename_thread(
    State(st): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RenameBody>,
) -> Result<Json<SessionSummary>, ApiError> {
    let thread_id = ThreadId::from_raw(id);
    if !st.service.rename_thread(&thread_id, &body.title)? {
        return Err(ApiError::BadRequest("title must not be empty".into()));
    }
    let title = st.service.title(&thread_id);
    Ok(Json(SessionSummary { thread_id, title }))
}

pub async fn delete_thread(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if st.service.delete_thread(&ThreadId::from_raw(id.clone()))? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(id))
    }
}

pub async fn cancel_turn(State(st): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let cancelled = st.service.cancel(&ThreadId::from_raw(id));
    Json(json!({ "cancelled": cancelled }))
}

#[derive(Debug, Default, Deserialize)]
pub struct LogParams {
    pub level: Option<String>,
    pub target: Option<String>,
    pub thread_id: Option<String>,
    pub since: Option<String>,
    pub limit: Option<u32>,
}

/// Persisted warn+ logs. Empty when the SQLite sink is disabled.
pub async fn logs(
    State(st): State<AppState>,
    Query(params): Query<LogParams>,
) -> Result<Json<Vec<LogRecord>>, ApiError> {
    let Some(sink) = st.telemetry.as_deref().and_then(|t| t.logs()) else {
        return Ok(Json(Vec::new()));
    };
    let query = LogQuery {
        level: params.level,
        target: params.target,
        thread_id: params.thread_id,
        since: params.since,
        limit: Some(params.limit.unwrap_or(100).clamp(1, 1000)),
    };
    sink.query(&query)
        .map(Json)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

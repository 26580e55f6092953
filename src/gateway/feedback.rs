use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use super::AppState;
use super::sse::encode_event;
use crate::session::{FeedbackEvent, StreamMultiplexer, resolve_plan, run_session};

#[derive(Debug, Deserialize)]
pub struct StreamRequest {
    pub submission: String,
    /// Idempotency key; generated server-side when the client sends none.
    /// Retries that resend the same id never produce a second record.
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ScoreRequest {
    pub score: u8,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// `POST /api/feedback/{feedback_id}/stream`
///
/// Configuration problems surface as plain HTTP errors here, before any
/// stream bytes; once the SSE response starts, failures are per-criterion
/// events inside it.
pub async fn stream_feedback(
    State(state): State<Arc<AppState>>,
    Path(feedback_id): Path<Uuid>,
    Json(request): Json<StreamRequest>,
) -> Response {
    if request.submission.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "submission must not be empty");
    }

    let snapshot = state.catalog.snapshot();
    let Some(plan) = snapshot.feedback(feedback_id) else {
        return error_response(
            StatusCode::NOT_FOUND,
            &format!("unknown feedback {feedback_id}"),
        );
    };

    let criteria = match resolve_plan(&snapshot, &plan) {
        Ok(criteria) => criteria,
        Err(error) => {
            tracing::warn!(%feedback_id, %error, "Refusing to start feedback session");
            return error_response(StatusCode::UNPROCESSABLE_ENTITY, &error.to_string());
        }
    };

    let correlation_id = request.correlation_id.unwrap_or_else(Uuid::new_v4);
    tracing::info!(
        %feedback_id,
        %correlation_id,
        criteria = criteria.len(),
        "Starting feedback session"
    );

    let (mux, rx) = StreamMultiplexer::channel();
    let recorder = state.recorder.clone();
    tokio::spawn(async move {
        run_session(
            &plan,
            &criteria,
            correlation_id,
            &request.submission,
            mux,
            &recorder,
        )
        .await;
    });

    sse_response(correlation_id, rx)
}

fn sse_response(correlation_id: Uuid, rx: mpsc::Receiver<FeedbackEvent>) -> Response {
    let stream =
        ReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(encode_event(&event)));

    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        "x-accel-buffering",
        header::HeaderValue::from_static("no"),
    );
    if let Ok(value) = header::HeaderValue::from_str(&correlation_id.to_string()) {
        headers.insert("x-correlation-id", value);
    }
    response
}

/// `GET /api/session/{correlation_id}` — the persisted record, exactly as
/// the recorder wrote it.
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(correlation_id): Path<Uuid>,
) -> Response {
    match state.store.fetch_session(correlation_id).await {
        Ok(Some(session)) => Json(session).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            &format!("no session {correlation_id}"),
        ),
        Err(error) => {
            tracing::error!(%correlation_id, %error, "Session lookup failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "session lookup failed")
        }
    }
}

/// `POST /api/session/{correlation_id}/score` — attach the 1-10
/// helpfulness score a student gives after reading their feedback.
pub async fn post_score(
    State(state): State<Arc<AppState>>,
    Path(correlation_id): Path<Uuid>,
    Json(request): Json<ScoreRequest>,
) -> Response {
    if !(1..=10).contains(&request.score) {
        return error_response(StatusCode::BAD_REQUEST, "score must be between 1 and 10");
    }

    match state.store.attach_score(correlation_id, request.score).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(
            StatusCode::NOT_FOUND,
            &format!("no session {correlation_id}"),
        ),
        Err(error) => {
            tracing::error!(%correlation_id, %error, "Score update failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "score update failed")
        }
    }
}

pub async fn healthz() -> &'static str {
    "ok"
}

//! Inbound HTTP surface: the streaming feedback endpoint plus the small
//! session read/score API around it.

mod feedback;
mod sse;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::catalog::Catalog;
use crate::session::SessionRecorder;
use crate::store::SessionStore;

pub use sse::encode_event;

const MAX_BODY_BYTES: usize = 1024 * 1024;

pub struct AppState {
    pub catalog: Catalog,
    pub store: Arc<dyn SessionStore>,
    pub recorder: SessionRecorder,
}

impl AppState {
    pub fn new(catalog: Catalog, store: Arc<dyn SessionStore>) -> Self {
        Self {
            catalog,
            recorder: SessionRecorder::new(store.clone()),
            store,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    // The stream route stays outside the timeout layer: a feedback session
    // legitimately runs for as long as its provider calls do.
    let session_api = Router::new()
        .route("/api/session/{correlation_id}", get(feedback::get_session))
        .route(
            "/api/session/{correlation_id}/score",
            post(feedback::post_score),
        )
        .layer(TimeoutLayer::new(Duration::from_secs(10)));

    Router::new()
        .route(
            "/api/feedback/{feedback_id}/stream",
            post(feedback::stream_feedback),
        )
        .merge(session_api)
        .route("/healthz", get(feedback::healthz))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(state: Arc<AppState>, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_with_listener(state, listener).await
}

/// Serve on an already-bound listener. Tests bind to an ephemeral port and
/// hand it over here.
pub async fn serve_with_listener(
    state: Arc<AppState>,
    listener: tokio::net::TcpListener,
) -> anyhow::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "critiq gateway listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

//! HTTP boundary: the SSE update stream and the mutation endpoints.
//!
//! Handlers resolve the session, translate path and body parameters into a
//! [`Mutation`], and hand it to the [`MutationService`]. They answer `200`
//! with an empty body on success.
//!
//! [`MutationService`]: crate::mutations::MutationService

use std::convert::Infallible;

use axum::Json;
use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum_extra::extract::cookie::CookieJar;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use tide_core::{Mutation, SessionId, SyncError};

use crate::health::{self, HealthResponse};
use crate::render::Fragment;
use crate::server::AppState;

/// Fragments buffered between a stream task and its SSE body.
const SSE_BUFFER: usize = 16;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/todos/updates", get(updates_handler))
        .route("/api/todos/reset", put(reset_handler))
        .route("/api/todos/cancel", put(cancel_edit_handler))
        .route("/api/todos/mode/{mode}", put(set_mode_handler))
        .route("/api/todos/{idx}/toggle", post(toggle_handler))
        .route("/api/todos/{idx}/edit", get(start_edit_handler))
        .route("/api/todos/{idx}", put(edit_handler).delete(delete_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// [`SyncError`] as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub SyncError);

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, self.0.to_string()).into_response()
    }
}

/// Body of an edit request.
#[derive(Debug, Deserialize)]
pub struct EditRequest {
    /// New item text.
    pub input: String,
}

fn resolve(state: &AppState, jar: CookieJar) -> (CookieJar, SessionId) {
    state.resolver.resolve(&jar).apply(jar)
}

async fn mutate(
    state: &AppState,
    jar: CookieJar,
    mutation: Result<Mutation, SyncError>,
) -> Result<(CookieJar, StatusCode), (CookieJar, ApiError)> {
    let (jar, session_id) = resolve(state, jar);
    let mutation = match mutation {
        Ok(m) => m,
        Err(err) => return Err((jar, err.into())),
    };
    match state.mutations.apply(&session_id, mutation).await {
        Ok(_) => Ok((jar, StatusCode::OK)),
        Err(err) => Err((jar, err.into())),
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.shutdown.is_shutting_down(),
        state.streams.active_streams(),
        state.relay.address_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /api/todos/updates
async fn updates_handler(State(state): State<AppState>, jar: CookieJar) -> Response {
    let (jar, session_id) = resolve(&state, jar);
    let (tx, rx) = mpsc::channel::<Fragment>(SSE_BUFFER);
    let cancel = state.shutdown.child_token();
    let streams = state.streams.clone();

    let _ = state.shutdown.spawn(async move {
        // The SSE body owns the receiver; once the client goes away the
        // channel closes and the stream is cancelled.
        let watch = tx.clone();
        let disconnected = cancel.clone();
        let run = streams.run(session_id, tx, cancel);
        tokio::pin!(run);
        let outcome = tokio::select! {
            outcome = &mut run => outcome,
            () = watch.closed() => {
                disconnected.cancel();
                run.await
            }
        };
        debug!(stream_id = %outcome.stream_id, reason = outcome.reason.as_str(), "sse stream finished");
    });

    let events = ReceiverStream::new(rx).map(|fragment| {
        Ok::<_, Infallible>(
            Event::default()
                .event(fragment.kind.as_str())
                .data(fragment.to_sse_data()),
        )
    });
    let sse = Sse::new(events).keep_alive(KeepAlive::new().interval(state.keep_alive));
    (jar, sse).into_response()
}

/// PUT /api/todos/reset
async fn reset_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), (CookieJar, ApiError)> {
    mutate(&state, jar, Ok(Mutation::Reset)).await
}

/// PUT /api/todos/cancel
async fn cancel_edit_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), (CookieJar, ApiError)> {
    mutate(&state, jar, Ok(Mutation::CancelEdit)).await
}

/// PUT /api/todos/mode/{mode}
async fn set_mode_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(mode): Path<String>,
) -> Result<(CookieJar, StatusCode), (CookieJar, ApiError)> {
    let mutation = Mutation::parse_mode(&mode).map(|mode| Mutation::SetMode { mode });
    mutate(&state, jar, mutation).await
}

/// POST /api/todos/{idx}/toggle
async fn toggle_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(idx): Path<String>,
) -> Result<(CookieJar, StatusCode), (CookieJar, ApiError)> {
    let mutation = Mutation::parse_index(&idx).map(|index| Mutation::Toggle { index });
    mutate(&state, jar, mutation).await
}

/// GET /api/todos/{idx}/edit
async fn start_edit_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(idx): Path<String>,
) -> Result<(CookieJar, StatusCode), (CookieJar, ApiError)> {
    let mutation = Mutation::parse_index(&idx).map(|index| Mutation::StartEdit { index });
    mutate(&state, jar, mutation).await
}

/// PUT /api/todos/{idx}
async fn edit_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(idx): Path<String>,
    body: Result<Json<EditRequest>, JsonRejection>,
) -> Result<(CookieJar, StatusCode), (CookieJar, ApiError)> {
    let mutation = Mutation::parse_index(&idx).and_then(|index| {
        let Json(body) = body.map_err(|e| SyncError::malformed(e.body_text()))?;
        Ok(Mutation::Edit {
            index,
            text: body.input,
        })
    });
    mutate(&state, jar, mutation).await
}

/// DELETE /api/todos/{idx}
async fn delete_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(idx): Path<String>,
) -> Result<(CookieJar, StatusCode), (CookieJar, ApiError)> {
    let mutation = Mutation::parse_index(&idx).map(|index| Mutation::Delete { index });
    mutate(&state, jar, mutation).await
}

//! Server-Sent Events transport.
//!
//! # Protocol
//!
//! ```text
//! Client                                   Server
//!   │                                        │
//!   │── GET {base}/sse ─────────────────────►│ (open stream, create session)
//!   │◄── event: endpoint ────────────────────│ ({base}/messages?session_id=…)
//!   │                                        │
//!   │── POST {base}/messages?session_id=… ──►│ (one JSON-RPC message)
//!   │◄── 202 Accepted ───────────────────────│
//!   │◄── event: message ─────────────────────│ (response, in completion order)
//! ```
//!
//! Each POST is dispatched on its own task, so a slow tool does not hold up
//! later requests. At most `max_concurrent_requests` such tasks exist at a
//! time and each stream buffers a bounded number of undelivered responses;
//! beyond that the POST waits. Closing the stream ends the session;
//! responses for requests still in flight are dropped.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Semaphore;
use tower_http::trace::TraceLayer;

use super::session::SessionStore;
use super::{bind, cors_layer, shutdown_signal, HttpOptions, SSE_KEEP_ALIVE};
use crate::error::{HttpError, ServeError};
use crate::mcp::protocol::{parse_message, IncomingMessage};
use crate::mcp::server::{InitializeParams, McpServer};

/// Undelivered responses a single event stream may buffer.
const OUTBOX_CAPACITY: usize = 64;

/// Shared state of the SSE endpoints.
#[derive(Debug, Clone)]
pub struct SseState {
    server: McpServer,
    sessions: Arc<SessionStore>,
    in_flight: Arc<Semaphore>,
    base_path: String,
}

impl SseState {
    /// Creates the state for one listener.
    #[must_use]
    pub fn new(server: McpServer, options: &HttpOptions) -> Self {
        let in_flight = Arc::new(Semaphore::new(server.limits().max_concurrent_requests.max(1)));
        Self {
            server,
            sessions: Arc::new(SessionStore::new(options.session_idle_timeout)),
            in_flight,
            base_path: options.base_path.trim_end_matches('/').to_string(),
        }
    }

    /// The session store.
    #[must_use]
    pub const fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }
}

/// Builds the SSE router.
pub fn router(state: SseState) -> Router {
    let base = state.base_path.clone();
    Router::new()
        .route(&format!("{base}/sse"), get(sse_handler))
        .route(&format!("{base}/messages"), post(message_handler))
        .route(&format!("{base}/health"), get(health))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

/// Serves the SSE transport until a shutdown signal.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or fails.
pub async fn serve(server: McpServer, options: &HttpOptions) -> Result<(), ServeError> {
    let state = SseState::new(server, options);
    let sweeper = state
        .sessions
        .start_cleanup_task(options.session_sweep_interval);
    let listener = bind(options).await?;
    tracing::info!(
        stream = %format!("{}/sse", state.base_path),
        "Serving MCP over SSE"
    );

    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;
    sweeper.abort();
    result.map_err(ServeError::from)
}

/// Removes the session when the event stream is dropped.
struct SessionGuard {
    sessions: Arc<SessionStore>,
    id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.sessions.remove(&self.id).is_some() {
            tracing::debug!(session_id = %self.id, "Event stream closed");
        }
    }
}

async fn sse_handler(
    State(state): State<SseState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (session_id, mut rx) = state.sessions.create_streaming(OUTBOX_CAPACITY);
    let endpoint = format!("{}/messages?session_id={session_id}", state.base_path);
    let guard = SessionGuard {
        sessions: Arc::clone(&state.sessions),
        id: session_id,
    };

    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok(Event::default().event("endpoint").data(endpoint));

        while let Some(message) = rx.recv().await {
            yield Ok(Event::default().event("message").data(message.to_line()));
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE))
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    session_id: Option<String>,
}

async fn message_handler(
    State(state): State<SseState>,
    Query(query): Query<SessionQuery>,
    body: String,
) -> Response {
    let Some(session_id) = query.session_id else {
        return HttpError::MissingSession.into_response();
    };
    if !state.sessions.touch(&session_id) {
        return HttpError::SessionNotFound(session_id).into_response();
    }

    let message = match parse_message(&body) {
        Ok(message) => message,
        Err(error) => {
            let reason = error.error.message.clone();
            state.sessions.send(&session_id, error.into()).await;
            return HttpError::InvalidMessage(reason).into_response();
        }
    };

    if let IncomingMessage::Request(ref req) = message {
        if req.method == "initialize" {
            let client = InitializeParams::client_name(req.params.as_ref());
            state
                .sessions
                .update(&session_id, |s| s.mark_initialized(client));
        }
    }

    let Ok(slot) = Arc::clone(&state.in_flight).acquire_owned().await else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    let server = state.server.clone();
    let sessions = Arc::clone(&state.sessions);
    tokio::spawn(async move {
        let _slot = slot;
        if let Some(response) = server.handle_message(message).await {
            if !sessions.send(&session_id, response).await {
                tracing::debug!(session_id = %session_id, "Session closed before response was ready");
            }
        }
    });

    StatusCode::ACCEPTED.into_response()
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

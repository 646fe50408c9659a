//! Streamable HTTP transport.
//!
//! # Endpoints
//!
//! - `POST {base}`: one JSON-RPC message per request. Requests are answered
//!   with `200` and the JSON-RPC response; notifications with `202`.
//! - `DELETE {base}`: ends the session named by `Mcp-Session-Id`.
//! - `GET {base}/health`: liveness check.
//!
//! # Sessions
//!
//! A successful `initialize` without an `Mcp-Session-Id` header creates a
//! session and returns its id in that header. Later requests may echo it;
//! an id the server does not know is answered with `404`. Requests without
//! the header are served without a session.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use super::session::SessionStore;
use super::{bind, cors_layer, shutdown_signal, HttpOptions, MCP_SESSION_ID};
use crate::error::{HttpError, ServeError};
use crate::mcp::protocol::{parse_message, IncomingMessage, Outgoing};
use crate::mcp::server::{InitializeParams, McpServer};

/// Shared state of the streamable HTTP endpoints.
#[derive(Debug, Clone)]
pub struct HttpState {
    server: McpServer,
    sessions: Arc<SessionStore>,
    base_path: String,
}

impl HttpState {
    /// Creates the state for one listener.
    #[must_use]
    pub fn new(server: McpServer, options: &HttpOptions) -> Self {
        Self {
            server,
            sessions: Arc::new(SessionStore::new(options.session_idle_timeout)),
            base_path: options.base_path.trim_end_matches('/').to_string(),
        }
    }

    /// The session store.
    #[must_use]
    pub const fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }
}

/// Builds the streamable HTTP router.
pub fn router(state: HttpState) -> Router {
    let base = state.base_path.clone();
    Router::new()
        .route(&base, post(post_handler).delete(delete_handler))
        .route(&format!("{base}/health"), get(health))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

/// Serves the streamable HTTP transport until a shutdown signal.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or fails.
pub async fn serve(server: McpServer, options: &HttpOptions) -> Result<(), ServeError> {
    let state = HttpState::new(server, options);
    let sweeper = state
        .sessions
        .start_cleanup_task(options.session_sweep_interval);
    let listener = bind(options).await?;
    tracing::info!(endpoint = %state.base_path, "Serving MCP over streamable HTTP");

    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;
    sweeper.abort();
    result.map_err(ServeError::from)
}

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(MCP_SESSION_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

async fn post_handler(State(state): State<HttpState>, headers: HeaderMap, body: String) -> Response {
    let message = match parse_message(&body) {
        Ok(message) => message,
        Err(error) => {
            tracing::debug!(code = error.error.code, "Rejected undecodable body");
            return (StatusCode::BAD_REQUEST, Json(Outgoing::from(error))).into_response();
        }
    };

    let mut session_id = session_header(&headers);
    if let Some(ref id) = session_id {
        if !state.sessions.touch(id) {
            return HttpError::SessionNotFound(id.clone()).into_response();
        }
    }

    let client = match message {
        IncomingMessage::Request(ref req) if req.method == "initialize" => {
            Some(InitializeParams::client_name(req.params.as_ref()))
        }
        _ => None,
    };

    let Some(outgoing) = state.server.handle_message(message).await else {
        return StatusCode::ACCEPTED.into_response();
    };

    if let Some(client) = client {
        if !outgoing.is_error() {
            let id = session_id.get_or_insert_with(|| state.sessions.create());
            state.sessions.update(id, |s| s.mark_initialized(client));
        }
    }

    let mut response = (StatusCode::OK, Json(outgoing)).into_response();
    if let Some(value) = session_id.and_then(|id| HeaderValue::from_str(&id).ok()) {
        response.headers_mut().insert(MCP_SESSION_ID, value);
    }
    response
}

async fn delete_handler(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    let Some(id) = session_header(&headers) else {
        return HttpError::MissingSession.into_response();
    };
    match state.sessions.remove(&id) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => HttpError::SessionNotFound(id).into_response(),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::dispatch::Limits;
    use crate::mcp::registry::Registry;

    fn state() -> HttpState {
        let server = McpServer::new(Arc::new(Registry::new()), Limits::default());
        HttpState::new(server, &HttpOptions::default())
    }

    fn with_session(id: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(MCP_SESSION_ID, HeaderValue::from_str(id).unwrap());
        headers
    }

    const INITIALIZE: &str = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","clientInfo":{"name":"agent"}}}"#;

    #[tokio::test]
    async fn initialize_creates_session() {
        let state = state();
        let response = post_handler(State(state.clone()), HeaderMap::new(), INITIALIZE.into()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let id = response
            .headers()
            .get(MCP_SESSION_ID)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let session = state.sessions.get(&id).unwrap();
        assert!(session.initialized);
        assert_eq!(session.client_name.as_deref(), Some("agent"));
    }

    #[tokio::test]
    async fn sessionless_request_is_served() {
        let response = post_handler(
            State(state()),
            HeaderMap::new(),
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#.into(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(MCP_SESSION_ID).is_none());
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let response = post_handler(
            State(state()),
            with_session("stale"),
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#.into(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn notification_is_accepted() {
        let response = post_handler(
            State(state()),
            HeaderMap::new(),
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#.into(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let response = post_handler(State(state()), HeaderMap::new(), "][".into()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_ends_session() {
        let state = state();
        let id = state.sessions.create();

        let response = delete_handler(State(state.clone()), with_session(&id)).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = delete_handler(State(state.clone()), with_session(&id)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = delete_handler(State(state), HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

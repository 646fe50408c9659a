//! Transport adapters.
//!
//! Every adapter frames JSON-RPC messages its own way and hands them to the
//! shared [`McpServer`]:
//!
//! - [`stdio`]: newline-delimited messages on stdin/stdout, one session
//! - [`sse`]: `GET …/sse` event stream plus `POST …/messages?session_id=`
//! - [`http`]: streamable HTTP, one `POST` per message, JSON responses
//!
//! Exactly one adapter runs per process, chosen with [`Transport`].

pub mod http;
pub mod session;
pub mod sse;
pub mod stdio;

use std::time::Duration;

use axum::http::{HeaderName, Method};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::error::ServeError;
use crate::mcp::server::McpServer;

/// Header carrying the streamable HTTP session id.
pub const MCP_SESSION_ID: &str = "mcp-session-id";

/// Interval between SSE keep-alive comments.
pub const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Selectable transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Transport {
    /// Newline-delimited JSON-RPC on stdin/stdout.
    Stdio,
    /// Server-Sent Events.
    Sse,
    /// Streamable HTTP.
    #[default]
    StreamableHttp,
}

impl Transport {
    /// Whether the adapter listens on a network socket.
    #[must_use]
    pub const fn is_network(self) -> bool {
        !matches!(self, Self::Stdio)
    }
}

/// Listener and session settings for the HTTP-based adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpOptions {
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Path prefix for every endpoint, e.g. `/mcp`.
    pub base_path: String,
    /// Sessions idle this long are evicted.
    pub session_idle_timeout: Duration,
    /// How often the sweeper runs.
    pub session_sweep_interval: Duration,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            base_path: "/mcp".to_string(),
            session_idle_timeout: Duration::from_secs(1800),
            session_sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Runs the selected transport until shutdown.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the byte stream fails.
pub async fn serve(
    transport: Transport,
    server: McpServer,
    options: &HttpOptions,
) -> Result<(), ServeError> {
    match transport {
        Transport::Stdio => stdio::serve(server).await,
        Transport::Sse => sse::serve(server, options).await,
        Transport::StreamableHttp => http::serve(server, options).await,
    }
}

/// Binds the configured address.
///
/// # Errors
///
/// Returns [`ServeError::Bind`] if the address is unavailable.
pub async fn bind(options: &HttpOptions) -> Result<TcpListener, ServeError> {
    let addr = format!("{}:{}", options.host, options.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServeError::Bind {
            addr: addr.clone(),
            source,
        })?;
    tracing::info!(addr = %addr, "Listening");
    Ok(listener)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(MCP_SESSION_ID)])
}

/// Resolves when the process is asked to stop.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut sigint), Ok(mut sigterm)) = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) else {
        tracing::warn!("Could not install signal handlers; relying on EOF or kill");
        return std::future::pending().await;
    };

    tokio::select! {
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }

        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

/// Resolves when the process is asked to stop.
#[cfg(windows)]
pub async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Received Ctrl+C, initiating graceful shutdown");
    } else {
        tracing::warn!("Could not install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::ValueEnum;

    #[test]
    fn transport_names() {
        assert_eq!(
            Transport::from_str("streamable-http", false),
            Ok(Transport::StreamableHttp)
        );
        assert_eq!(Transport::from_str("sse", false), Ok(Transport::Sse));
        assert_eq!(Transport::from_str("stdio", false), Ok(Transport::Stdio));
        assert!(Transport::from_str("websocket", false).is_err());
        assert_eq!(Transport::default(), Transport::StreamableHttp);
    }

    #[test]
    fn only_stdio_is_local() {
        assert!(!Transport::Stdio.is_network());
        assert!(Transport::Sse.is_network());
        assert!(Transport::StreamableHttp.is_network());
    }

    #[tokio::test]
    async fn bind_failure_names_address() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let options = HttpOptions {
            host: "127.0.0.1".to_string(),
            port,
            ..HttpOptions::default()
        };
        let err = bind(&options).await.unwrap_err();
        assert!(err.to_string().contains(&port.to_string()));
    }
}

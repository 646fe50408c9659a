//! Error types for gcloud-mcp.
//!
//! Startup-time failures (configuration, schema derivation, registration)
//! and fatal transport failures live here. Per-request failures are not
//! Rust errors at all: they become [`crate::mcp::dispatch::DispatchError`]
//! values inside a response envelope.
//!
//! # Security Note
//!
//! Error messages never include credential material. The access token is
//! read by individual tools and never reaches these types.

use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// Errors raised while deriving a tool's calling contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A declared type has no schema equivalent.
    #[error("parameter '{parameter}' has unsupported type '{declared}'")]
    UnsupportedType {
        /// Parameter (or `return`) whose type failed to map.
        parameter: String,
        /// The declared type name.
        declared: String,
    },

    /// The declaration lacks a field every tool must carry.
    #[error("tool '{tool}' is missing required field '{field}'")]
    MissingField {
        /// Tool name (may be empty when the name itself is missing).
        tool: String,
        /// Name of the missing field.
        field: &'static str,
    },

    /// Two parameters share a name.
    #[error("tool '{tool}' declares parameter '{parameter}' more than once")]
    DuplicateParameter {
        /// Tool name.
        tool: String,
        /// The repeated parameter name.
        parameter: String,
    },

    /// A default value does not conform to its parameter's type.
    #[error("default for parameter '{parameter}' is not a valid {expected}")]
    InvalidDefault {
        /// Parameter name.
        parameter: String,
        /// Rendered expected type.
        expected: String,
    },
}

/// Errors raised by the tool/resource registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A tool or resource with this name is already registered.
    #[error("duplicate registration: '{name}' is already registered")]
    DuplicateName {
        /// The contested name.
        name: String,
    },

    /// No tool or resource is registered under this name.
    #[error("'{name}' is not registered")]
    NotFound {
        /// The name that was looked up.
        name: String,
    },

    /// The declaration could not be turned into a descriptor.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A client shared by a group of tools could not be constructed.
    #[error("failed to initialise {client} client: {message}")]
    ClientInit {
        /// Which client failed.
        client: &'static str,
        /// Underlying failure.
        message: String,
    },
}

/// Fatal errors that end a transport's serve loop.
#[derive(Error, Debug)]
pub enum ServeError {
    /// Could not bind the listening socket.
    #[error("failed to bind {addr}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The underlying byte stream failed.
    #[error("transport I/O failed")]
    Io(#[from] std::io::Error),
}

/// Request-level failures of the HTTP transports.
///
/// These never reach the protocol layer; they are answered directly with a
/// `{"error": {"kind", "message"}}` body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    /// The referenced session does not exist (never created, closed or evicted).
    #[error("session '{0}' not found")]
    SessionNotFound(String),

    /// The request must name a session but does not.
    #[error("missing session id")]
    MissingSession,

    /// The body is not a JSON-RPC message.
    #[error("invalid JSON-RPC message: {0}")]
    InvalidMessage(String),
}

impl HttpError {
    /// Get the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::MissingSession | Self::InvalidMessage(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Stable machine-readable error class.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "NotFound",
            Self::MissingSession | Self::InvalidMessage(_) => "ProtocolError",
        }
    }

    /// Create an error response body.
    #[must_use]
    pub fn error_body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "kind": self.kind(),
                "message": self.to_string()
            }
        })
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        (self.status_code(), axum::Json(self.error_body())).into_response()
    }
}

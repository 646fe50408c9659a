//! JSON-RPC 2.0 framing for MCP.
//!
//! Every transport decodes bytes into an [`IncomingMessage`] with
//! [`parse_message`] and encodes an [`Outgoing`] back. Malformed input never
//! panics: it becomes a [`JsonRpcError`] the transport writes like any other
//! reply. Ids are strings or integers; an error whose id cannot be recovered
//! is sent with `"id": null`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The MCP protocol version this implementation supports.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Name reported in `serverInfo`.
pub const SERVER_NAME: &str = "gcloud-mcp";

/// Version reported in `serverInfo`.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Correlation id of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// A call that expects an answer.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Returns why the request is malformed, if it is.
    #[must_use]
    pub fn validate(&self) -> Option<&'static str> {
        if self.jsonrpc != "2.0" {
            Some("jsonrpc field must be \"2.0\"")
        } else if self.method.is_empty() {
            Some("method field cannot be empty")
        } else {
            None
        }
    }
}

/// A one-way message; never answered.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// A successful reply.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: RequestId,
    pub result: Value,
}

impl JsonRpcResponse {
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result,
        }
    }
}

/// Error codes this server emits: the JSON-RPC reserved range plus the two
/// MCP server-defined codes for timeouts and missing resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    RequestTimeout,
    ResourceNotFound,
}

impl ErrorCode {
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::RequestTimeout => -32001,
            Self::ResourceNotFound => -32002,
        }
    }

    const fn default_message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::RequestTimeout => "Request timed out",
            Self::ResourceNotFound => "Resource not found",
        }
    }
}

/// The `error` member of an error reply.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcErrorData {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcErrorData {
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<ErrorCode> for JsonRpcErrorData {
    fn from(code: ErrorCode) -> Self {
        Self::with_message(code, code.default_message())
    }
}

/// An error reply.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub jsonrpc: &'static str,
    /// `None` serialises as `null`.
    pub id: Option<RequestId>,
    pub error: JsonRpcErrorData,
}

impl JsonRpcError {
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(id: Option<RequestId>, error: JsonRpcErrorData) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            error,
        }
    }

    /// Undecodable input; the id is unknown.
    #[must_use]
    pub fn parse_error() -> Self {
        Self::new(None, ErrorCode::ParseError.into())
    }

    #[must_use]
    pub fn invalid_request_because(id: Option<RequestId>, reason: &str) -> Self {
        let data =
            JsonRpcErrorData::with_message(ErrorCode::InvalidRequest, format!("Invalid Request: {reason}"));
        Self::new(id, data)
    }

    #[must_use]
    pub fn method_not_found(id: RequestId, method: &str) -> Self {
        let data =
            JsonRpcErrorData::with_message(ErrorCode::MethodNotFound, format!("Method not found: {method}"));
        Self::new(Some(id), data)
    }

    #[must_use]
    pub fn invalid_params(id: RequestId, message: impl Into<String>) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(ErrorCode::InvalidParams, message),
        )
    }

    #[must_use]
    pub fn internal_error(id: RequestId, message: impl Into<String>) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(ErrorCode::InternalError, message),
        )
    }
}

/// A decoded message: requests carry an id, notifications do not.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
}

/// A reply written back to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Outgoing {
    Response(JsonRpcResponse),
    Error(JsonRpcError),
}

impl Outgoing {
    /// The id this message answers, if known.
    #[must_use]
    pub const fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Response(resp) => Some(&resp.id),
            Self::Error(err) => err.id.as_ref(),
        }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Encodes the message as one line of JSON without the trailing newline.
    #[must_use]
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to serialise response");
            let fallback = JsonRpcError::new(self.id().cloned(), ErrorCode::InternalError.into());
            serde_json::to_string(&fallback).unwrap_or_default()
        })
    }
}

impl From<JsonRpcResponse> for Outgoing {
    fn from(resp: JsonRpcResponse) -> Self {
        Self::Response(resp)
    }
}

impl From<JsonRpcError> for Outgoing {
    fn from(err: JsonRpcError) -> Self {
        Self::Error(err)
    }
}

/// Parses a JSON string into an incoming message.
///
/// # Errors
///
/// Returns a `JsonRpcError` if the JSON is malformed or not a valid message.
pub fn parse_message(json: &str) -> Result<IncomingMessage, JsonRpcError> {
    let value: Value = serde_json::from_str(json).map_err(|_| JsonRpcError::parse_error())?;

    // Valid JSON that is not an object is an invalid request, not a parse error
    let Some(obj) = value.as_object() else {
        return Err(JsonRpcError::invalid_request_because(
            None,
            "message must be a JSON object",
        ));
    };

    // Recover the id early so later failures can still be correlated
    let id = obj
        .get("id")
        .and_then(|v| serde_json::from_value::<RequestId>(v.clone()).ok());

    match obj.get("jsonrpc").and_then(Value::as_str) {
        Some("2.0") => {}
        _ => {
            return Err(JsonRpcError::invalid_request_because(
                id,
                "jsonrpc field must be \"2.0\"",
            ))
        }
    }

    if obj.contains_key("id") {
        if id.is_none() {
            return Err(JsonRpcError::invalid_request_because(
                None,
                "id must be a string or an integer",
            ));
        }
        let request: JsonRpcRequest = serde_json::from_value(value)
            .map_err(|_| JsonRpcError::invalid_request_because(id, "method must be a string"))?;

        if let Some(reason) = request.validate() {
            return Err(JsonRpcError::invalid_request_because(
                Some(request.id),
                reason,
            ));
        }

        Ok(IncomingMessage::Request(request))
    } else {
        let notification: JsonRpcNotification = serde_json::from_value(value)
            .map_err(|_| JsonRpcError::invalid_request_because(None, "method must be a string"))?;

        Ok(IncomingMessage::Notification(notification))
    }
}

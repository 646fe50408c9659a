//! MCP method router shared by all transports.
//!
//! [`McpServer`] turns decoded JSON-RPC messages into responses:
//!
//! 1. **Initialisation**: `initialize` returns capabilities and server info
//! 2. **Discovery**: `tools/list`, `resources/list`
//! 3. **Operation**: `tools/call`, `resources/read`, `ping`
//!
//! The router holds no per-connection state, so one instance is cloned into
//! every transport task. Session bookkeeping belongs to the transports.
//! Tool calls go through the [`Dispatcher`] under the configured
//! [`Limits`]: a semaphore caps concurrent invocations and each one runs
//! against a deadline.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::mcp::dispatch::{DispatchError, Dispatcher, ErrorKind, Limits, RequestEnvelope};
use crate::mcp::protocol::{
    parse_message, ErrorCode, IncomingMessage, JsonRpcError, JsonRpcErrorData,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Outgoing, RequestId,
    MCP_PROTOCOL_VERSION, SERVER_NAME, SERVER_VERSION,
};
use crate::mcp::registry::Registry;

/// Server capabilities advertised during initialisation.
#[derive(Debug, Clone, Serialize)]
pub struct ServerCapabilities {
    /// Tool-related capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ListCapabilities>,
    /// Resource-related capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ListCapabilities>,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: Some(ListCapabilities::default()),
            resources: Some(ListCapabilities::default()),
        }
    }
}

/// Capabilities of a listable collection.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ListCapabilities {
    /// Whether the list can change during the session.
    #[serde(rename = "listChanged", skip_serializing_if = "is_false")]
    pub list_changed: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde's skip_serializing_if requires a predicate fn(&T) -> bool, so we must take &bool here
const fn is_false(b: &bool) -> bool {
    !*b
}

/// Server information for initialisation response.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: SERVER_VERSION.to_string(),
        }
    }
}

/// Client information received during initialisation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    #[serde(default)]
    pub version: Option<String>,
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by client.
    pub protocol_version: String,
    /// Client capabilities.
    #[serde(default)]
    pub capabilities: Value,
    /// Client information.
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

impl InitializeParams {
    /// Extracts the client name from raw `initialize` params, if present.
    #[must_use]
    pub fn client_name(params: Option<&Value>) -> Option<String> {
        params
            .cloned()
            .and_then(|p| serde_json::from_value::<Self>(p).ok())
            .and_then(|p| p.client_info)
            .map(|c| c.name)
    }
}

/// Parameters for tools/call request.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    /// Name of the tool to call.
    pub name: String,
    /// Arguments for the tool.
    #[serde(default)]
    pub arguments: Value,
}

/// Parameters for resources/read request.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceReadParams {
    /// URI of the resource to read.
    pub uri: String,
}

/// Content item in a tool call response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
}

/// Result of a tool call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content returned by the tool.
    pub content: Vec<ToolContent>,
    /// Machine-readable form of the same outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    /// Whether the tool call resulted in an error.
    #[serde(skip_serializing_if = "is_false")]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Creates a successful result from a tool's return value.
    ///
    /// Strings are shown as-is; everything else as JSON text.
    #[must_use]
    pub fn value(value: Value) -> Self {
        let text = match value {
            Value::String(ref s) => s.clone(),
            ref other => other.to_string(),
        };
        Self {
            content: vec![ToolContent::Text { text }],
            structured_content: Some(json!({ "result": value })),
            is_error: false,
        }
    }

    /// Creates an error result the agent reads as tool output.
    #[must_use]
    pub fn error(error: &DispatchError) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: error.message.clone(),
            }],
            structured_content: Some(json!({ "error": error })),
            is_error: true,
        }
    }
}

/// Maps a dispatch failure onto a JSON-RPC error object.
///
/// `data` always carries `{kind, message, detail?}`.
#[must_use]
pub fn dispatch_error_to_rpc(id: RequestId, error: &DispatchError) -> JsonRpcError {
    let code = match error.kind {
        ErrorKind::UnknownTool | ErrorKind::MissingArgument | ErrorKind::InvalidArgument => {
            ErrorCode::InvalidParams
        }
        ErrorKind::NotFound => ErrorCode::ResourceNotFound,
        ErrorKind::Timeout => ErrorCode::RequestTimeout,
        ErrorKind::ProtocolError => ErrorCode::InvalidRequest,
        ErrorKind::InvalidResult | ErrorKind::ToolExecutionError => ErrorCode::InternalError,
    };
    let data = serde_json::to_value(error).unwrap_or(Value::Null);
    JsonRpcError::new(
        Some(id),
        JsonRpcErrorData::with_message(code, error.message.clone()).with_data(data),
    )
}

/// The MCP request router.
#[derive(Debug, Clone)]
pub struct McpServer {
    dispatcher: Dispatcher,
    limits: Limits,
    permits: Arc<Semaphore>,
}

impl McpServer {
    /// Creates a router over a finished registry.
    #[must_use]
    pub fn new(registry: Arc<Registry>, limits: Limits) -> Self {
        Self {
            dispatcher: Dispatcher::new(registry),
            permits: Arc::new(Semaphore::new(limits.max_concurrent_requests.max(1))),
            limits,
        }
    }

    /// The dispatcher behind `tools/call`.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The execution limits in force.
    #[must_use]
    pub const fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Handles a single line of input.
    ///
    /// Returns `None` when nothing should be written back (notifications).
    pub async fn handle_line(&self, line: &str) -> Option<Outgoing> {
        match parse_message(line) {
            Ok(msg) => self.handle_message(msg).await,
            Err(error) => {
                tracing::debug!(code = error.error.code, "Rejected undecodable message");
                Some(error.into())
            }
        }
    }

    /// Handles a parsed incoming message.
    pub async fn handle_message(&self, msg: IncomingMessage) -> Option<Outgoing> {
        match msg {
            IncomingMessage::Request(req) => Some(self.handle_request(req).await),
            IncomingMessage::Notification(ref notif) => {
                Self::handle_notification(notif);
                None
            }
        }
    }

    /// Handles an incoming request.
    pub async fn handle_request(&self, req: JsonRpcRequest) -> Outgoing {
        tracing::debug!(id = %req.id, method = %req.method, "Handling request");
        let response = match req.method.as_str() {
            "initialize" => Self::handle_initialize(&req),
            "ping" => Ok(Self::handle_ping(&req)),
            "tools/list" => Ok(self.handle_tools_list(&req)),
            "tools/call" => self.handle_tools_call(&req).await,
            "resources/list" => Ok(self.handle_resources_list(&req)),
            "resources/read" => self.handle_resources_read(&req).await,
            _ => Err(JsonRpcError::method_not_found(req.id.clone(), &req.method)),
        };

        match response {
            Ok(resp) => resp.into(),
            Err(error) => error.into(),
        }
    }

    /// Handles an incoming notification.
    fn handle_notification(notif: &JsonRpcNotification) {
        match notif.method.as_str() {
            "notifications/initialized" => tracing::debug!("Client finished initialisation"),
            "notifications/cancelled" => {
                tracing::debug!(params = ?notif.params, "Client cancelled a request");
            }
            other => tracing::debug!(method = other, "Ignoring notification"),
        }
    }

    /// Handles the initialize request.
    fn handle_initialize(req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        let params: InitializeParams = parse_params(req, "initialize")?;

        if params.protocol_version != MCP_PROTOCOL_VERSION {
            tracing::info!(
                requested = %params.protocol_version,
                offered = MCP_PROTOCOL_VERSION,
                "Client requested a different protocol version"
            );
        }
        if let Some(ref client) = params.client_info {
            tracing::info!(client = %client.name, version = ?client.version, "Client connected");
        }

        let result = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": ServerCapabilities::default(),
            "serverInfo": ServerInfo::default(),
        });

        Ok(JsonRpcResponse::success(req.id.clone(), result))
    }

    /// Handles the ping request.
    fn handle_ping(req: &JsonRpcRequest) -> JsonRpcResponse {
        JsonRpcResponse::success(req.id.clone(), json!({}))
    }

    /// Handles the tools/list request.
    fn handle_tools_list(&self, req: &JsonRpcRequest) -> JsonRpcResponse {
        let tools: Vec<_> = self
            .dispatcher
            .registry()
            .tools()
            .map(|t| t.definition())
            .collect();
        JsonRpcResponse::success(req.id.clone(), json!({ "tools": tools }))
    }

    /// Handles the resources/list request.
    fn handle_resources_list(&self, req: &JsonRpcRequest) -> JsonRpcResponse {
        let resources: Vec<_> = self
            .dispatcher
            .registry()
            .resources()
            .map(|r| r.definition())
            .collect();
        JsonRpcResponse::success(req.id.clone(), json!({ "resources": resources }))
    }

    /// Handles the tools/call request.
    async fn handle_tools_call(
        &self,
        req: &JsonRpcRequest,
    ) -> Result<JsonRpcResponse, JsonRpcError> {
        let params: ToolCallParams = parse_params(req, "tool call")?;

        let arguments = match params.arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => {
                return Err(JsonRpcError::invalid_params(
                    req.id.clone(),
                    "Invalid tool call params: arguments must be an object",
                ))
            }
        };

        let permit = self.acquire(&req.id).await?;
        let envelope = RequestEnvelope::new(req.id.clone(), params.name, arguments);
        let response = self
            .dispatcher
            .dispatch_bounded(envelope, &self.limits, permit)
            .await;

        let result = match response.outcome {
            Ok(value) => ToolCallResult::value(value),
            Err(ref error) if error.kind == ErrorKind::ToolExecutionError => {
                ToolCallResult::error(error)
            }
            Err(ref error) => return Err(dispatch_error_to_rpc(response.id, error)),
        };

        let result_value = serde_json::to_value(&result).map_err(|e| {
            tracing::error!(error = %e, "Failed to serialise tool call result");
            JsonRpcError::internal_error(
                req.id.clone(),
                "Internal error: failed to serialise result",
            )
        })?;

        Ok(JsonRpcResponse::success(response.id, result_value))
    }

    /// Waits for a free invocation slot. The permit travels with the
    /// invocation, so a timed-out call keeps its slot until it ends.
    async fn acquire(&self, id: &RequestId) -> Result<OwnedSemaphorePermit, JsonRpcError> {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| JsonRpcError::internal_error(id.clone(), "Server is shutting down"))
    }

    /// Handles the resources/read request.
    async fn handle_resources_read(
        &self,
        req: &JsonRpcRequest,
    ) -> Result<JsonRpcResponse, JsonRpcError> {
        let params: ResourceReadParams = parse_params(req, "resource read")?;

        let permit = self.acquire(&req.id).await?;
        let response = self
            .dispatcher
            .read_resource_bounded(req.id.clone(), params.uri, &self.limits, permit)
            .await;

        match response.outcome {
            Ok(contents) => Ok(JsonRpcResponse::success(
                response.id,
                json!({ "contents": [contents] }),
            )),
            Err(ref error) => Err(dispatch_error_to_rpc(response.id, error)),
        }
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(
    req: &JsonRpcRequest,
    what: &str,
) -> Result<T, JsonRpcError> {
    req.params
        .as_ref()
        .map(|p| serde_json::from_value(p.clone()))
        .transpose()
        .map_err(|e| JsonRpcError::invalid_params(req.id.clone(), format!("Invalid {what} params: {e}")))?
        .ok_or_else(|| JsonRpcError::invalid_params(req.id.clone(), format!("Missing {what} params")))
}

//! Transport-agnostic request dispatch.
//!
//! The [`Dispatcher`] takes a [`RequestEnvelope`] naming a tool and its raw
//! arguments, and always produces a [`ResponseEnvelope`] carrying the same
//! correlation id. Every failure is a [`DispatchError`] value; nothing here
//! panics or returns a Rust error to the transport.
//!
//! Each request walks the same phases, logged at `debug`:
//!
//! ```text
//! Received ──► Validating ──► Invoking ──► Responding ──► Done
//!                   │                          ▲
//!                   └────────── (error) ───────┘
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::OwnedSemaphorePermit;

use crate::mcp::handler::{Arguments, ToolError};
use crate::mcp::protocol::RequestId;
use crate::mcp::registry::Registry;
use crate::mcp::schema::{SchemaType, ToolDescriptor};

/// A transport-neutral tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    /// Correlation id echoed in the response.
    pub id: RequestId,
    /// Tool name.
    pub target: String,
    /// Raw arguments as sent by the client.
    pub arguments: Map<String, Value>,
}

impl RequestEnvelope {
    /// Creates an envelope.
    #[must_use]
    pub fn new(id: RequestId, target: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id,
            target: target.into(),
            arguments,
        }
    }
}

/// The outcome of one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    /// Correlation id copied from the request.
    pub id: RequestId,
    /// Result value or failure.
    pub outcome: Result<Value, DispatchError>,
}

/// Failure classes reported to clients, serialised by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// No tool is registered under the requested name.
    UnknownTool,
    /// No resource is registered under the requested URI.
    NotFound,
    /// A required argument was not supplied.
    MissingArgument,
    /// An argument could not be coerced to its declared type.
    InvalidArgument,
    /// The tool itself reported a failure.
    ToolExecutionError,
    /// The tool returned a value outside its declared shape.
    InvalidResult,
    /// The request ran past its deadline.
    Timeout,
    /// The message could not be understood at the protocol level.
    ProtocolError,
}

impl ErrorKind {
    /// Variant name as it appears on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownTool => "UnknownTool",
            Self::NotFound => "NotFound",
            Self::MissingArgument => "MissingArgument",
            Self::InvalidArgument => "InvalidArgument",
            Self::ToolExecutionError => "ToolExecutionError",
            Self::InvalidResult => "InvalidResult",
            Self::Timeout => "Timeout",
            Self::ProtocolError => "ProtocolError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified per-request failure.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("{kind}: {message}")]
pub struct DispatchError {
    /// Failure class.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Structured context, when there is any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl DispatchError {
    /// Creates an error without detail.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    /// Attaches structured detail.
    #[must_use]
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    fn invalid_argument(parameter: &str, expected: &str) -> Self {
        Self::new(
            ErrorKind::InvalidArgument,
            format!("argument '{parameter}' must be {expected}"),
        )
        .with_detail(json!({ "parameter": parameter, "expected": expected }))
    }
}

impl From<ToolError> for DispatchError {
    fn from(err: ToolError) -> Self {
        Self {
            kind: ErrorKind::ToolExecutionError,
            message: err.message,
            detail: err.detail,
        }
    }
}

/// Steps of the per-request pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Envelope accepted.
    Received,
    /// Arguments being checked against the contract.
    Validating,
    /// Handler running.
    Invoking,
    /// Outcome being wrapped.
    Responding,
    /// Finished.
    Done,
}

impl Phase {
    /// Whether `next` may follow `self`.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Received, Self::Validating)
                | (Self::Validating, Self::Invoking | Self::Responding)
                | (Self::Invoking, Self::Responding)
                | (Self::Responding, Self::Done)
        )
    }
}

struct PhaseTrace<'a> {
    id: &'a RequestId,
    target: &'a str,
    phase: Phase,
}

impl<'a> PhaseTrace<'a> {
    fn start(id: &'a RequestId, target: &'a str) -> Self {
        tracing::debug!(id = %id, tool = target, phase = ?Phase::Received, "Request phase");
        Self {
            id,
            target,
            phase: Phase::Received,
        }
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal phase transition {:?} -> {next:?}",
            self.phase
        );
        self.phase = next;
        tracing::debug!(id = %self.id, tool = self.target, phase = ?next, "Request phase");
    }

    fn respond_with_error(&mut self, kind: ErrorKind) {
        tracing::debug!(id = %self.id, tool = self.target, from = ?self.phase, %kind, "Request failed");
        self.advance(Phase::Responding);
    }
}

/// Execution bounds applied by [`Dispatcher::dispatch_bounded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Ceiling on concurrently running invocations, enforced with the permit
    /// each bounded call carries.
    pub max_concurrent_requests: usize,
    /// Deadline for a single request.
    pub request_timeout: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 64,
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Routes envelopes to registered tools.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    /// Creates a dispatcher over a finished registry.
    #[must_use]
    pub const fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// The registry this dispatcher reads.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Validates, invokes and checks one tool call.
    pub async fn dispatch(&self, envelope: RequestEnvelope) -> ResponseEnvelope {
        let RequestEnvelope {
            id,
            target,
            arguments,
        } = envelope;
        let mut trace = PhaseTrace::start(&id, &target);
        trace.advance(Phase::Validating);

        let outcome = self.run(&target, arguments, &mut trace).await;
        match outcome {
            Ok(_) => trace.advance(Phase::Responding),
            Err(ref e) => trace.respond_with_error(e.kind),
        }
        trace.advance(Phase::Done);

        ResponseEnvelope { id, outcome }
    }

    async fn run(
        &self,
        target: &str,
        arguments: Map<String, Value>,
        trace: &mut PhaseTrace<'_>,
    ) -> Result<Value, DispatchError> {
        let tool = self.registry.tool(target).ok_or_else(|| {
            DispatchError::new(ErrorKind::UnknownTool, format!("unknown tool '{target}'"))
                .with_detail(json!(target))
        })?;

        let args = validate_arguments(tool, arguments)?;

        trace.advance(Phase::Invoking);
        let value = tool.handler().call(args).await.map_err(|e| {
            tracing::warn!(tool = target, error = %e, "Tool reported failure");
            DispatchError::from(e)
        })?;

        if !tool.returns().conforms(&value) {
            tracing::error!(
                tool = target,
                declared = %tool.returns(),
                "Tool returned a value outside its declared shape"
            );
            return Err(DispatchError::new(
                ErrorKind::InvalidResult,
                format!("tool '{target}' returned a value that is not {}", tool.returns()),
            ));
        }

        Ok(value)
    }

    /// Reads a registered resource.
    ///
    /// The success value is `{"uri", "mimeType", "text"}`.
    pub async fn read_resource(&self, id: RequestId, uri: &str) -> ResponseEnvelope {
        let outcome = match self.registry.resource(uri) {
            None => Err(DispatchError::new(
                ErrorKind::NotFound,
                format!("resource '{uri}' not found"),
            )
            .with_detail(json!({ "uri": uri }))),
            Some(resource) => resource
                .handler()
                .read()
                .await
                .map(|text| json!({ "uri": uri, "mimeType": resource.mime(), "text": text }))
                .map_err(DispatchError::from),
        };
        ResponseEnvelope { id, outcome }
    }

    /// Runs [`Dispatcher::dispatch`] on its own task under a deadline.
    ///
    /// On expiry a `Timeout` error is returned; the task is not cancelled and
    /// runs to completion in the background. `permit` moves into the task and
    /// is released only when the invocation really ends.
    pub async fn dispatch_bounded(
        &self,
        envelope: RequestEnvelope,
        limits: &Limits,
        permit: OwnedSemaphorePermit,
    ) -> ResponseEnvelope {
        let id = envelope.id.clone();
        let label = envelope.target.clone();
        let this = self.clone();
        bounded(id, label, limits.request_timeout, permit, async move {
            this.dispatch(envelope).await
        })
        .await
    }

    /// Runs [`Dispatcher::read_resource`] on its own task under a deadline.
    pub async fn read_resource_bounded(
        &self,
        id: RequestId,
        uri: String,
        limits: &Limits,
        permit: OwnedSemaphorePermit,
    ) -> ResponseEnvelope {
        let this = self.clone();
        let task_id = id.clone();
        let task_uri = uri.clone();
        bounded(id, uri, limits.request_timeout, permit, async move {
            this.read_resource(task_id, &task_uri).await
        })
        .await
    }
}

async fn bounded<F>(
    id: RequestId,
    label: String,
    deadline: Duration,
    permit: OwnedSemaphorePermit,
    work: F,
) -> ResponseEnvelope
where
    F: Future<Output = ResponseEnvelope> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        let response = work.await;
        drop(permit);
        response
    });
    let outcome = match tokio::time::timeout(deadline, handle).await {
        Ok(Ok(response)) => return response,
        Ok(Err(join_error)) => {
            tracing::error!(id = %id, tool = %label, error = %join_error, "Invocation aborted");
            Err(DispatchError::new(
                ErrorKind::ToolExecutionError,
                format!("invocation of '{label}' aborted"),
            ))
        }
        Err(_) => {
            tracing::warn!(id = %id, tool = %label, timeout = ?deadline, "Request timed out");
            Err(DispatchError::new(
                ErrorKind::Timeout,
                format!("'{label}' did not finish within {}s", deadline.as_secs()),
            )
            .with_detail(json!({ "timeout_secs": deadline.as_secs() })))
        }
    };
    ResponseEnvelope { id, outcome }
}

fn validate_arguments(
    tool: &ToolDescriptor,
    mut raw: Map<String, Value>,
) -> Result<Arguments, DispatchError> {
    let mut validated = Map::with_capacity(tool.parameters().len());

    for param in tool.parameters() {
        match raw.remove(&param.name) {
            Some(value) => {
                let coerced = coerce(&param.schema, &value, &param.name)?;
                validated.insert(param.name.clone(), coerced);
            }
            None => match param.default {
                Some(ref default) => {
                    validated.insert(param.name.clone(), default.clone());
                }
                None => {
                    return Err(DispatchError::new(
                        ErrorKind::MissingArgument,
                        format!("missing required argument '{}'", param.name),
                    )
                    .with_detail(json!(param.name)));
                }
            },
        }
    }

    if let Some(extra) = raw.keys().next() {
        return Err(DispatchError::invalid_argument(extra, "no such parameter"));
    }

    Ok(Arguments::new(validated))
}

fn coerce(schema: &SchemaType, value: &Value, path: &str) -> Result<Value, DispatchError> {
    match (schema, value) {
        (SchemaType::Optional(_), Value::Null) => Ok(Value::Null),
        (SchemaType::Optional(inner), _) => coerce(inner, value, path),
        (SchemaType::Array(items), Value::Array(list)) => list
            .iter()
            .enumerate()
            .map(|(i, item)| coerce(items, item, &format!("{path}[{i}]")))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        _ => schema
            .coerce_scalar(value)
            .ok_or_else(|| DispatchError::invalid_argument(path, &schema.to_string())),
    }
}

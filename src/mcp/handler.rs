//! Callable seams: what a registered tool or resource looks like to the core.
//!
//! A tool is anything implementing [`ToolHandler`]; closures are adapted with
//! [`tool_fn`]. Handlers receive [`Arguments`] that the dispatcher has
//! already validated and coerced against the tool's declared parameters, so
//! the typed getters here fail only on programming errors.

use std::future::Future;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// Failure reported by a tool or resource producer.
///
/// `message` is shown to the client verbatim; `detail` carries optional
/// structured context (resource names, upstream status codes).
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ToolError {
    /// Human-readable failure description.
    pub message: String,
    /// Optional structured context.
    pub detail: Option<Value>,
}

impl ToolError {
    /// Creates an error with a message and no detail.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
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
}

/// Validated arguments handed to a tool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments(Map<String, Value>);

impl Arguments {
    /// Wraps an argument map.
    #[must_use]
    pub const fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Returns the raw value for `name`, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Returns a string argument.
    ///
    /// # Errors
    ///
    /// Returns an error if the argument is absent or not a string.
    pub fn str(&self, name: &str) -> Result<&str, ToolError> {
        self.get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| Self::wrong_type(name, "string"))
    }

    /// Returns an optional string argument; `null` reads as `None`.
    #[must_use]
    pub fn opt_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Returns an integer argument.
    ///
    /// # Errors
    ///
    /// Returns an error if the argument is absent or not an integer.
    pub fn i64(&self, name: &str) -> Result<i64, ToolError> {
        self.get(name)
            .and_then(Value::as_i64)
            .ok_or_else(|| Self::wrong_type(name, "integer"))
    }

    /// Returns a boolean argument.
    ///
    /// # Errors
    ///
    /// Returns an error if the argument is absent or not a boolean.
    pub fn bool(&self, name: &str) -> Result<bool, ToolError> {
        self.get(name)
            .and_then(Value::as_bool)
            .ok_or_else(|| Self::wrong_type(name, "boolean"))
    }

    /// Consumes the wrapper and returns the map.
    #[must_use]
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    fn wrong_type(name: &str, expected: &str) -> ToolError {
        ToolError::new(format!("argument '{name}' is not a {expected}"))
    }
}

/// A callable exposed as an MCP tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Invokes the tool with validated arguments.
    async fn call(&self, args: Arguments) -> Result<Value, ToolError>;
}

/// A producer for a readable MCP resource.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Produces the resource's current text content.
    async fn read(&self) -> Result<String, ToolError>;
}

/// Adapter turning an async closure into a [`ToolHandler`].
pub struct FnTool<F>(F);

/// Wraps an async closure as a tool handler.
pub const fn tool_fn<F, Fut>(f: F) -> FnTool<F>
where
    F: Fn(Arguments) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send,
{
    FnTool(f)
}

#[async_trait]
impl<F, Fut> ToolHandler for FnTool<F>
where
    F: Fn(Arguments) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send,
{
    async fn call(&self, args: Arguments) -> Result<Value, ToolError> {
        (self.0)(args).await
    }
}

/// Adapter turning an async closure into a [`ResourceHandler`].
pub struct FnResource<F>(F);

/// Wraps an async closure as a resource producer.
pub const fn resource_fn<F, Fut>(f: F) -> FnResource<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, ToolError>> + Send,
{
    FnResource(f)
}

#[async_trait]
impl<F, Fut> ResourceHandler for FnResource<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, ToolError>> + Send,
{
    async fn read(&self) -> Result<String, ToolError> {
        (self.0)().await
    }
}

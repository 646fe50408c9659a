//! Model Context Protocol (MCP) server core.
//!
//! Tools and resources are declared once, registered in a [`Registry`], and
//! served to AI agents over any of the transports in [`transport`]. Every
//! transport hands decoded JSON-RPC 2.0 messages to the same [`McpServer`],
//! which routes `tools/call` and `resources/read` through the
//! [`Dispatcher`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            MCP Server                            │
//! │                                                                  │
//! │  ┌─────────────┐   ┌─────────────┐   ┌────────────┐   ┌────────┐ │
//! │  │  Transport  │──▶│  McpServer  │──▶│ Dispatcher │──▶│ Tools  │ │
//! │  │ stdio / SSE │   │  (methods,  │   │ (validate, │   │(handler│ │
//! │  │ / HTTP      │   │   limits)   │   │  invoke)   │   │  fns)  │ │
//! │  └─────────────┘   └─────────────┘   └────────────┘   └────────┘ │
//! │         │                                  │                     │
//! │         ▼                                  ▼                     │
//! │  ┌──────────────────────┐          ┌──────────────────────┐      │
//! │  │  JSON-RPC Messages   │          │ Registry (schemas,   │      │
//! │  │                      │          │ registration order)  │      │
//! │  └──────────────────────┘          └──────────────────────┘      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! This implementation targets MCP protocol version 2024-11-05.

pub mod dispatch;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod server;
pub mod transport;

pub use dispatch::{DispatchError, Dispatcher, ErrorKind, Limits, RequestEnvelope, ResponseEnvelope};
pub use handler::{resource_fn, tool_fn, Arguments, ResourceHandler, ToolError, ToolHandler};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
pub use registry::Registry;
pub use schema::{ParamSpec, ResourceDescriptor, ToolDescriptor, ToolSpec};
pub use server::McpServer;
pub use transport::stdio::StdioTransport;
pub use transport::Transport;

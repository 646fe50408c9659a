//! gcloud-mcp: MCP server exposing Google Cloud operations tools
//!
//! This library lets an AI agent inspect and operate Google Cloud resources
//! through the Model Context Protocol.
//!
//! # Architecture
//!
//! The server core is generic; the Google Cloud tools are one set of
//! registrations on top of it:
//!
//! - **Declaration**: each tool is a [`mcp::ToolSpec`] plus an async handler
//! - **Registry**: descriptors in registration order, names unique
//! - **Dispatch**: argument validation, coercion, limits and error mapping
//! - **Transports**: stdio, Server-Sent Events and streamable HTTP
//!
//! # Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`error`]: Error types
//! - [`mcp`]: MCP protocol implementation
//! - [`tools`]: Registered tools and resources

pub mod config;
pub mod error;
pub mod mcp;
pub mod tools;

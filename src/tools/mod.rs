//! Tools and resources served by gcloud-mcp.
//!
//! [`build_registry`] assembles everything the server exposes:
//!
//! - `ping`: liveness check, returns `"pong"`
//! - the Google Cloud tools in [`gcp`]
//! - `server://info`: JSON description of the server and its registrations

pub mod gcp;

use serde_json::{json, Value};

use crate::config::Config;
use crate::error::RegistryError;
use crate::mcp::handler::{resource_fn, tool_fn, ToolError};
use crate::mcp::protocol::{MCP_PROTOCOL_VERSION, SERVER_NAME, SERVER_VERSION};
use crate::mcp::registry::Registry;
use crate::mcp::schema::{ResourceDescriptor, ToolSpec};

/// URI of the server description resource.
pub const SERVER_INFO_URI: &str = "server://info";

/// Builds the registry for `config`.
///
/// # Errors
///
/// Returns an error if a declaration is invalid, a name is registered twice,
/// or a shared client cannot be constructed.
pub fn build_registry(config: &Config) -> Result<Registry, RegistryError> {
    let mut registry = Registry::new();

    registry.register_tool(
        ToolSpec::new("ping")
            .summary("Checks that the server is alive.")
            .returns("string", "Always \"pong\".")
            .build(tool_fn(|_| async { Ok::<_, ToolError>(json!("pong")) }))?,
    )?;

    gcp::register(&mut registry, &config.gcp)?;

    let info = server_info(&registry).to_string();
    registry.register_resource(
        ResourceDescriptor::new(
            SERVER_INFO_URI,
            "Server info",
            resource_fn(move || {
                let info = info.clone();
                async move { Ok::<_, ToolError>(info) }
            }),
        )
        .description("Server name, version, protocol version and registered tools and resources.")
        .mime_type("application/json"),
    )?;

    tracing::info!(
        tools = registry.tools().count(),
        resources = registry.resources().count(),
        "Registry built"
    );
    Ok(registry)
}

/// Describes the server and everything in `registry`, plus the info
/// resource itself.
fn server_info(registry: &Registry) -> Value {
    let tools: Vec<&str> = registry.tools().map(|t| t.name()).collect();
    let mut resources: Vec<&str> = registry.resources().map(|r| r.uri()).collect();
    resources.push(SERVER_INFO_URI);

    json!({
        "name": SERVER_NAME,
        "version": SERVER_VERSION,
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "tools": tools,
        "resources": resources,
    })
}

//! Kubernetes Engine cluster listing.

use serde_json::{json, Value};

use super::client::{Api, GcpClient};
use crate::error::RegistryError;
use crate::mcp::handler::tool_fn;
use crate::mcp::registry::Registry;
use crate::mcp::schema::{ParamSpec, ToolSpec};

/// Registers `list_gke_clusters`.
///
/// # Errors
///
/// Returns an error if the declaration is invalid or the name is taken.
pub fn register(registry: &mut Registry, client: &GcpClient) -> Result<(), RegistryError> {
    let c = client.clone();
    registry.register_tool(
        ToolSpec::new("list_gke_clusters")
            .summary("Lists GKE clusters in a project and location.")
            .param(ParamSpec::new("project_id", "string").describe("Google Cloud project ID."))
            .param(
                ParamSpec::new("location", "string")
                    .describe("Region or zone, or \"-\" for every location.")
                    .default(json!("-")),
            )
            .returns(
                "object",
                "{\"clusters\": [...]} with version, node count, Autopilot flag, status and node pools.",
            )
            .note("Node pools are omitted for Autopilot clusters.")
            .build(tool_fn(move |args| {
                let client = c.clone();
                async move {
                    let project_id = args.str("project_id")?;
                    let location = match args.str("location")? {
                        "" => "-",
                        other => other,
                    };
                    let context = json!({ "project_id": project_id, "location": location });
                    let url = client.url(
                        Api::Container,
                        &format!("projects/{project_id}/locations/{location}/clusters"),
                    );

                    let response = client.get(&url, &[], &context).await?;
                    let clusters: Vec<Value> = response
                        .get("clusters")
                        .and_then(Value::as_array)
                        .into_iter()
                        .flatten()
                        .map(cluster_summary)
                        .collect();
                    tracing::debug!(project_id = %project_id, count = clusters.len(), "Listed GKE clusters");
                    Ok(json!({ "clusters": clusters }))
                }
            }))?,
    )
}

/// Projects a cluster resource onto the fields worth showing an agent.
#[must_use]
pub fn cluster_summary(cluster: &Value) -> Value {
    let field = |key: &str| cluster.get(key).cloned().unwrap_or(Value::Null);
    let autopilot = cluster
        .get("autopilot")
        .and_then(|a| a.get("enabled"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let node_pools: Vec<Value> = if autopilot {
        Vec::new()
    } else {
        cluster
            .get("nodePools")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .map(|pool| {
                let field = |key: &str| pool.get(key).cloned().unwrap_or(Value::Null);
                json!({
                    "name": field("name"),
                    "locations": field("locations"),
                    "version": field("version"),
                    "initial_node_count": field("initialNodeCount"),
                    "self_link": field("selfLink"),
                    "status": field("status"),
                    "conditions": field("conditions"),
                })
            })
            .collect()
    };

    json!({
        "id": field("id"),
        "name": field("name"),
        "location": field("location"),
        "tier": cluster
            .get("enterpriseConfig")
            .and_then(|e| e.get("clusterTier"))
            .cloned()
            .unwrap_or(Value::Null),
        "current_master_version": field("currentMasterVersion"),
        "current_node_count": field("currentNodeCount"),
        "autopilot": { "enabled": autopilot },
        "status": field("status"),
        "conditions": field("conditions"),
        "self_link": field("selfLink"),
        "create_time": field("createTime"),
        "node_pools": node_pools,
    })
}

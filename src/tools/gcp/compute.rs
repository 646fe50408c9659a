//! Compute Engine instance tools.
//!
//! Listing and lookup return a flattened summary of each instance (see
//! [`instance_summary`]); start, stop and operation waits return the raw
//! zone operation resource.

use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::time::Instant;

use super::client::{is_not_found, last_segment, Api, GcpClient};
use crate::error::RegistryError;
use crate::mcp::handler::{tool_fn, Arguments, ToolError};
use crate::mcp::registry::Registry;
use crate::mcp::schema::{ParamSpec, ToolSpec};

const NOT_AVAILABLE: &str = "N/A";

/// How long start and stop wait for their operation when asked to.
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Pause between `wait` calls that come back before the operation is done.
const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Registers the Compute Engine tools.
///
/// # Errors
///
/// Returns an error if a declaration is invalid or a name is taken.
pub fn register(registry: &mut Registry, client: &GcpClient) -> Result<(), RegistryError> {
    let c = client.clone();
    registry.register_tool(
        ToolSpec::new("list_gce_instances")
            .summary("Lists Google Compute Engine (GCE) instances in a project, optionally limited to one zone.")
            .description(
                "Without a zone, instances from every zone in the project are listed. \
                 Each entry is a summary similar to the console's instance list.",
            )
            .param(project_id())
            .param(
                ParamSpec::new("zone", "optional<string>")
                    .describe("Zone to list, e.g. \"us-central1-a\". Omit for all zones."),
            )
            .returns("array<object>", "One summary per instance: Name, Zone, Status, Machine Type, IPs, boot disk and creation time.")
            .example(r#"list_gce_instances(project_id="my-project", zone="us-west1-b")"#)
            .note("Requires the compute.instances.list permission on the project.")
            .note("Listing all zones uses the aggregated list and is slower in large projects.")
            .build(tool_fn(move |args| {
                let client = c.clone();
                async move { list_instances(&client, &args).await }
            }))?,
    )?;

    let c = client.clone();
    registry.register_tool(
        ToolSpec::new("get_gce_instance")
            .summary("Retrieves the summary of a single Compute Engine instance.")
            .param(project_id())
            .param(zone())
            .param(instance_name())
            .returns("object", "Instance summary: Name, Zone, Status, Machine Type, IPs, boot disk and creation time.")
            .example(r#"get_gce_instance(project_id="my-project", zone="europe-west2-c", instance_name="app-server")"#)
            .note("Requires the compute.instances.get permission on the project.")
            .build(tool_fn(move |args| {
                let client = c.clone();
                async move { get_instance(&client, &args).await }
            }))?,
    )?;

    for action in [Action::Start, Action::Stop] {
        let c = client.clone();
        registry.register_tool(
            ToolSpec::new(action.tool_name())
                .summary(action.summary())
                .param(project_id())
                .param(zone())
                .param(instance_name())
                .param(
                    ParamSpec::new("wait_for_completion", "boolean")
                        .describe("Wait for the zone operation to finish before returning.")
                        .default(json!(true)),
                )
                .returns(
                    "object",
                    "The zone operation. When waiting, the finished operation annotated with initial_action and instance_name.",
                )
                .build(tool_fn(move |args| {
                    let client = c.clone();
                    async move { change_state(&client, &args, action).await }
                }))?,
        )?;
    }

    let c = client.clone();
    registry.register_tool(
        ToolSpec::new("wait_gce_operation")
            .summary("Waits for a Compute Engine zone operation to reach DONE.")
            .param(project_id())
            .param(zone())
            .param(
                ParamSpec::new("operation_name", "string")
                    .describe("Operation name returned by start_gce_instance or stop_gce_instance."),
            )
            .param(
                ParamSpec::new("timeout", "integer")
                    .describe("Maximum seconds to wait in total.")
                    .default(json!(300)),
            )
            .returns(
                "object",
                "The operation. When it is not DONE in time, error.code is OPERATION_TIMEOUT.",
            )
            .note("Requires the compute.zoneOperations.wait permission.")
            .note("The request timeout (limits.request_timeout_secs) still applies on top of timeout.")
            .build(tool_fn(move |args| {
                let client = c.clone();
                async move {
                    let project_id = args.str("project_id")?;
                    let zone = args.str("zone")?;
                    let operation = args.str("operation_name")?;
                    let timeout = u64::try_from(args.i64("timeout")?).map_err(|_| {
                        ToolError::new("timeout must not be negative")
                            .with_detail(json!({ "timeout": args.get("timeout") }))
                    })?;
                    wait_operation(&client, project_id, zone, operation, Duration::from_secs(timeout))
                        .await
                }
            }))?,
    )?;

    Ok(())
}

fn project_id() -> ParamSpec {
    ParamSpec::new("project_id", "string").describe("Google Cloud project ID.")
}

fn zone() -> ParamSpec {
    ParamSpec::new("zone", "string").describe("Zone of the instance, e.g. \"us-central1-a\".")
}

fn instance_name() -> ParamSpec {
    ParamSpec::new("instance_name", "string").describe("Name of the instance.")
}

async fn list_instances(client: &GcpClient, args: &Arguments) -> Result<Value, ToolError> {
    let project_id = args.str("project_id")?;
    let zone = args.opt_str("zone");
    let context = json!({ "project_id": project_id, "zone": zone.unwrap_or("-") });

    let mut summaries = Vec::new();
    if let Some(zone) = zone {
        let url = client.url(
            Api::Compute,
            &format!("projects/{project_id}/zones/{zone}/instances"),
        );
        for page in client.get_pages(&url, &[], &context).await? {
            for instance in items(&page) {
                summaries.push(instance_summary(project_id, instance));
            }
        }
    } else {
        let url = client.url(
            Api::Compute,
            &format!("projects/{project_id}/aggregated/instances"),
        );
        for page in client.get_pages(&url, &[], &context).await? {
            let Some(scopes) = page.get("items").and_then(Value::as_object) else {
                continue;
            };
            for scoped in scopes.values() {
                for instance in scoped
                    .get("instances")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                {
                    summaries.push(instance_summary(project_id, instance));
                }
            }
        }
    }

    tracing::debug!(project_id = %project_id, count = summaries.len(), "Listed GCE instances");
    Ok(Value::Array(summaries))
}

async fn get_instance(client: &GcpClient, args: &Arguments) -> Result<Value, ToolError> {
    let project_id = args.str("project_id")?;
    let zone = args.str("zone")?;
    let name = args.str("instance_name")?;
    let context = json!({ "project_id": project_id, "zone": zone, "instance_name": name });

    let url = client.url(
        Api::Compute,
        &format!("projects/{project_id}/zones/{zone}/instances/{name}"),
    );
    match client.get(&url, &[], &context).await {
        Ok(instance) => Ok(instance_summary(project_id, &instance)),
        Err(e) if is_not_found(&e) => Err(ToolError {
            message: format!(
                "GCE instance '{name}' not found in zone '{zone}' in project '{project_id}'."
            ),
            detail: e.detail,
        }),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Start,
    Stop,
}

impl Action {
    const fn verb(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }

    const fn tool_name(self) -> &'static str {
        match self {
            Self::Start => "start_gce_instance",
            Self::Stop => "stop_gce_instance",
        }
    }

    const fn summary(self) -> &'static str {
        match self {
            Self::Start => "Starts a Compute Engine instance.",
            Self::Stop => "Stops a Compute Engine instance.",
        }
    }
}

async fn change_state(
    client: &GcpClient,
    args: &Arguments,
    action: Action,
) -> Result<Value, ToolError> {
    let project_id = args.str("project_id")?;
    let zone = args.str("zone")?;
    let name = args.str("instance_name")?;
    let wait = args.bool("wait_for_completion")?;
    let context = json!({
        "project_id": project_id,
        "zone": zone,
        "instance_name": name,
        "action": action.verb(),
    });

    tracing::info!(
        project_id = %project_id,
        zone = %zone,
        instance = %name,
        action = action.verb(),
        "Changing GCE instance state"
    );

    let url = client.url(
        Api::Compute,
        &format!(
            "projects/{project_id}/zones/{zone}/instances/{name}/{}",
            action.verb()
        ),
    );
    let operation = match client.post(&url, &json!({}), &context).await {
        Ok(operation) => operation,
        Err(e) if is_not_found(&e) => {
            return Err(ToolError {
                message: format!("GCE instance '{name}' not found."),
                detail: e.detail,
            })
        }
        Err(e) => return Err(e),
    };

    if !wait {
        return Ok(operation);
    }

    let Some(operation_name) = operation
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
    else {
        return Err(ToolError::new(format!(
            "{} operation for '{name}' was accepted but returned no operation name",
            action.verb()
        ))
        .with_detail(json!({ "context": context, "operation": operation })));
    };

    let mut finished =
        wait_operation(client, project_id, zone, operation_name, DEFAULT_WAIT_TIMEOUT).await?;
    if let Some(fields) = finished.as_object_mut() {
        fields.insert("initial_action".to_string(), json!(action.verb()));
        fields.insert("instance_name".to_string(), json!(name));
        fields
            .entry("operation_id")
            .or_insert_with(|| json!(operation_name));
    }
    Ok(finished)
}

/// Calls the zone operation's `wait` endpoint until it reports `DONE` or
/// `timeout` passes. On timeout the last operation is returned with an
/// `OPERATION_TIMEOUT` error attached.
async fn wait_operation(
    client: &GcpClient,
    project_id: &str,
    zone: &str,
    operation: &str,
    timeout: Duration,
) -> Result<Value, ToolError> {
    let context = json!({ "project_id": project_id, "zone": zone, "operation_name": operation });
    let url = client.url(
        Api::Compute,
        &format!("projects/{project_id}/zones/{zone}/operations/{operation}/wait"),
    );
    let deadline = Instant::now() + timeout;

    loop {
        let mut current = match client.post(&url, &json!({}), &context).await {
            Ok(current) => current,
            Err(e) if is_not_found(&e) => {
                return Err(ToolError {
                    message: format!(
                        "GCE zone operation '{operation}' not found in zone '{zone}' in project '{project_id}'."
                    ),
                    detail: e.detail,
                })
            }
            Err(e) => return Err(e),
        };

        if current.get("status").and_then(Value::as_str) == Some("DONE") {
            return Ok(current);
        }

        if Instant::now() >= deadline {
            tracing::warn!(operation = %operation, timeout_secs = timeout.as_secs(), "Timed out waiting for GCE operation");
            if let Some(fields) = current.as_object_mut() {
                fields.insert(
                    "error".to_string(),
                    json!({
                        "message": format!("Timed out after {} seconds.", timeout.as_secs()),
                        "code": "OPERATION_TIMEOUT",
                    }),
                );
            }
            return Ok(current);
        }

        tracing::debug!(operation = %operation, status = ?current.get("status"), "Operation still running");
        tokio::time::sleep(WAIT_POLL_INTERVAL).await;
    }
}

fn items(page: &Value) -> impl Iterator<Item = &Value> {
    page.get("items")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

/// Flattens an instance resource into the fields shown in an instance list.
///
/// Missing fields read as `"N/A"`. The boot disk is the disk flagged `boot`,
/// else the first attached disk.
#[must_use]
pub fn instance_summary(project_id: &str, instance: &Value) -> Value {
    let text = |v: Option<&Value>| -> Value {
        v.filter(|v| !v.is_null())
            .cloned()
            .unwrap_or_else(|| json!(NOT_AVAILABLE))
    };

    let nic = instance
        .get("networkInterfaces")
        .and_then(Value::as_array)
        .and_then(|nics| nics.first());
    let internal_ip = text(nic.and_then(|n| n.get("networkIP")));
    let external_ip = text(
        nic.and_then(|n| n.get("accessConfigs"))
            .and_then(Value::as_array)
            .and_then(|configs| configs.first())
            .and_then(|c| c.get("natIP")),
    );

    let disks = instance
        .get("disks")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let boot_disk = disks
        .iter()
        .find(|d| d.get("boot").and_then(Value::as_bool) == Some(true))
        .or_else(|| disks.first());

    let mut summary = Map::new();
    summary.insert("Project ID".into(), json!(project_id));
    summary.insert(
        "Name".into(),
        json!(instance.get("name").and_then(Value::as_str).unwrap_or("Unknown")),
    );
    summary.insert(
        "Zone".into(),
        json!(instance
            .get("zone")
            .and_then(Value::as_str)
            .map_or("Unknown", last_segment)),
    );
    summary.insert(
        "Status".into(),
        json!(instance.get("status").and_then(Value::as_str).unwrap_or("UNKNOWN")),
    );
    summary.insert(
        "Machine Type".into(),
        json!(instance
            .get("machineType")
            .and_then(Value::as_str)
            .map_or("", last_segment)),
    );
    summary.insert("Internal IP".into(), internal_ip);
    summary.insert("External IP".into(), external_ip);
    summary.insert(
        "Boot Disk Name".into(),
        text(boot_disk.and_then(|d| d.get("deviceName"))),
    );
    summary.insert(
        "Boot Disk Size (GB)".into(),
        text(boot_disk.and_then(|d| d.get("diskSizeGb"))),
    );
    summary.insert(
        "Creation Timestamp".into(),
        json!(format_timestamp(
            instance.get("creationTimestamp").and_then(Value::as_str)
        )),
    );
    Value::Object(summary)
}

/// Renders an RFC 3339 timestamp as `YYYY-MM-DD HH:MM:SS ±hh:mm`.
///
/// Unparseable input is returned unchanged; absent input is `"N/A"`.
#[must_use]
pub fn format_timestamp(raw: Option<&str>) -> String {
    match raw.filter(|s| !s.is_empty()) {
        None => NOT_AVAILABLE.to_string(),
        Some(s) => chrono::DateTime::parse_from_rfc3339(s).map_or_else(
            |_| s.to_string(),
            |dt| dt.format("%Y-%m-%d %H:%M:%S %:z").to_string(),
        ),
    }
}

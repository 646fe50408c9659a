//! Cloud SQL instance tools.
//!
//! Starting and stopping patch the instance's activation policy (`ALWAYS` or
//! `NEVER`) and return immediately with the operation id; callers poll it
//! with `wait_cloudsql_operation`.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, SecondsFormat};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::Instant;

use super::client::{last_segment, Api, GcpClient};
use crate::error::RegistryError;
use crate::mcp::handler::{tool_fn, Arguments, ToolError};
use crate::mcp::registry::Registry;
use crate::mcp::schema::{ParamSpec, ToolSpec};

/// Flattened view of a Cloud SQL instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CloudSqlItem {
    pub name: String,
    pub database_type: String,
    pub database_version: String,
    /// `RUNNING` when the activation policy is `ALWAYS`, else `STOPPED`.
    pub status: String,
    pub zone: String,
    pub is_replica: bool,
    pub is_ha_enabled: bool,
    pub is_ssl_enabled: bool,
    pub disk_size: i64,
    pub disk_type: String,
    pub machine_type: String,
    pub create_time: Option<String>,
    pub internal_ip_address: Option<String>,
    pub public_ip_address: Option<String>,
    pub ma_reschedulable: Option<bool>,
    pub ma_start_time: Option<String>,
    pub ma_deadline_time: Option<String>,
    pub ma_version: Option<String>,
    pub ma_available_version: Vec<String>,
}

impl CloudSqlItem {
    /// Builds the item from an instance resource.
    #[must_use]
    pub fn from_instance(instance: &Value) -> Self {
        let str_at = |v: &Value, key: &str| -> String {
            v.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
        };
        let settings = instance.get("settings").cloned().unwrap_or(Value::Null);

        let version = str_at(instance, "databaseVersion");
        let mut parts = version.split('_');
        let database_type = parts.next().map(database_type).unwrap_or_default();
        let database_version = parts.collect::<Vec<_>>().join(".");

        let ssl_mode = settings
            .get("ipConfiguration")
            .and_then(|c| c.get("sslMode"))
            .and_then(Value::as_str)
            .unwrap_or("ALLOW_UNENCRYPTED_AND_ENCRYPTED");

        let mut item = Self {
            name: str_at(instance, "name"),
            database_type,
            database_version,
            status: if settings.get("activationPolicy").and_then(Value::as_str) == Some("ALWAYS") {
                "RUNNING".to_string()
            } else {
                "STOPPED".to_string()
            },
            zone: str_at(instance, "gceZone"),
            is_replica: instance.get("instanceType").and_then(Value::as_str)
                == Some("READ_REPLICA_INSTANCE"),
            is_ha_enabled: settings.get("availabilityType").and_then(Value::as_str)
                == Some("REGIONAL"),
            is_ssl_enabled: ssl_mode == "TRUSTED_CLIENT_CERTIFICATE_REQUIRED",
            disk_size: settings.get("dataDiskSizeGb").map_or(0, int_field),
            disk_type: str_at(&settings, "dataDiskType"),
            machine_type: str_at(&settings, "tier"),
            create_time: instance
                .get("createTime")
                .and_then(Value::as_str)
                .and_then(parse_time),
            ..Self::default()
        };

        for address in instance
            .get("ipAddresses")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let ip = address
                .get("ipAddress")
                .and_then(Value::as_str)
                .map(str::to_owned);
            match address.get("type").and_then(Value::as_str) {
                Some("PRIVATE") => item.internal_ip_address = ip,
                Some("PRIMARY") => item.public_ip_address = ip,
                _ => {}
            }
        }

        if let Some(maintenance) = instance.get("scheduledMaintenance") {
            item.ma_reschedulable =
                Some(maintenance.get("canReschedule").and_then(Value::as_bool) == Some(true));
            item.ma_start_time = maintenance
                .get("startTime")
                .and_then(Value::as_str)
                .and_then(parse_time);
            item.ma_deadline_time = maintenance
                .get("scheduleDeadlineTime")
                .and_then(Value::as_str)
                .and_then(parse_time);
            item.ma_version = instance
                .get("maintenanceVersion")
                .and_then(Value::as_str)
                .map(str::to_owned);
            item.ma_available_version = instance
                .get("availableMaintenanceVersions")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect();
        }

        item
    }
}

fn database_type(engine: &str) -> String {
    match engine.to_ascii_uppercase().as_str() {
        "" => String::new(),
        "MYSQL" => "MySQL".to_string(),
        "POSTGRES" => "Postgres".to_string(),
        _ => {
            let lower = engine.to_ascii_lowercase();
            let mut chars = lower.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect()
            })
        }
    }
}

/// Int64 fields arrive as JSON strings.
fn int_field(value: &Value) -> i64 {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(0)
}

/// Normalises an RFC 3339 timestamp; anything unparseable reads as absent.
fn parse_time(raw: &str) -> Option<String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw.trim_end_matches('Z'), fmt).ok())
        .map(|dt| dt.and_utc().to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// Registers the Cloud SQL tools.
///
/// # Errors
///
/// Returns an error if a declaration is invalid or a name is taken.
pub fn register(registry: &mut Registry, client: &GcpClient) -> Result<(), RegistryError> {
    let c = client.clone();
    registry.register_tool(
        ToolSpec::new("list_cloudsql_instances")
            .summary("Lists Cloud SQL instances in a project, optionally filtered by region.")
            .param(project_id())
            .param(
                ParamSpec::new("region", "string")
                    .describe("Region to keep, or \"-\" for all regions.")
                    .default(json!("-")),
            )
            .returns("object", "{\"instances\": [...]} with one flattened item per instance.")
            .example(r#"list_cloudsql_instances(project_id="my-project", region="us-central1")"#)
            .note("Requires Cloud SQL Viewer or Admin permissions.")
            .build(tool_fn(move |args| {
                let client = c.clone();
                async move { list_instances(&client, &args).await }
            }))?,
    )?;

    let c = client.clone();
    registry.register_tool(
        ToolSpec::new("get_cloudsql_instance")
            .summary("Gets the details of one Cloud SQL instance.")
            .description("Returns configuration, status, endpoints and scheduled maintenance.")
            .param(project_id())
            .param(instance_name())
            .returns("object", "Flattened instance item: name, database type and version, status, IPs, zone, disk and maintenance fields.")
            .note("Requires Cloud SQL Viewer or Admin permissions.")
            .build(tool_fn(move |args| {
                let client = c.clone();
                async move {
                    let project_id = args.str("project_id")?;
                    let name = args.str("instance_name")?;
                    let context = json!({ "project_id": project_id, "instance_name": name });
                    let url = client.url(Api::Sql, &format!("projects/{project_id}/instances/{name}"));
                    let instance = client.get(&url, &[], &context).await?;
                    tracing::info!(instance = %name, "Fetched Cloud SQL instance");
                    to_value(&CloudSqlItem::from_instance(&instance))
                }
            }))?,
    )?;

    for (tool, policy, status, summary) in [
        (
            "start_cloudsql_instance",
            "ALWAYS",
            "STARTING",
            "Starts a stopped Cloud SQL instance by setting its activation policy to ALWAYS.",
        ),
        (
            "stop_cloudsql_instance",
            "NEVER",
            "STOPPING",
            "Stops a running Cloud SQL instance by setting its activation policy to NEVER.",
        ),
    ] {
        let c = client.clone();
        registry.register_tool(
            ToolSpec::new(tool)
                .summary(summary)
                .param(project_id())
                .param(instance_name())
                .returns(
                    "object",
                    format!("{{\"status\": \"{status}\", \"instance\": name, \"operation\": operation id}}"),
                )
                .example(format!(r#"{tool}("my-project", "testdb1")"#))
                .note("Poll the returned operation with wait_cloudsql_operation.")
                .note("Read replicas cannot be stopped.")
                .build(tool_fn(move |args| {
                    let client = c.clone();
                    async move { set_activation_policy(&client, &args, policy, status).await }
                }))?,
        )?;
    }

    let c = client.clone();
    registry.register_tool(
        ToolSpec::new("wait_cloudsql_operation")
            .summary("Polls a Cloud SQL Admin operation until it is DONE or the timeout passes.")
            .param(project_id())
            .param(ParamSpec::new("operation_id", "string").describe("Operation id returned by an asynchronous call."))
            .param(
                ParamSpec::new("poll_interval", "integer")
                    .describe("Seconds between polls.")
                    .default(json!(2)),
            )
            .param(
                ParamSpec::new("timeout", "integer")
                    .describe("Maximum seconds to wait in total.")
                    .default(json!(300)),
            )
            .returns(
                "object",
                "The final operation. On success instance_details holds the instance; on timeout error.code is OPERATION_TIMEOUT.",
            )
            .note("The server's request timeout also bounds the wait.")
            .build(tool_fn(move |args| {
                let client = c.clone();
                async move { wait_operation(&client, &args).await }
            }))?,
    )?;

    Ok(())
}

fn project_id() -> ParamSpec {
    ParamSpec::new("project_id", "string").describe("Google Cloud project ID.")
}

fn instance_name() -> ParamSpec {
    ParamSpec::new("instance_name", "string").describe("Name of the Cloud SQL instance.")
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::new(format!("failed to encode result: {e}")))
}

async fn list_instances(client: &GcpClient, args: &Arguments) -> Result<Value, ToolError> {
    let project_id = args.str("project_id")?;
    let region = args.str("region")?;
    let context = json!({ "project_id": project_id, "region": region });

    let url = client.url(Api::Sql, &format!("projects/{project_id}/instances"));
    let mut instances = Vec::new();
    for page in client.get_pages(&url, &[], &context).await? {
        for instance in page.get("items").and_then(Value::as_array).into_iter().flatten() {
            if region != "-" && instance.get("region").and_then(Value::as_str) != Some(region) {
                continue;
            }
            instances.push(to_value(&CloudSqlItem::from_instance(instance))?);
        }
    }

    tracing::info!(project_id = %project_id, count = instances.len(), "Listed Cloud SQL instances");
    Ok(json!({ "instances": instances }))
}

async fn set_activation_policy(
    client: &GcpClient,
    args: &Arguments,
    policy: &str,
    status: &str,
) -> Result<Value, ToolError> {
    let project_id = args.str("project_id")?;
    let name = args.str("instance_name")?;
    let context = json!({
        "project_id": project_id,
        "instance_name": name,
        "activation_policy": policy,
    });

    let url = client.url(Api::Sql, &format!("projects/{project_id}/instances/{name}"));
    let body = json!({ "settings": { "activationPolicy": policy } });
    let operation = client.patch(&url, &body, &context).await?;
    let operation_id = operation
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default();

    tracing::info!(instance = %name, operation = %operation_id, policy, "Requested Cloud SQL activation change");
    Ok(json!({ "status": status, "instance": name, "operation": operation_id }))
}

async fn wait_operation(client: &GcpClient, args: &Arguments) -> Result<Value, ToolError> {
    let project_id = args.str("project_id")?;
    let operation_id = args.str("operation_id")?;
    let poll_interval = args.i64("poll_interval")?;
    let timeout = args.i64("timeout")?;
    let context = json!({ "project_id": project_id, "operation_id": operation_id });

    let (Ok(poll_secs), Ok(timeout_secs)) = (u64::try_from(poll_interval), u64::try_from(timeout))
    else {
        return Err(ToolError::new("poll_interval and timeout must not be negative")
            .with_detail(json!({ "context": context })));
    };
    if poll_secs == 0 {
        return Err(ToolError::new("poll_interval must be at least 1 second")
            .with_detail(json!({ "context": context })));
    }

    let url = client.url(
        Api::Sql,
        &format!("projects/{project_id}/operations/{operation_id}"),
    );
    let deadline = Instant::now() + Duration::from_secs(timeout_secs);

    loop {
        let mut operation = client.get(&url, &[], &context).await?;

        if operation.get("status").and_then(Value::as_str) == Some("DONE") {
            tracing::info!(operation = %operation_id, "Cloud SQL operation is DONE");
            attach_instance(client, project_id, &mut operation).await;
            return Ok(operation);
        }

        if Instant::now() >= deadline {
            tracing::warn!(operation = %operation_id, timeout_secs, "Timed out waiting for Cloud SQL operation");
            if let Some(fields) = operation.as_object_mut() {
                fields.insert(
                    "error".to_string(),
                    json!({
                        "message": format!("Timed out after {timeout_secs} seconds."),
                        "code": "OPERATION_TIMEOUT",
                    }),
                );
            }
            return Ok(operation);
        }

        tokio::time::sleep(Duration::from_secs(poll_secs)).await;
    }
}

/// Adds `instance_details` to a finished operation when its target resolves.
async fn attach_instance(client: &GcpClient, project_id: &str, operation: &mut Value) {
    let target = operation
        .get("targetId")
        .or_else(|| operation.get("targetLink"))
        .and_then(Value::as_str);
    let instance_operation = operation
        .get("operationType")
        .and_then(Value::as_str)
        .is_some_and(|kind| kind.to_ascii_lowercase().contains("instance"));
    if target.is_none() && !instance_operation {
        return;
    }

    // The operation's own `instance` field wins over the target resource.
    let named = operation
        .get("instance")
        .and_then(Value::as_str)
        .or_else(|| target.map(last_segment))
        .filter(|name| !name.is_empty())
        .map(str::to_owned);
    let Some(instance) = named else {
        return;
    };

    let url = client.url(Api::Sql, &format!("projects/{project_id}/instances/{instance}"));
    let context = json!({ "project_id": project_id, "instance_name": instance });
    match client.get(&url, &[], &context).await {
        Ok(details) => {
            if let Some(fields) = operation.as_object_mut() {
                fields.insert("instance_details".to_string(), details);
            }
        }
        Err(e) => {
            tracing::warn!(instance = %instance, error = %e, "Could not fetch instance state");
        }
    }
}

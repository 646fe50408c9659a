//! Google Cloud tools against a mock of the REST APIs.
//!
//! The mock serves just enough of Compute Engine, Cloud SQL Admin, GKE and
//! Cloud Monitoring to exercise paging, error mapping and the summaries.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use gcloud_mcp::config::{Config, GcpConfig};
use gcloud_mcp::mcp::protocol::RequestId;
use gcloud_mcp::mcp::{DispatchError, Dispatcher, ErrorKind, RequestEnvelope};
use gcloud_mcp::tools::build_registry;

const TOKEN_ENV: &str = "GCLOUD_MCP_IT_ACCESS_TOKEN";
const TOKEN: &str = "it-token";

fn authorised(headers: &HeaderMap) -> bool {
    headers.get("authorization").and_then(|v| v.to_str().ok()) == Some("Bearer it-token")
}

fn google_error(status: StatusCode, api_status: &str, message: &str) -> Response {
    (
        status,
        Json(json!({
            "error": { "code": status.as_u16(), "message": message, "status": api_status }
        })),
    )
        .into_response()
}

fn instance(name: &str, zone: &str) -> Value {
    json!({
        "name": name,
        "zone": format!("https://compute.googleapis.com/compute/v1/projects/demo/zones/{zone}"),
        "status": "RUNNING",
        "machineType": format!("https://compute.googleapis.com/compute/v1/projects/demo/zones/{zone}/machineTypes/e2-medium"),
        "networkInterfaces": [{ "networkIP": "10.128.0.5" }],
        "disks": [{ "deviceName": name, "boot": true, "diskSizeGb": "20" }],
        "creationTimestamp": "2024-04-01T10:00:00.000-07:00"
    })
}

async fn zone_instances(
    Path((_project, zone)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if !authorised(&headers) {
        return google_error(StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", "bad token");
    }
    match query.get("pageToken").map(String::as_str) {
        None => Json(json!({ "items": [instance("web-1", &zone)], "nextPageToken": "p2" })),
        Some("p2") => Json(json!({ "items": [instance("web-2", &zone)] })),
        Some(_) => Json(json!({})),
    }
    .into_response()
}

async fn aggregated_instances() -> Json<Value> {
    Json(json!({
        "items": {
            "zones/us-east1-b": { "instances": [instance("east-1", "us-east1-b")] },
            "zones/us-west1-a": { "warning": { "code": "NO_RESULTS_ON_PAGE" } },
            "zones/europe-west1-c": { "instances": [instance("eu-1", "europe-west1-c")] }
        }
    }))
}

async fn one_instance(Path((_project, zone, name)): Path<(String, String, String)>) -> Response {
    if name == "ghost" {
        return google_error(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "The resource 'ghost' was not found",
        );
    }
    Json(instance(&name, &zone)).into_response()
}

async fn instance_action(
    Path((_project, _zone, name, action)): Path<(String, String, String, String)>,
) -> Response {
    if name == "locked" {
        return google_error(StatusCode::FORBIDDEN, "PERMISSION_DENIED", "Permission denied");
    }
    Json(json!({ "name": format!("op-{action}-{name}"), "status": "RUNNING" })).into_response()
}

async fn wait_zone_operation(
    Path((_project, zone, operation)): Path<(String, String, String)>,
) -> Json<Value> {
    if operation == "op-stuck" {
        return Json(json!({ "name": operation, "zone": zone, "status": "RUNNING", "progress": 40 }));
    }
    Json(json!({ "name": operation, "zone": zone, "status": "DONE", "progress": 100 }))
}

async fn sql_instances() -> Json<Value> {
    Json(json!({
        "items": [
            {
                "name": "orders",
                "region": "us-central1",
                "databaseVersion": "POSTGRES_15",
                "settings": { "activationPolicy": "ALWAYS", "tier": "db-f1-micro" }
            },
            {
                "name": "archive",
                "region": "europe-west1",
                "databaseVersion": "MYSQL_8_0",
                "settings": { "activationPolicy": "NEVER" }
            }
        ]
    }))
}

async fn sql_instance(Path((_project, name)): Path<(String, String)>) -> Json<Value> {
    Json(json!({
        "name": name,
        "databaseVersion": "POSTGRES_15",
        "settings": { "activationPolicy": "ALWAYS" }
    }))
}

async fn patch_sql_instance(
    Path((_project, name)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let policy = body["settings"]["activationPolicy"].as_str().unwrap_or("");
    if policy != "ALWAYS" && policy != "NEVER" {
        return google_error(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", "bad policy");
    }
    Json(json!({ "name": format!("sql-op-{policy}-{name}") })).into_response()
}

async fn sql_operation(Path((_project, operation)): Path<(String, String)>) -> Json<Value> {
    if operation == "stuck" {
        Json(json!({ "name": operation, "status": "RUNNING" }))
    } else if operation == "op-restart" {
        Json(json!({
            "name": operation,
            "status": "DONE",
            "operationType": "RESTART",
            "instance": "replica-1",
            "targetId": "orders"
        }))
    } else {
        Json(json!({ "name": operation, "status": "DONE", "targetId": "orders" }))
    }
}

async fn clusters(Path((_project, location)): Path<(String, String)>) -> Json<Value> {
    Json(json!({
        "clusters": [
            {
                "name": "standard",
                "location": location,
                "nodePools": [{ "name": "default-pool", "initialNodeCount": 3 }]
            },
            {
                "name": "auto",
                "location": location,
                "autopilot": { "enabled": true },
                "nodePools": [{ "name": "hidden" }]
            }
        ]
    }))
}

async fn time_series(Query(query): Query<HashMap<String, String>>) -> Response {
    let expected = r#"metric.type="compute.googleapis.com/instance/cpu/utilization""#;
    if query.get("filter").map(String::as_str) != Some(expected)
        || query.get("view").map(String::as_str) != Some("FULL")
        || !query.contains_key("interval.startTime")
    {
        return google_error(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", "bad query");
    }
    Json(json!({ "timeSeries": [{ "points": [{ "value": { "doubleValue": 0.25 } }] }] }))
        .into_response()
}

async fn mock_api() -> String {
    let app = Router::new()
        .route(
            "/compute/v1/projects/{project}/zones/{zone}/instances",
            get(zone_instances),
        )
        .route(
            "/compute/v1/projects/{project}/aggregated/instances",
            get(aggregated_instances),
        )
        .route(
            "/compute/v1/projects/{project}/zones/{zone}/instances/{name}",
            get(one_instance),
        )
        .route(
            "/compute/v1/projects/{project}/zones/{zone}/instances/{name}/{action}",
            post(instance_action),
        )
        .route(
            "/compute/v1/projects/{project}/zones/{zone}/operations/{operation}/wait",
            post(wait_zone_operation),
        )
        .route("/sql/v1beta4/projects/{project}/instances", get(sql_instances))
        .route(
            "/sql/v1beta4/projects/{project}/instances/{name}",
            get(sql_instance).patch(patch_sql_instance),
        )
        .route(
            "/sql/v1beta4/projects/{project}/operations/{operation}",
            get(sql_operation),
        )
        .route(
            "/container/v1/projects/{project}/locations/{location}/clusters",
            get(clusters),
        )
        .route(
            "/monitoring/v3/projects/{project}/timeSeries",
            get(time_series),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn dispatcher_with(token_env: &str) -> Dispatcher {
    std::env::set_var(TOKEN_ENV, TOKEN);
    let root = mock_api().await;
    let mut config = Config::default();
    config.gcp = GcpConfig {
        access_token_env: token_env.to_string(),
        compute_endpoint: format!("{root}/compute/v1"),
        sql_endpoint: format!("{root}/sql/v1beta4"),
        container_endpoint: format!("{root}/container/v1"),
        monitoring_endpoint: format!("{root}/monitoring/v3"),
    };
    Dispatcher::new(Arc::new(build_registry(&config).unwrap()))
}

async fn dispatcher() -> Dispatcher {
    dispatcher_with(TOKEN_ENV).await
}

async fn call(dispatcher: &Dispatcher, tool: &str, arguments: Value) -> Result<Value, DispatchError> {
    let Value::Object(arguments) = arguments else {
        panic!("arguments must be an object");
    };
    dispatcher
        .dispatch(RequestEnvelope::new(RequestId::Number(1), tool, arguments))
        .await
        .outcome
}

#[tokio::test]
async fn list_gce_instances_follows_pages() {
    let d = dispatcher().await;
    let result = call(
        &d,
        "list_gce_instances",
        json!({ "project_id": "demo", "zone": "us-central1-a" }),
    )
    .await
    .unwrap();

    let instances = result.as_array().unwrap();
    assert_eq!(instances.len(), 2);
    assert_eq!(instances[0]["Name"], "web-1");
    assert_eq!(instances[1]["Name"], "web-2");
    assert_eq!(instances[0]["Zone"], "us-central1-a");
    assert_eq!(instances[0]["Machine Type"], "e2-medium");
    assert_eq!(instances[0]["External IP"], "N/A");
    assert_eq!(instances[0]["Boot Disk Size (GB)"], "20");
    assert_eq!(instances[0]["Creation Timestamp"], "2024-04-01 10:00:00 -07:00");
}

#[tokio::test]
async fn list_gce_instances_without_zone_aggregates() {
    let d = dispatcher().await;
    let result = call(&d, "list_gce_instances", json!({ "project_id": "demo" }))
        .await
        .unwrap();

    let mut names: Vec<&str> = result
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["Name"].as_str().unwrap())
        .collect();
    names.sort_unstable();
    assert_eq!(names, ["east-1", "eu-1"]);
}

#[tokio::test]
async fn get_gce_instance_not_found_is_tool_error() {
    let d = dispatcher().await;
    let err = call(
        &d,
        "get_gce_instance",
        json!({ "project_id": "demo", "zone": "us-east1-b", "instance_name": "ghost" }),
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind, ErrorKind::ToolExecutionError);
    assert_eq!(
        err.message,
        "GCE instance 'ghost' not found in zone 'us-east1-b' in project 'demo'."
    );
    let detail = err.detail.unwrap();
    assert_eq!(detail["status"], 404);
    assert_eq!(detail["api_status"], "NOT_FOUND");
    assert_eq!(detail["context"]["instance_name"], "ghost");
}

#[tokio::test]
async fn start_gce_instance_waits_and_annotates() {
    let d = dispatcher().await;
    let result = call(
        &d,
        "start_gce_instance",
        json!({ "project_id": "demo", "zone": "us-east1-b", "instance_name": "web-1" }),
    )
    .await
    .unwrap();

    assert_eq!(result["status"], "DONE");
    assert_eq!(result["initial_action"], "start");
    assert_eq!(result["instance_name"], "web-1");
    assert_eq!(result["operation_id"], "op-start-web-1");
}

#[tokio::test]
async fn stop_gce_instance_without_waiting_returns_operation() {
    let d = dispatcher().await;
    let result = call(
        &d,
        "stop_gce_instance",
        json!({
            "project_id": "demo",
            "zone": "us-east1-b",
            "instance_name": "web-1",
            "wait_for_completion": "false"
        }),
    )
    .await
    .unwrap();

    assert_eq!(result["name"], "op-stop-web-1");
    assert_eq!(result["status"], "RUNNING");
    assert!(result.get("initial_action").is_none());
}

#[tokio::test]
async fn gce_wait_gives_up_at_its_timeout() {
    let d = dispatcher().await;
    let result = call(
        &d,
        "wait_gce_operation",
        json!({ "project_id": "demo", "zone": "us-east1-b", "operation_name": "op-stuck", "timeout": 0 }),
    )
    .await
    .unwrap();

    assert_eq!(result["status"], "RUNNING");
    assert_eq!(result["error"]["code"], "OPERATION_TIMEOUT");
    assert_eq!(result["error"]["message"], "Timed out after 0 seconds.");
}

#[tokio::test]
async fn gce_wait_rejects_negative_timeout() {
    let d = dispatcher().await;
    let err = call(
        &d,
        "wait_gce_operation",
        json!({ "project_id": "demo", "zone": "us-east1-b", "operation_name": "op-1", "timeout": -5 }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ToolExecutionError);
    assert_eq!(err.message, "timeout must not be negative");
}

#[tokio::test]
async fn permission_denied_carries_api_status() {
    let d = dispatcher().await;
    let err = call(
        &d,
        "stop_gce_instance",
        json!({ "project_id": "demo", "zone": "us-east1-b", "instance_name": "locked" }),
    )
    .await
    .unwrap_err();

    assert_eq!(err.message, "Permission denied");
    let detail = err.detail.unwrap();
    assert_eq!(detail["status"], 403);
    assert_eq!(detail["api_status"], "PERMISSION_DENIED");
    assert_eq!(detail["context"]["action"], "stop");
}

#[tokio::test]
async fn missing_token_is_tool_error() {
    let d = dispatcher_with("GCLOUD_MCP_IT_TOKEN_NEVER_SET").await;
    let err = call(&d, "list_gke_clusters", json!({ "project_id": "demo" }))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ToolExecutionError);
    assert!(err.message.starts_with("no access token"));
}

#[tokio::test]
async fn cloudsql_list_filters_region() {
    let d = dispatcher().await;
    let all = call(&d, "list_cloudsql_instances", json!({ "project_id": "demo" }))
        .await
        .unwrap();
    assert_eq!(all["instances"].as_array().unwrap().len(), 2);

    let one = call(
        &d,
        "list_cloudsql_instances",
        json!({ "project_id": "demo", "region": "europe-west1" }),
    )
    .await
    .unwrap();
    let instances = one["instances"].as_array().unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0]["name"], "archive");
    assert_eq!(instances[0]["database_type"], "MySQL");
    assert_eq!(instances[0]["database_version"], "8.0");
    assert_eq!(instances[0]["status"], "STOPPED");
}

#[tokio::test]
async fn cloudsql_start_and_stop_patch_policy() {
    let d = dispatcher().await;
    let started = call(
        &d,
        "start_cloudsql_instance",
        json!({ "project_id": "demo", "instance_name": "orders" }),
    )
    .await
    .unwrap();
    assert_eq!(
        started,
        json!({ "status": "STARTING", "instance": "orders", "operation": "sql-op-ALWAYS-orders" })
    );

    let stopped = call(
        &d,
        "stop_cloudsql_instance",
        json!({ "project_id": "demo", "instance_name": "orders" }),
    )
    .await
    .unwrap();
    assert_eq!(stopped["status"], "STOPPING");
    assert_eq!(stopped["operation"], "sql-op-NEVER-orders");
}

#[tokio::test]
async fn cloudsql_wait_attaches_instance_details() {
    let d = dispatcher().await;
    let result = call(
        &d,
        "wait_cloudsql_operation",
        json!({ "project_id": "demo", "operation_id": "op-7" }),
    )
    .await
    .unwrap();
    assert_eq!(result["status"], "DONE");
    assert_eq!(result["instance_details"]["name"], "orders");
}

#[tokio::test]
async fn cloudsql_wait_prefers_operation_instance_over_target() {
    let d = dispatcher().await;
    let result = call(
        &d,
        "wait_cloudsql_operation",
        json!({ "project_id": "demo", "operation_id": "op-restart" }),
    )
    .await
    .unwrap();
    assert_eq!(result["instance_details"]["name"], "replica-1");
}

#[tokio::test]
async fn cloudsql_wait_times_out() {
    let d = dispatcher().await;
    let result = call(
        &d,
        "wait_cloudsql_operation",
        json!({ "project_id": "demo", "operation_id": "stuck", "poll_interval": 1, "timeout": 0 }),
    )
    .await
    .unwrap();
    assert_eq!(result["status"], "RUNNING");
    assert_eq!(result["error"]["code"], "OPERATION_TIMEOUT");
    assert_eq!(result["error"]["message"], "Timed out after 0 seconds.");
}

#[tokio::test]
async fn gke_clusters_hide_autopilot_pools() {
    let d = dispatcher().await;
    let result = call(
        &d,
        "list_gke_clusters",
        json!({ "project_id": "demo", "location": "us-central1" }),
    )
    .await
    .unwrap();

    let clusters = result["clusters"].as_array().unwrap();
    assert_eq!(clusters[0]["location"], "us-central1");
    assert_eq!(clusters[0]["node_pools"][0]["name"], "default-pool");
    assert_eq!(clusters[1]["autopilot"]["enabled"], true);
    assert_eq!(clusters[1]["node_pools"], json!([]));
}

#[tokio::test]
async fn get_metric_sends_filter_and_window() {
    let d = dispatcher().await;
    let result = call(
        &d,
        "get_metric",
        json!({
            "project_id": "demo",
            "metric_type": "compute.googleapis.com/instance/cpu/utilization",
            "minutes": "15"
        }),
    )
    .await
    .unwrap();
    assert_eq!(
        result["time_series"][0]["points"][0]["value"]["doubleValue"],
        0.25
    );

    let err = call(
        &d,
        "get_metric",
        json!({ "project_id": "demo", "metric_type": "x", "minutes": 0 }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.message, "minutes must be greater than zero");
}

//! Cloud Monitoring time-series lookup.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::{json, Value};

use super::client::{Api, GcpClient};
use crate::error::RegistryError;
use crate::mcp::handler::{tool_fn, Arguments, ToolError};
use crate::mcp::registry::Registry;
use crate::mcp::schema::{ParamSpec, ToolSpec};

/// Registers `get_metric`.
///
/// # Errors
///
/// Returns an error if the declaration is invalid or the name is taken.
pub fn register(registry: &mut Registry, client: &GcpClient) -> Result<(), RegistryError> {
    let c = client.clone();
    registry.register_tool(
        ToolSpec::new("get_metric")
            .summary("Fetches recent time series for a Cloud Monitoring metric type.")
            .param(ParamSpec::new("project_id", "string").describe("Google Cloud project ID."))
            .param(
                ParamSpec::new("metric_type", "string")
                    .describe("Metric type, e.g. \"compute.googleapis.com/instance/cpu/utilization\"."),
            )
            .param(
                ParamSpec::new("minutes", "integer")
                    .describe("Length of the window ending now, in minutes.")
                    .default(json!(5)),
            )
            .returns("object", "{\"time_series\": [...]} in the API's full view.")
            .example(r#"get_metric("my-project", "compute.googleapis.com/instance/cpu/utilization", minutes=15)"#)
            .build(tool_fn(move |args| {
                let client = c.clone();
                async move { get_metric(&client, &args, Utc::now()).await }
            }))?,
    )
}

async fn get_metric(
    client: &GcpClient,
    args: &Arguments,
    now: DateTime<Utc>,
) -> Result<Value, ToolError> {
    let project_id = args.str("project_id")?;
    let metric_type = args.str("metric_type")?;
    let minutes = args.i64("minutes")?;
    let context = json!({ "project_id": project_id, "metric_type": metric_type, "minutes": minutes });

    if minutes <= 0 {
        return Err(ToolError::new("minutes must be greater than zero")
            .with_detail(json!({ "context": context })));
    }

    if !is_plain_metric_type(metric_type) {
        return Err(ToolError::new(
            "metric_type must be a non-empty metric type without quotes, backslashes or spaces",
        )
        .with_detail(json!({ "context": context })));
    }

    let url = client.url(Api::Monitoring, &format!("projects/{project_id}/timeSeries"));
    let start = Duration::try_minutes(minutes)
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or_else(|| {
            ToolError::new("minutes is out of range").with_detail(json!({ "context": context }))
        })?;
    let query = series_query(metric_type, start, now);

    let mut series = Vec::new();
    for page in client.get_pages(&url, &query, &context).await? {
        if let Some(Value::Array(items)) = page.get("timeSeries") {
            series.extend(items.iter().cloned());
        }
    }

    tracing::debug!(metric = %metric_type, count = series.len(), "Fetched time series");
    Ok(json!({ "time_series": series }))
}

/// Metric types are quoted verbatim into the filter expression, so anything
/// that could close the quote or extend the expression is refused.
fn is_plain_metric_type(metric_type: &str) -> bool {
    !metric_type.is_empty()
        && !metric_type
            .chars()
            .any(|c| c == '"' || c == '\\' || c.is_whitespace() || c.is_control())
}

/// Query parameters for a `timeSeries.list` call over `[start, end]`.
fn series_query(
    metric_type: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<(&'static str, String)> {
    vec![
        ("filter", format!("metric.type=\"{metric_type}\"")),
        (
            "interval.startTime",
            start.to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
        (
            "interval.endTime",
            end.to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
        ("view", "FULL".to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn query_covers_window() {
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap();
        let start = now - Duration::minutes(5);
        let query = series_query("custom.googleapis.com/queue_depth", start, now);
        assert_eq!(
            query[0],
            ("filter", "metric.type=\"custom.googleapis.com/queue_depth\"".to_string())
        );
        assert_eq!(query[1].1, "2024-02-01T11:55:00Z");
        assert_eq!(query[2].1, "2024-02-01T12:00:00Z");
        assert_eq!(query[3], ("view", "FULL".to_string()));
    }

    #[test]
    fn metric_type_cannot_escape_the_filter() {
        assert!(is_plain_metric_type("compute.googleapis.com/instance/cpu/utilization"));
        assert!(!is_plain_metric_type(""));
        assert!(!is_plain_metric_type(r#"x" OR metric.type="y"#));
        assert!(!is_plain_metric_type(r"x\"));
        assert!(!is_plain_metric_type("a b"));
    }
}

//! Thin REST client for the Google Cloud APIs the tools call.
//!
//! The bearer token is read from the configured environment variable on
//! every call, so a token refreshed by the surrounding environment is picked
//! up without a restart. Failures come back as [`ToolError`] values whose
//! detail carries the HTTP status, the API's status string and the caller's
//! context object:
//!
//! ```json
//! { "status": 404, "api_status": "NOT_FOUND", "context": { "zone": "us-east1-b" } }
//! ```

use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};

use crate::config::GcpConfig;
use crate::mcp::handler::ToolError;

/// Upper bound on pages followed by a single list call.
const MAX_PAGES: usize = 100;

/// Google Cloud API families with a configurable root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Api {
    /// Compute Engine.
    Compute,
    /// Cloud SQL Admin.
    Sql,
    /// Kubernetes Engine.
    Container,
    /// Cloud Monitoring.
    Monitoring,
}

/// Shared HTTP client for every GCP tool.
#[derive(Debug, Clone)]
pub struct GcpClient {
    http: reqwest::Client,
    config: GcpConfig,
}

impl GcpClient {
    /// Creates a client for the configured endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(config: &GcpConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("gcloud-mcp/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            config: config.clone(),
        })
    }

    /// Joins `path` onto the root of `api`.
    #[must_use]
    pub fn url(&self, api: Api, path: &str) -> String {
        let root = match api {
            Api::Compute => &self.config.compute_endpoint,
            Api::Sql => &self.config.sql_endpoint,
            Api::Container => &self.config.container_endpoint,
            Api::Monitoring => &self.config.monitoring_endpoint,
        };
        format!(
            "{}/{}",
            root.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn token(&self, context: &Value) -> Result<String, ToolError> {
        match std::env::var(&self.config.access_token_env) {
            Ok(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(ToolError::new(format!(
                "no access token: set {} to an OAuth2 bearer token",
                self.config.access_token_env
            ))
            .with_detail(json!({ "context": context }))),
        }
    }

    /// Issues a GET and decodes the JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if no token is available, the request fails, or the
    /// API answers with a non-success status.
    pub async fn get(
        &self,
        url: &str,
        query: &[(&str, String)],
        context: &Value,
    ) -> Result<Value, ToolError> {
        let request = self.http.get(url).query(query);
        self.send(Method::GET, url, request, context).await
    }

    /// Issues a POST with a JSON body.
    ///
    /// # Errors
    ///
    /// See [`GcpClient::get`].
    pub async fn post(&self, url: &str, body: &Value, context: &Value) -> Result<Value, ToolError> {
        let request = self.http.post(url).json(body);
        self.send(Method::POST, url, request, context).await
    }

    /// Issues a PATCH with a JSON body.
    ///
    /// # Errors
    ///
    /// See [`GcpClient::get`].
    pub async fn patch(&self, url: &str, body: &Value, context: &Value) -> Result<Value, ToolError> {
        let request = self.http.patch(url).json(body);
        self.send(Method::PATCH, url, request, context).await
    }

    /// Follows `nextPageToken` and returns every page body in order.
    ///
    /// # Errors
    ///
    /// See [`GcpClient::get`]. A failure on any page fails the whole call.
    pub async fn get_pages(
        &self,
        url: &str,
        query: &[(&str, String)],
        context: &Value,
    ) -> Result<Vec<Value>, ToolError> {
        let mut pages = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = query.to_vec();
            if let Some(token) = page_token.take() {
                params.push(("pageToken", token));
            }
            let page = self.get(url, &params, context).await?;
            page_token = page
                .get("nextPageToken")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_owned);
            pages.push(page);

            if page_token.is_none() {
                break;
            }
            if pages.len() >= MAX_PAGES {
                tracing::warn!(url = %url, pages = pages.len(), "Stopped following page tokens");
                break;
            }
        }

        Ok(pages)
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        request: RequestBuilder,
        context: &Value,
    ) -> Result<Value, ToolError> {
        let token = self.token(context)?;
        tracing::debug!(method = %method, url = %url, "Calling Google Cloud API");

        let response = request.bearer_auth(token).send().await.map_err(|e| {
            ToolError::new(format!("request to {url} failed: {e}"))
                .with_detail(json!({ "context": context }))
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            ToolError::new(format!("reading response from {url} failed: {e}"))
                .with_detail(json!({ "status": status.as_u16(), "context": context }))
        })?;

        if !status.is_success() {
            tracing::debug!(status = status.as_u16(), url = %url, "Google Cloud API returned an error");
            return Err(api_error(status, &body, context));
        }

        if body.trim().is_empty() {
            return Ok(json!({}));
        }
        serde_json::from_str(&body).map_err(|e| {
            ToolError::new(format!("response from {url} is not JSON: {e}"))
                .with_detail(json!({ "status": status.as_u16(), "context": context }))
        })
    }
}

/// Builds the error for a non-success response.
///
/// Google APIs answer with `{"error": {"code", "message", "status"}}`; other
/// bodies are passed through as text.
fn api_error(status: StatusCode, body: &str, context: &Value) -> ToolError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));

    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map_or_else(
            || {
                let text = body.trim();
                if text.is_empty() {
                    format!("Google Cloud API returned {status}")
                } else {
                    format!("Google Cloud API returned {status}: {text}")
                }
            },
            str::to_owned,
        );
    let api_status = error
        .and_then(|e| e.get("status"))
        .cloned()
        .unwrap_or(Value::Null);

    ToolError::new(message).with_detail(json!({
        "status": status.as_u16(),
        "api_status": api_status,
        "context": context,
    }))
}

/// Whether `error` came from a `404` answer.
#[must_use]
pub fn is_not_found(error: &ToolError) -> bool {
    error
        .detail
        .as_ref()
        .and_then(|d| d.get("status"))
        .and_then(Value::as_u64)
        == Some(404)
}

/// Last path segment of a resource URL, or the input when it has none.
#[must_use]
pub fn last_segment(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GcpClient {
        let config = GcpConfig {
            compute_endpoint: "http://localhost:9/compute/v1/".to_string(),
            access_token_env: "GCLOUD_MCP_TEST_TOKEN_UNSET".to_string(),
            ..GcpConfig::default()
        };
        GcpClient::new(&config).unwrap()
    }

    #[test]
    fn url_joins_root_and_path() {
        let client = client();
        assert_eq!(
            client.url(Api::Compute, "/projects/p/zones/z/instances"),
            "http://localhost:9/compute/v1/projects/p/zones/z/instances"
        );
        assert_eq!(
            client.url(Api::Sql, "projects/p/instances"),
            "https://sqladmin.googleapis.com/v1beta4/projects/p/instances"
        );
    }

    #[test]
    fn google_error_body_is_unpacked() {
        let body = r#"{"error":{"code":403,"message":"Permission denied","status":"PERMISSION_DENIED"}}"#;
        let err = api_error(StatusCode::FORBIDDEN, body, &json!({ "project_id": "p" }));
        assert_eq!(err.message, "Permission denied");
        let detail = err.detail.unwrap();
        assert_eq!(detail["status"], 403);
        assert_eq!(detail["api_status"], "PERMISSION_DENIED");
        assert_eq!(detail["context"]["project_id"], "p");
    }

    #[test]
    fn plain_error_body_is_kept() {
        let err = api_error(StatusCode::BAD_GATEWAY, "upstream down", &Value::Null);
        assert!(err.message.contains("502"));
        assert!(err.message.contains("upstream down"));
        assert_eq!(err.detail.unwrap()["api_status"], Value::Null);
    }

    #[test]
    fn not_found_is_detected() {
        let err = api_error(StatusCode::NOT_FOUND, "", &Value::Null);
        assert!(is_not_found(&err));
        assert!(!is_not_found(&ToolError::new("other")));
    }

    #[test]
    fn segments() {
        assert_eq!(
            last_segment("https://x/compute/v1/projects/p/zones/us-east1-b"),
            "us-east1-b"
        );
        assert_eq!(last_segment("plain"), "plain");
    }

    #[tokio::test]
    async fn missing_token_fails_before_any_request() {
        let client = client();
        let err = client
            .get(&client.url(Api::Compute, "projects/p"), &[], &json!({}))
            .await
            .unwrap_err();
        assert!(err.message.starts_with("no access token"));
        assert!(err.message.contains("GCLOUD_MCP_TEST_TOKEN_UNSET"));
    }
}

//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.
//! Every field has a default, so `{}` is a complete configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::mcp::dispatch::Limits;
use crate::mcp::transport::HttpOptions;

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Listener settings for the HTTP-based transports.
    #[serde(default)]
    pub server: ServerConfig,

    /// Concurrency, timeout and session limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Google Cloud endpoints and credentials.
    #[serde(default)]
    pub gcp: GcpConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = &self.server.base_path;
        if !base.starts_with('/') || base.trim_end_matches('/').is_empty() {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "Invalid base path '{base}'. Must start with '/' and name a path below the root"
                ),
            });
        }

        let limits = &self.limits;
        for (name, is_zero) in [
            ("max_concurrent_requests", limits.max_concurrent_requests == 0),
            ("request_timeout_secs", limits.request_timeout_secs == 0),
            ("session_idle_timeout_secs", limits.session_idle_timeout_secs == 0),
            ("session_sweep_interval_secs", limits.session_sweep_interval_secs == 0),
        ] {
            if is_zero {
                return Err(ConfigError::ValidationError {
                    message: format!("limits.{name} must be greater than zero"),
                });
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            });
        }

        if self.gcp.access_token_env.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "gcp.access_token_env cannot be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Execution limits for the dispatcher.
    #[must_use]
    pub const fn dispatch_limits(&self) -> Limits {
        Limits {
            max_concurrent_requests: self.limits.max_concurrent_requests,
            request_timeout: Duration::from_secs(self.limits.request_timeout_secs),
        }
    }

    /// Listener and session options for the HTTP-based transports.
    #[must_use]
    pub fn http_options(&self) -> HttpOptions {
        HttpOptions {
            host: self.server.host.clone(),
            port: self.server.port,
            base_path: self.server.base_path.clone(),
            session_idle_timeout: Duration::from_secs(self.limits.session_idle_timeout_secs),
            session_sweep_interval: Duration::from_secs(self.limits.session_sweep_interval_secs),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path prefix for every HTTP endpoint.
    #[serde(default = "default_base_path")]
    pub base_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_path: default_base_path(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8000
}

fn default_base_path() -> String {
    "/mcp".to_string()
}

/// Execution limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Ceiling on concurrently running tool invocations.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,

    /// Deadline for a single request, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Idle time after which a session is evicted, in seconds.
    #[serde(default = "default_session_idle_timeout")]
    pub session_idle_timeout_secs: u64,

    /// How often idle sessions are swept, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub session_sweep_interval_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent(),
            request_timeout_secs: default_request_timeout(),
            session_idle_timeout_secs: default_session_idle_timeout(),
            session_sweep_interval_secs: default_sweep_interval(),
        }
    }
}

const fn default_max_concurrent() -> usize {
    64
}

const fn default_request_timeout() -> u64 {
    120
}

const fn default_session_idle_timeout() -> u64 {
    1800
}

const fn default_sweep_interval() -> u64 {
    60
}

/// Google Cloud API settings.
///
/// Endpoints are overridable so tests and private deployments can point the
/// tools at another host.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GcpConfig {
    /// Environment variable holding the OAuth2 bearer token.
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,

    /// Compute Engine API root.
    #[serde(default = "default_compute_endpoint")]
    pub compute_endpoint: String,

    /// Cloud SQL Admin API root.
    #[serde(default = "default_sql_endpoint")]
    pub sql_endpoint: String,

    /// Kubernetes Engine API root.
    #[serde(default = "default_container_endpoint")]
    pub container_endpoint: String,

    /// Cloud Monitoring API root.
    #[serde(default = "default_monitoring_endpoint")]
    pub monitoring_endpoint: String,
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            access_token_env: default_access_token_env(),
            compute_endpoint: default_compute_endpoint(),
            sql_endpoint: default_sql_endpoint(),
            container_endpoint: default_container_endpoint(),
            monitoring_endpoint: default_monitoring_endpoint(),
        }
    }
}

fn default_access_token_env() -> String {
    "GOOGLE_OAUTH_ACCESS_TOKEN".to_string()
}

fn default_compute_endpoint() -> String {
    "https://compute.googleapis.com/compute/v1".to_string()
}

fn default_sql_endpoint() -> String {
    "https://sqladmin.googleapis.com/v1beta4".to_string()
}

fn default_container_endpoint() -> String {
    "https://container.googleapis.com/v1".to_string()
}

fn default_monitoring_endpoint() -> String {
    "https://monitoring.googleapis.com/v3".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let json = r"{}";
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.base_path, "/mcp");
        assert_eq!(config.limits.max_concurrent_requests, 64);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "_comment": "Test config",
            "server": { "host": "127.0.0.1", "port": 8080, "base_path": "/api/mcp" },
            "limits": {
                "max_concurrent_requests": 8,
                "request_timeout_secs": 30,
                "session_idle_timeout_secs": 600,
                "session_sweep_interval_secs": 10
            },
            "gcp": {
                "access_token_env": "GCP_TOKEN",
                "compute_endpoint": "http://localhost:9000/compute/v1"
            },
            "logging": { "level": "debug" }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.gcp.access_token_env, "GCP_TOKEN");
        assert_eq!(config.gcp.compute_endpoint, "http://localhost:9000/compute/v1");
        assert_eq!(
            config.gcp.sql_endpoint,
            "https://sqladmin.googleapis.com/v1beta4"
        );

        let limits = config.dispatch_limits();
        assert_eq!(limits.max_concurrent_requests, 8);
        assert_eq!(limits.request_timeout, Duration::from_secs(30));

        let http = config.http_options();
        assert_eq!(http.port, 8080);
        assert_eq!(http.base_path, "/api/mcp");
        assert_eq!(http.session_sweep_interval, Duration::from_secs(10));
    }

    #[test]
    fn reject_bad_base_path() {
        for base in ["mcp", "/", "//"] {
            let json = format!(r#"{{"server": {{"base_path": "{base}"}}}}"#);
            let config: Config = serde_json::from_str(&json).unwrap();
            assert!(config.validate().is_err(), "accepted {base}");
        }
    }

    #[test]
    fn reject_zero_limits() {
        for field in [
            "max_concurrent_requests",
            "request_timeout_secs",
            "session_idle_timeout_secs",
            "session_sweep_interval_secs",
        ] {
            let json = format!(r#"{{ "limits": {{ "{field}": 0 }} }}"#);
            let config: Config = serde_json::from_str(&json).unwrap();
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains(field), "accepted zero {field}");
        }
    }

    #[test]
    fn reject_invalid_log_level() {
        let json = r#"{ "logging": { "level": "loud" } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_unknown_fields() {
        let json = r#"{
            "unknown_field": "value"
        }"#;

        let result: Result<Config, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}

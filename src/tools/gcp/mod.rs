//! Google Cloud operations tools.
//!
//! | Module | Tools |
//! |--------|-------|
//! | [`monitoring`] | `get_metric` |
//! | [`gke`] | `list_gke_clusters` |
//! | [`compute`] | `list_gce_instances`, `get_gce_instance`, `start_gce_instance`, `stop_gce_instance`, `wait_gce_operation` |
//! | [`sql`] | `list_cloudsql_instances`, `get_cloudsql_instance`, `start_cloudsql_instance`, `stop_cloudsql_instance`, `wait_cloudsql_operation` |
//!
//! All of them share one [`GcpClient`]. API failures surface as tool
//! execution errors, so the agent sees them as tool output.

pub mod client;
pub mod compute;
pub mod gke;
pub mod monitoring;
pub mod sql;

pub use client::{Api, GcpClient};

use crate::config::GcpConfig;
use crate::error::RegistryError;
use crate::mcp::registry::Registry;

/// Registers every Google Cloud tool.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built or a tool fails to
/// register.
pub fn register(registry: &mut Registry, config: &GcpConfig) -> Result<(), RegistryError> {
    let client = GcpClient::new(config).map_err(|e| RegistryError::ClientInit {
        client: "Google Cloud",
        message: e.to_string(),
    })?;

    monitoring::register(registry, &client)?;
    gke::register(registry, &client)?;
    compute::register(registry, &client)?;
    sql::register(registry, &client)?;
    Ok(())
}

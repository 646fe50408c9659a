//! gcloud-mcp: MCP server exposing Google Cloud operations tools
//!
//! Serves the tool registry over stdio, Server-Sent Events or streamable
//! HTTP, chosen with `--transport`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use gcloud_mcp::config::{self, Config};
use gcloud_mcp::mcp::server::McpServer;
use gcloud_mcp::mcp::transport::{self, Transport};
use gcloud_mcp::tools;

/// MCP server exposing Google Cloud operations tools.
///
/// Lists and controls Compute Engine, Cloud SQL and GKE resources and reads
/// Cloud Monitoring metrics on behalf of an AI agent.
#[derive(Parser, Debug)]
#[command(name = "gcloud-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Transport to serve
    #[arg(long, value_enum, default_value_t = Transport::StreamableHttp)]
    transport: Transport,

    /// Interface to bind (network transports)
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (network transports)
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Path prefix for the HTTP endpoints
    #[arg(long)]
    base_path: Option<String>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    /// Applies command-line overrides on top of the file configuration.
    fn apply(&self, config: &mut Config) {
        if let Some(ref host) = self.host {
            config.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(ref base_path) = self.base_path {
            config.server.base_path.clone_from(base_path);
        }
    }
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "info" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
///
/// Logs go to stderr; stdout belongs to the stdio transport.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Entry point for the gcloud-mcp server.
fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let config_path = args.config.as_deref();
    let mut cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };
    args.apply(&mut cfg);
    if let Err(e) = cfg.validate() {
        eprintln!("Configuration error: {e}");
        return ExitCode::FAILURE;
    }

    // Initialise logging
    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = ?args.transport,
        "Starting gcloud-mcp server"
    );

    let registry = match tools::build_registry(&cfg) {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            error!(error = %e, "Failed to register tools");
            return ExitCode::FAILURE;
        }
    };

    let limits = cfg.dispatch_limits();
    info!(
        max_concurrent_requests = limits.max_concurrent_requests,
        request_timeout_secs = limits.request_timeout.as_secs(),
        "Request limits configured"
    );
    let server = McpServer::new(registry, limits);
    let options = cfg.http_options();

    // stdio handles one client; the network transports serve many
    let runtime = if args.transport.is_network() {
        tokio::runtime::Builder::new_multi_thread().enable_all().build()
    } else {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
    };
    let runtime = match runtime {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(transport::serve(args.transport, server, &options));

    match result {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

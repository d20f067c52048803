//! Function host (v1)
//!
//! Serves a single function over HTTP and turns every process-fatal
//! condition into a best-effort response plus a deterministic exit.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request      ┌──────────────────────────────────────────────┐
//!     ────────────────────┼─▶ http::server ──▶ LatestResponse ──▶ Function│
//!                         │        ▲                  │                   │
//!     Client Response     │        │ crash response   │ take()            │
//!     ◀───────────────────┼────────┘                  ▼                   │
//!                         │                   lifecycle::crash            │
//!                         │                           ▲                   │
//!      panic / SIGINT /   │                           │ finalize          │
//!      SIGTERM / exit ────┼─▶ FatalReporter ─▶ ErrorHandlerRegistry       │
//!                         │                     (custom handlers)         │
//!                         └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use function_host::config::loader::{apply_env_overrides, load_config, ConfigError};
use function_host::config::validation::validate_config;
use function_host::config::{HostConfig, LogFormat};
use function_host::http::{Echo, InvocationServer};
use function_host::lifecycle::{ErrorHandlerRegistry, LatestResponse};
use function_host::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "function-host")]
#[command(about = "Serve a function over HTTP with crash handling", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(long)]
    bind: Option<String>,

    /// Override the log format.
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => HostConfig::default(),
    };
    apply_env_overrides(&mut config);
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    if let Some(format) = cli.log_format {
        config.observability.log_format = format;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init_logging(&config.observability);
    tracing::info!("function-host v0.1.0 starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        crash_exit_code = config.crash.exit_code,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        // Validated above.
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        }
    }

    let latest = LatestResponse::new();
    let registry = ErrorHandlerRegistry::from_config(&config.crash, latest.clone());

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = InvocationServer::new(&config, Arc::new(Echo), latest);
    let dispatcher = registry.register(Arc::new(server.control()))?;
    let reporter = registry.reporter();

    let code = match server.run(listener).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "Invocation server failed");
            1
        }
    };

    // Runs the exit handlers; the dispatcher terminates the process.
    reporter.exit(code);
    dispatcher.await?;
    Ok(())
}

//! WAS application host.
//!
//! Started by a WAS client (a web server or proxy) with the control socket
//! on fd 3, the request body on stdin, and the response body on stdout.
//! Serves requests one after another with a built-in handler until the
//! client closes the control socket.
//!
//! # Architecture Overview
//!
//! ```text
//!        WAS client                         this process
//!   ┌──────────────────┐  control (fd 3)  ┌──────────────────────────┐
//!   │ request metadata │◀────────────────▶│ was::server state machine│
//!   │                  │  stdin           │        │                 │
//!   │ request body     │─────────────────▶│ input  ▼                 │
//!   │                  │  stdout          │  app::BuiltinHandler     │
//!   │ response body    │◀─────────────────│ output                   │
//!   └──────────────────┘                  └──────────────────────────┘
//! ```
//!
//! Logs go to stderr; stdout belongs to the protocol.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use was_proxy::app::BuiltinHandler;
use was_proxy::config::{load_config, WasConfig};
use was_proxy::net::PipeSocket;
use was_proxy::observability::{logging, metrics};
use was_proxy::WasServer;

#[derive(Parser)]
#[command(name = "was-proxy")]
#[command(about = "Serve WAS requests on the standard WAS descriptors", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Built-in application, overrides `[application] handler`.
    #[arg(long, value_enum)]
    handler: Option<BuiltinHandler>,

    /// Print the effective configuration as JSON and exit.
    #[arg(long)]
    print_config: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => WasConfig::default(),
    };
    if let Some(handler) = cli.handler {
        config.application.handler = handler.name().to_string();
    }

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    logging::init(&config.observability)?;

    tracing::info!(
        handler = %config.application.handler,
        control_capacity = config.buffers.control_capacity,
        control_timeout_secs = config.timeouts.control_secs,
        "was-proxy v0.1.0 starting"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let handler = BuiltinHandler::from_name(&config.application.handler)
        .ok_or_else(|| format!("unknown handler {:?}", config.application.handler))?;

    let socket = PipeSocket::from_standard_fds()?;
    let server = WasServer::new(socket, Arc::new(config));
    server.run(&handler).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

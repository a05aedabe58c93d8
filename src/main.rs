//! Storefront API server.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                    STOREFRONT                        │
//!                    │                                                      │
//!   Client Request   │  ┌─────────┐   ┌──────────────────────────────────┐  │
//!   ─────────────────┼─▶│  http   │──▶│            pipeline              │  │
//!                    │  │ server  │   │ headers → audit → global rate    │  │
//!                    │  └─────────┘   │ → lease → route rate → auth      │  │
//!                    │                └────────────────┬─────────────────┘  │
//!                    │                                 ▼                    │
//!                    │  ┌─────────┐   ┌──────────┐  ┌──────────────┐        │
//!   Client Response  │  │finalize │◀──│   api    │◀─│  db pool +   │        │
//!   ◀────────────────┼──│ release │   │ handlers │  │    store     │        │
//!                    │  └─────────┘   └──────────┘  └──────────────┘        │
//!                    │                                                      │
//!                    │  Cross-cutting: config · security · auth ·           │
//!                    │                 observability · lifecycle            │
//!                    └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use storefront::config::{load_config, parse_config};
use storefront::lifecycle;
use storefront::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "storefront")]
#[command(about = "User and product API with rate limiting and token auth", long_about = None)]
struct Args {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address (e.g. 127.0.0.1:5000).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => parse_config("")?,
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    init_logging(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        max_connections = config.pool.max_connections,
        request_timeout_secs = config.timeouts.request_secs,
        "storefront starting"
    );

    lifecycle::start(config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

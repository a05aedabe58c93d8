//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems from a validated configuration
//! - Start background tasks (metrics exporter, signal handler)
//! - Bind the listener and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - The listener binds last (traffic only when ready)

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::{schema::DEFAULT_JWT_SECRET, ServerConfig};
use crate::db::{DbError, Store};
use crate::http::HttpServer;
use crate::lifecycle::{signals, Shutdown};
use crate::observability::metrics;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid metrics address {0:?}")]
    MetricsAddress(String),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("failed to open store: {0}")]
    Store(#[from] DbError),

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Bring the server up and run it until a stop signal.
pub async fn start(config: ServerConfig) -> Result<(), StartupError> {
    if config.auth.jwt_secret == DEFAULT_JWT_SECRET {
        tracing::warn!("Using the default JWT secret; set JWT_SECRET before deploying");
    }

    if config.observability.metrics_enabled {
        let address = &config.observability.metrics_address;
        let addr: SocketAddr = address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(address.clone()))?;
        metrics::init_metrics(addr);
    }

    let store = Store::open(&config.database).await?;

    let address = config.listener.bind_address.clone();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| StartupError::Bind { address, source })?;

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    signals::spawn_signal_handler(shutdown);

    HttpServer::new(config, Arc::new(store))
        .run(listener, server_shutdown)
        .await?;
    Ok(())
}

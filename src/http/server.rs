//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build every component (pool, limiter, authenticator, audit) from config
//! - Create the Axum Router and wire up middleware (tracing, request ID,
//!   CORS, body limit)
//! - Hand every request to the pipeline, which also enforces the deadline
//! - Bind to a listener and serve until shutdown, then drain the audit log

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderValue, Method, Request},
    response::Response,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::api;
use crate::auth::Authenticator;
use crate::clock::{Clock, SystemClock};
use crate::config::{SecurityConfig, ServerConfig};
use crate::db::{DbPool, Pool, PoolOptions, Store, StoreManager};
use crate::observability::{AuditLogger, AuditSink, TracingSink};
use crate::pipeline::{Components, Pipeline};
use crate::routing::RouteTable;
use crate::security::RateLimiter;

/// Application state injected into the dispatch handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

/// How long shutdown waits for buffered audit events to reach the sink.
const AUDIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP server for the storefront API.
pub struct HttpServer {
    router: Router,
    config: ServerConfig,
    pipeline: Arc<Pipeline>,
    audit_writer: JoinHandle<()>,
}

/// Overrides for the components [`HttpServer::new`] would build.
pub struct ServerBuilder {
    config: ServerConfig,
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    audit_sink: Arc<dyn AuditSink>,
    routes: Option<RouteTable>,
}

impl ServerBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = sink;
        self
    }

    /// Serve `routes` instead of the application's own.
    pub fn routes(mut self, routes: RouteTable) -> Self {
        self.routes = Some(routes);
        self
    }

    /// Build the server. Must run inside a Tokio runtime: the audit
    /// writer task is spawned here.
    pub fn build(self) -> HttpServer {
        let config = self.config;

        let pool: DbPool = Pool::new(
            StoreManager::new(self.store),
            PoolOptions {
                max_size: config.pool.max_connections,
                acquire_timeout: config.pool.acquire_timeout(),
            },
        );
        let limiter = Arc::new(RateLimiter::new(Arc::clone(&self.clock)));
        let authenticator = Arc::new(Authenticator::new(
            &config.auth.jwt_secret,
            Duration::from_secs(config.auth.token_ttl_secs),
            self.clock,
        ));
        let (audit, audit_writer) = AuditLogger::spawn(self.audit_sink, &config.audit);

        let routes = self
            .routes
            .unwrap_or_else(|| api::routes(&config.rate_limit));
        let components = Components {
            pool,
            limiter,
            authenticator,
            audit,
        };
        let pipeline = Arc::new(Pipeline::new(&config, components, routes));

        let state = AppState {
            pipeline: Arc::clone(&pipeline),
        };
        let router = HttpServer::build_router(&config, state);

        HttpServer {
            router,
            config,
            pipeline,
            audit_writer,
        }
    }
}

impl HttpServer {
    /// Create a server with the application's routes, the system clock
    /// and the tracing audit sink.
    pub fn new(config: ServerConfig, store: Arc<Store>) -> Self {
        Self::builder(config, store).build()
    }

    pub fn builder(config: ServerConfig, store: Arc<Store>) -> ServerBuilder {
        ServerBuilder {
            config,
            store,
            clock: Arc::new(SystemClock),
            audit_sink: Arc::new(TracingSink),
            routes: None,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ServerConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(dispatch))
            .route("/", any(dispatch))
            .with_state(state)
            .layer(DefaultBodyLimit::max(config.security.max_body_size))
            .layer(cors_layer(&config.security))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires. Returns once in-flight requests have finished and
    /// the audit log has been flushed to its sink.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let Self {
            router,
            config,
            pipeline,
            audit_writer,
        } = self;

        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            pool_size = config.pool.max_connections,
            rate_limiting = config.rate_limit.enabled,
            "HTTP server starting"
        );

        let sweeper = Arc::clone(pipeline.limiter()).spawn_sweeper(
            Duration::from_secs(config.rate_limit.sweep_interval_secs),
            shutdown.resubscribe(),
        );

        let app = router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Draining in-flight requests");
            })
            .await?;

        sweeper.abort();

        // The writer exits once the last logger handle is gone.
        drop(pipeline);
        match tokio::time::timeout(AUDIT_DRAIN_TIMEOUT, audit_writer).await {
            Ok(_) => tracing::debug!("Audit log drained"),
            Err(_) => tracing::warn!("Audit writer still busy at shutdown; buffered events may be lost"),
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// The fully layered router, for serving without a listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Every request, matched or not, goes through the pipeline.
async fn dispatch(State(state): State<AppState>, request: Request<Body>) -> Response {
    state.pipeline.handle(request).await
}

fn cors_layer(config: &SecurityConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if config.cors_allowed_origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

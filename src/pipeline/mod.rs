//! Request pipeline.
//!
//! # Data Flow
//! ```text
//! Request
//!     → SecurityHeaders → AuditStamp → GlobalRateLimit      (every request)
//!     → route lookup
//!         no match: 404 / 405 without touching the pool
//!     → LeaseConnection → [RouteRateLimit] → [Authenticate]  (per route access)
//!     → handler (panics caught, bounded by the request deadline)
//!     → finalize: headers, lease release, metrics, audit, state trail
//! ```
//!
//! # Design Decisions
//! - The chain is an explicit list of [`Stage`]s run by one driver loop, so
//!   stage order is data and every exit goes through `finalize`
//! - The handler borrows the lease; the pipeline keeps ownership and releases
//!   it exactly once, with the lease's `Drop` as a backstop for cancellation
//! - Server errors reach clients as a generic message; the detail is logged
//!   and audited in redacted form

pub mod handler;
pub mod stage;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    http::{header, request::Parts, Request},
    response::{IntoResponse, Response},
};
use futures_util::FutureExt;

pub use handler::{Handler, HandlerContext, HandlerResult, Services};
pub use stage::{Flow, RequestState, Stage, StateTrail};

use crate::auth::{Authenticator, Identity};
use crate::config::ServerConfig;
use crate::db::{ConnectionLease, DbPool, PoolError, StoreManager};
use crate::error::ApiError;
use crate::observability::{metrics, AuditLogger, EventKind, RequestOrigin, SecurityEvent};
use crate::routing::{Route, RouteMatch, RouteTable};
use crate::security::{RateDecision, RateLimiter, RateTier, SecurityHeaders};

/// Shared components the pipeline is built from.
#[derive(Debug, Clone)]
pub struct Components {
    pub pool: DbPool,
    pub limiter: Arc<RateLimiter>,
    pub authenticator: Arc<Authenticator>,
    pub audit: AuditLogger,
}

/// Per-request bookkeeping carried through the stages.
#[derive(Debug)]
struct RequestContext {
    origin: RequestOrigin,
    state: RequestState,
    trail: Vec<RequestState>,
    secure_headers: bool,
    rate: Option<RateDecision>,
    lease: Option<ConnectionLease<StoreManager>>,
    identity: Option<Identity>,
}

impl RequestContext {
    fn new(origin: RequestOrigin) -> Self {
        Self {
            origin,
            state: RequestState::Received,
            trail: vec![RequestState::Received],
            secure_headers: false,
            rate: None,
            lease: None,
            identity: None,
        }
    }

    fn advance(&mut self, next: RequestState) {
        debug_assert!(next > self.state, "{:?} cannot follow {:?}", next, self.state);
        tracing::trace!(from = ?self.state, to = ?next, path = %self.origin.path, "Request state");
        self.state = next;
        self.trail.push(next);
    }
}

/// Runs every request through admission, its handler, and finalization.
#[derive(Debug)]
pub struct Pipeline {
    pool: DbPool,
    limiter: Arc<RateLimiter>,
    authenticator: Arc<Authenticator>,
    audit: AuditLogger,
    routes: RouteTable,
    services: Arc<Services>,
    global_tier: RateTier,
    rate_limiting: bool,
    headers: SecurityHeaders,
    trust_proxy: bool,
    request_timeout: Duration,
}

impl Pipeline {
    pub fn new(config: &ServerConfig, components: Components, routes: RouteTable) -> Self {
        let services = Arc::new(Services {
            authenticator: Arc::clone(&components.authenticator),
            audit: components.audit.clone(),
            bcrypt_cost: config.auth.bcrypt_cost,
        });

        Self {
            pool: components.pool,
            limiter: components.limiter,
            authenticator: components.authenticator,
            audit: components.audit,
            routes,
            services,
            global_tier: RateTier::from_config("global", &config.rate_limit.global),
            rate_limiting: config.rate_limit.enabled,
            headers: SecurityHeaders::new(config.security.enable_headers),
            trust_proxy: config.listener.trust_proxy,
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Produce the response for one request.
    pub async fn handle(&self, request: Request<Body>) -> Response {
        let started = Instant::now();
        let (parts, body) = request.into_parts();
        let mut ctx = RequestContext::new(RequestOrigin::from_parts(&parts, self.trust_proxy));

        let resolved = self.routes.resolve(&parts.method, parts.uri.path());
        let route = match &resolved {
            RouteMatch::Found(route) => Some(Arc::clone(route)),
            RouteMatch::MethodNotAllowed | RouteMatch::NotFound => None,
        };
        let route_name = route.as_ref().map_or("unmatched", |r| r.name());

        let mut stopped = None;
        for stage in Stage::chain_for(route.as_deref()) {
            match self.run_stage(stage, &mut ctx, route.as_deref(), &parts).await {
                Flow::Continue => ctx.advance(stage.reached()),
                Flow::Reject(err) => {
                    ctx.advance(RequestState::Rejected);
                    stopped = Some(err);
                    break;
                }
                Flow::Fail(err) => {
                    ctx.advance(RequestState::Errored);
                    stopped = Some(err);
                    break;
                }
            }
        }

        let result = match (stopped, route, resolved) {
            (Some(err), _, _) => Err(err),
            (None, Some(route), _) => {
                let request = Request::from_parts(parts, body);
                let deadline = tokio::time::Instant::from_std(started) + self.request_timeout;
                self.invoke(&route, &mut ctx, request, deadline).await
            }
            (None, None, RouteMatch::MethodNotAllowed) => {
                ctx.advance(RequestState::Rejected);
                Err(ApiError::MethodNotAllowed)
            }
            (None, None, _) => {
                ctx.advance(RequestState::Rejected);
                Err(ApiError::NotFound)
            }
        };

        self.finalize(ctx, result, route_name, started)
    }

    async fn run_stage(
        &self,
        stage: Stage,
        ctx: &mut RequestContext,
        route: Option<&Route>,
        parts: &Parts,
    ) -> Flow {
        match stage {
            Stage::SecurityHeaders => {
                ctx.secure_headers = true;
                Flow::Continue
            }
            Stage::AuditStamp => {
                self.audit.emit(SecurityEvent::new(
                    EventKind::Request,
                    "request received",
                    &ctx.origin,
                ));
                Flow::Continue
            }
            Stage::GlobalRateLimit => self.admit(&self.global_tier, ctx),
            Stage::LeaseConnection => self.lease(ctx).await,
            Stage::RouteRateLimit => match route.and_then(|r| r.access().rate_tier()) {
                Some(tier) => self.admit(tier, ctx),
                None => Flow::Continue,
            },
            Stage::Authenticate => self.authenticate(ctx, parts),
        }
    }

    fn admit(&self, tier: &RateTier, ctx: &mut RequestContext) -> Flow {
        if !self.rate_limiting {
            return Flow::Continue;
        }

        let decision = self.limiter.check(&ctx.origin.client_ip, tier);
        ctx.rate = Some(decision);

        match decision {
            RateDecision::Allowed { .. } => Flow::Continue,
            RateDecision::Rejected { retry_after, .. } => {
                metrics::record_rate_limited(tier.name());
                tracing::warn!(
                    client_ip = %ctx.origin.client_ip,
                    tier = tier.name(),
                    path = %ctx.origin.path,
                    "Rate limit exceeded"
                );
                self.audit.emit(
                    SecurityEvent::new(EventKind::RateLimitExceeded, "rate limit exceeded", &ctx.origin)
                        .with_detail(format!("tier={}", tier.name())),
                );
                Flow::Reject(ApiError::RateLimited { retry_after })
            }
        }
    }

    async fn lease(&self, ctx: &mut RequestContext) -> Flow {
        let started = Instant::now();
        match self.pool.lease().await {
            Ok(lease) => {
                metrics::record_pool_wait(started.elapsed());
                metrics::record_pool(&self.pool.status());
                ctx.lease = Some(lease);
                Flow::Continue
            }
            Err(PoolError::Exhausted { waited }) => {
                tracing::warn!(
                    waited_ms = waited.as_millis() as u64,
                    path = %ctx.origin.path,
                    "Connection pool exhausted"
                );
                Flow::Reject(ApiError::PoolExhausted)
            }
            Err(PoolError::Connect(err)) => Flow::Fail(ApiError::Database(err)),
        }
    }

    fn authenticate(&self, ctx: &mut RequestContext, parts: &Parts) -> Flow {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        match self.authenticator.authenticate(header) {
            Ok(identity) => {
                ctx.identity = Some(identity);
                Flow::Continue
            }
            Err(err) => {
                metrics::record_auth_failure(err.reason());
                self.audit.emit(
                    SecurityEvent::new(EventKind::AuthFailure, "authentication failed", &ctx.origin)
                        .with_detail(self.audit.redact(&err.to_string())),
                );
                Flow::Reject(err.into())
            }
        }
    }

    async fn invoke(
        &self,
        route: &Route,
        ctx: &mut RequestContext,
        request: Request<Body>,
        deadline: tokio::time::Instant,
    ) -> HandlerResult {
        let Some(lease) = ctx.lease.take() else {
            ctx.advance(RequestState::Errored);
            return Err(ApiError::Unhandled(format!(
                "route {} reached its handler without a connection",
                route.name()
            )));
        };

        let mut handler_ctx = HandlerContext::new(
            lease,
            ctx.identity.clone(),
            ctx.origin.clone(),
            Arc::clone(&self.services),
        );
        let call = AssertUnwindSafe(route.handler().call(&mut handler_ctx, request)).catch_unwind();
        let outcome = tokio::time::timeout_at(deadline, call).await;
        ctx.lease = Some(handler_ctx.into_lease());

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(ApiError::Unhandled(format!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Err(_) => Err(ApiError::Timeout {
                limit: self.request_timeout,
            }),
        };

        match &result {
            Err(err) if err.is_server_error() => ctx.advance(RequestState::Errored),
            Err(_) => ctx.advance(RequestState::Rejected),
            Ok(_) => ctx.advance(RequestState::Handled),
        }
        result
    }

    fn finalize(
        &self,
        mut ctx: RequestContext,
        result: HandlerResult,
        route_name: &'static str,
        started: Instant,
    ) -> Response {
        let mut response = match result {
            Ok(response) => response,
            Err(err) => {
                if ctx.state == RequestState::Errored {
                    self.report_failure(&ctx, &err);
                }
                err.into_response()
            }
        };

        if ctx.secure_headers {
            self.headers.apply(response.headers_mut());
        }
        if let Some(decision) = &ctx.rate {
            decision.apply_headers(response.headers_mut());
        }
        if let Some(lease) = ctx.lease.take() {
            lease.release();
        }

        let outcome = ctx.state;
        debug_assert!(outcome.is_terminal_outcome(), "finalized from {outcome:?}");
        ctx.advance(RequestState::Finalized);
        response
            .extensions_mut()
            .insert(StateTrail(std::mem::take(&mut ctx.trail)));

        let status = response.status().as_u16();
        metrics::record_request(&ctx.origin.method, status, route_name, started);
        metrics::record_pool(&self.pool.status());
        tracing::debug!(
            method = %ctx.origin.method,
            path = %ctx.origin.path,
            route = route_name,
            status,
            outcome = ?outcome,
            duration_ms = started.elapsed().as_millis() as u64,
            "Request finalized"
        );

        response
    }

    fn report_failure(&self, ctx: &RequestContext, err: &ApiError) {
        let description = self.audit.redact(&err.to_string());
        tracing::error!(
            method = %ctx.origin.method,
            path = %ctx.origin.path,
            client_ip = %ctx.origin.client_ip,
            error = %description,
            "Request failed"
        );
        self.audit.emit(
            SecurityEvent::new(EventKind::HandlerError, "unhandled failure", &ctx.origin)
                .with_detail(description),
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

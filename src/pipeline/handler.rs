//! Route handlers and the context they run in.

use std::sync::Arc;

use axum::{body::Body, http::Request, response::Response};
use futures_util::future::BoxFuture;

use crate::auth::{Authenticator, Identity};
use crate::db::{ConnectionLease, StoreConnection, StoreManager};
use crate::error::ApiError;
use crate::observability::{AuditLogger, RequestOrigin};

pub type HandlerResult = Result<Response, ApiError>;

/// Business logic behind a route.
///
/// A handler borrows its context for the duration of the call and never
/// owns the connection lease; the pipeline takes it back afterwards,
/// whether the handler returned, failed, or panicked.
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(&'a self, ctx: &'a mut HandlerContext, request: Request<Body>)
        -> BoxFuture<'a, HandlerResult>;
}

impl<F> Handler for F
where
    F: for<'a> Fn(&'a mut HandlerContext, Request<Body>) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    fn call<'a>(
        &'a self,
        ctx: &'a mut HandlerContext,
        request: Request<Body>,
    ) -> BoxFuture<'a, HandlerResult> {
        (self)(ctx, request)
    }
}

/// Components handlers may use beyond their connection.
#[derive(Debug, Clone)]
pub struct Services {
    pub authenticator: Arc<Authenticator>,
    pub audit: AuditLogger,
    pub bcrypt_cost: u32,
}

/// Everything a handler gets: the leased connection, the verified caller
/// (on protected routes), and where the request came from.
pub struct HandlerContext {
    lease: ConnectionLease<StoreManager>,
    identity: Option<Identity>,
    origin: RequestOrigin,
    services: Arc<Services>,
}

impl HandlerContext {
    pub(crate) fn new(
        lease: ConnectionLease<StoreManager>,
        identity: Option<Identity>,
        origin: RequestOrigin,
        services: Arc<Services>,
    ) -> Self {
        Self {
            lease,
            identity,
            origin,
            services,
        }
    }

    /// The leased store connection.
    pub fn db(&mut self) -> &mut StoreConnection {
        &mut self.lease
    }

    /// The verified caller. Always `Some` on protected routes.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn origin(&self) -> &RequestOrigin {
        &self.origin
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.services.authenticator
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.services.audit
    }

    pub fn bcrypt_cost(&self) -> u32 {
        self.services.bcrypt_cost
    }

    pub(crate) fn into_lease(self) -> ConnectionLease<StoreManager> {
        self.lease
    }
}

//! Route lookup.
//!
//! # Responsibilities
//! - Store declared routes with their access policy
//! - Look up the route for a method and path
//! - Return the matched route or an explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (shared without locks)
//! - Exact path matching; a trailing slash is ignored
//! - O(n) scan (acceptable for the handful of routes served)
//! - Explicit NotFound / MethodNotAllowed rather than a silent default

use std::sync::Arc;

use axum::http::Method;

use crate::pipeline::Handler;
use crate::security::RateTier;

/// Which admission stages a route adds after the base chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Access {
    rate_tier: Option<RateTier>,
    authenticated: bool,
}

impl Access {
    /// No extra stages.
    pub fn public() -> Self {
        Self::default()
    }

    /// Requires a valid bearer credential.
    pub fn protected() -> Self {
        Self {
            rate_tier: None,
            authenticated: true,
        }
    }

    /// Counted against an additional, stricter rate tier.
    pub fn sensitive(tier: RateTier) -> Self {
        Self {
            rate_tier: Some(tier),
            authenticated: false,
        }
    }

    /// Add a rate tier to this policy.
    pub fn with_tier(mut self, tier: RateTier) -> Self {
        self.rate_tier = Some(tier);
        self
    }

    pub fn rate_tier(&self) -> Option<&RateTier> {
        self.rate_tier.as_ref()
    }

    pub fn requires_auth(&self) -> bool {
        self.authenticated
    }
}

/// A declared route.
pub struct Route {
    name: &'static str,
    method: Method,
    path: String,
    access: Access,
    handler: Box<dyn Handler>,
}

impl Route {
    /// Label used in logs and metrics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn access(&self) -> &Access {
        &self.access
    }

    pub fn handler(&self) -> &dyn Handler {
        self.handler.as_ref()
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("access", &self.access)
            .finish_non_exhaustive()
    }
}

/// Result of a route lookup.
#[derive(Debug, Clone)]
pub enum RouteMatch {
    Found(Arc<Route>),
    /// The path exists but not for this method.
    MethodNotAllowed,
    NotFound,
}

/// Immutable table of routes.
#[derive(Debug, Default, Clone)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a route. Later declarations for the same method and path
    /// are shadowed by earlier ones.
    pub fn route(
        mut self,
        method: Method,
        path: &str,
        name: &'static str,
        access: Access,
        handler: impl Handler,
    ) -> Self {
        self.routes.push(Arc::new(Route {
            name,
            method,
            path: normalize(path).to_owned(),
            access,
            handler: Box::new(handler),
        }));
        self
    }

    pub fn resolve(&self, method: &Method, path: &str) -> RouteMatch {
        let path = normalize(path);
        let mut path_known = false;

        for route in &self.routes {
            if route.path != path {
                continue;
            }
            if route.method == *method {
                return RouteMatch::Found(Arc::clone(route));
            }
            path_known = true;
        }

        if path_known {
            RouteMatch::MethodNotAllowed
        } else {
            RouteMatch::NotFound
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn normalize(path: &str) -> &str {
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

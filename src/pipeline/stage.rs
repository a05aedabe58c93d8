//! Admission stages and request lifecycle states.

use crate::error::ApiError;
use crate::routing::Route;

/// One step of the admission chain, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Mark the response for hardening headers.
    SecurityHeaders,
    /// Record that the request arrived.
    AuditStamp,
    /// Count the request against the global tier.
    GlobalRateLimit,
    /// Borrow a store connection for the handler.
    LeaseConnection,
    /// Count the request against the route's own tier.
    RouteRateLimit,
    /// Verify the bearer credential.
    Authenticate,
}

impl Stage {
    /// Stages every request passes, matched or not.
    pub const ADMISSION: [Stage; 3] = [
        Stage::SecurityHeaders,
        Stage::AuditStamp,
        Stage::GlobalRateLimit,
    ];

    /// The full chain for a request. Unmatched requests stop after the
    /// admission stages; they never lease a connection.
    pub fn chain_for(route: Option<&Route>) -> Vec<Stage> {
        let mut chain = Self::ADMISSION.to_vec();
        let Some(route) = route else {
            return chain;
        };

        chain.push(Stage::LeaseConnection);
        if route.access().rate_tier().is_some() {
            chain.push(Stage::RouteRateLimit);
        }
        if route.access().requires_auth() {
            chain.push(Stage::Authenticate);
        }
        chain
    }

    /// State reached once this stage lets the request continue.
    pub fn reached(self) -> RequestState {
        match self {
            Self::SecurityHeaders => RequestState::HeadersApplied,
            Self::AuditStamp => RequestState::Logged,
            Self::GlobalRateLimit => RequestState::GlobalRateChecked,
            Self::LeaseConnection => RequestState::ConnectionLeased,
            Self::RouteRateLimit => RequestState::RouteRateChecked,
            Self::Authenticate => RequestState::Authenticated,
        }
    }
}

/// What a stage decided.
#[derive(Debug)]
pub enum Flow {
    Continue,
    /// Stop with a client-facing refusal.
    Reject(ApiError),
    /// Stop on an unexpected failure.
    Fail(ApiError),
}

/// Where a request is in its lifecycle.
///
/// ```text
/// Received → HeadersApplied → Logged → GlobalRateChecked → ConnectionLeased
///     → [RouteRateChecked] → [Authenticated] → Handled ──────┐
///   any state before Handled ──→ Rejected (4xx) ─────────────┼→ Finalized
///                             └→ Errored (5xx / deadline) ───┘
/// ```
///
/// Variants are declared in transition order: a request only ever moves to
/// a greater state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestState {
    Received,
    HeadersApplied,
    Logged,
    GlobalRateChecked,
    ConnectionLeased,
    RouteRateChecked,
    Authenticated,
    Handled,
    Rejected,
    Errored,
    Finalized,
}

impl RequestState {
    pub fn is_terminal_outcome(self) -> bool {
        matches!(self, Self::Handled | Self::Rejected | Self::Errored)
    }
}

/// Every state a request passed through, attached to its response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateTrail(pub Vec<RequestState>);

//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path)
//!     → router.rs (route lookup)
//!     → Return: matched Route (handler + access policy),
//!               MethodNotAllowed, or NotFound
//!
//! Route declaration (at startup):
//!     api::routes(rate limit config)
//!     → RouteTable, immutable for the life of the server
//! ```
//!
//! # Design Decisions
//! - Routes declared at startup, immutable at runtime
//! - Access policy lives on the route, so the admission chain is data
//! - Deterministic: first declared match wins

pub mod router;

pub use router::{Access, Route, RouteMatch, RouteTable};

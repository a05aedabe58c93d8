//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs (hardening headers decided, written on finalize)
//!     → client_ip.rs (resolve the client key)
//!     → rate_limit.rs (global tier, then the route's own tier)
//!     → Pass to authentication / handler
//! ```
//!
//! # Design Decisions
//! - Defense in depth: multiple layers of protection
//! - Fail closed: reject on any security check failure
//! - No trust in client input (forwarded headers opt-in only)

pub mod client_ip;
pub mod headers;
pub mod rate_limit;

pub use client_ip::client_ip;
pub use headers::SecurityHeaders;
pub use rate_limit::{RateDecision, RateLimiter, RateTier};

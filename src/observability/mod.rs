//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline stages and handlers produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!     → audit.rs (security events, buffered, written off the request path)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Security review (`security_audit` log target)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through all log lines via tower-http
//! - Metrics are cheap (atomic increments)
//! - Audit emission never blocks a request

pub mod audit;
pub mod logging;
pub mod metrics;

pub use audit::{
    redact, AuditLogger, AuditSink, EventKind, MemorySink, RequestOrigin, SecurityEvent,
    Severity, TracingSink,
};

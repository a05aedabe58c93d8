//! Security response headers.
//!
//! # Responsibilities
//! - Add hardening headers to every response, including rejections
//! - Strip headers that fingerprint the server
//!
//! # Design Decisions
//! - Headers are decided early (first pipeline stage) but written on
//!   finalize, so short-circuited responses carry them too
//! - Existing values set by a handler are overwritten

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

const HARDENING: [(HeaderName, &str); 8] = [
    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (header::X_FRAME_OPTIONS, "SAMEORIGIN"),
    (header::REFERRER_POLICY, "no-referrer"),
    (header::STRICT_TRANSPORT_SECURITY, "max-age=15552000; includeSubDomains"),
    (header::CONTENT_SECURITY_POLICY, "default-src 'self'; frame-ancestors 'self'"),
    (header::X_DNS_PREFETCH_CONTROL, "off"),
    (
        HeaderName::from_static("cross-origin-opener-policy"),
        "same-origin",
    ),
    (
        HeaderName::from_static("cross-origin-resource-policy"),
        "same-origin",
    ),
];

const FINGERPRINTS: [HeaderName; 2] = [HeaderName::from_static("x-powered-by"), header::SERVER];

/// Applies the hardening header set.
#[derive(Debug, Clone, Copy)]
pub struct SecurityHeaders {
    enabled: bool,
}

impl SecurityHeaders {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn apply(&self, headers: &mut HeaderMap) {
        if !self.enabled {
            return;
        }
        for name in FINGERPRINTS {
            headers.remove(name);
        }
        for (name, value) in HARDENING {
            headers.insert(name, HeaderValue::from_static(value));
        }
    }
}

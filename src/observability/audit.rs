//! Security audit log.
//!
//! Structured records of security-relevant events (authentication failures,
//! rate-limit trips, logins, unhandled errors) for later review.
//!
//! # Design Decisions
//! - Emitting never blocks the request path: events go into a bounded
//!   channel drained by a single writer task
//! - A full channel drops the event and counts the drop
//! - Descriptions are redacted and truncated before they are recorded
//! - Sinks are pluggable; the default writes through `tracing` under the
//!   `security_audit` target

use std::sync::{Arc, Mutex};

use axum::http::{header, request::Parts};
use axum::extract::ConnectInfo;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::config::AuditConfig;
use crate::observability::metrics;
use crate::security::client_ip;

const REDACTED: &str = "[redacted]";
const SENSITIVE_KEYS: [&str; 5] = ["password", "secret", "token", "authorization", "cookie"];

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Request,
    AuthFailure,
    LoginFailure,
    LoginSuccess,
    UserRegistered,
    RateLimitExceeded,
    HandlerError,
}

impl EventKind {
    pub fn severity(&self) -> Severity {
        match self {
            Self::Request | Self::LoginSuccess | Self::UserRegistered => Severity::Info,
            Self::AuthFailure | Self::LoginFailure | Self::RateLimitExceeded => Severity::Warning,
            Self::HandlerError => Severity::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "REQUEST",
            Self::AuthFailure => "AUTH_FAILURE",
            Self::LoginFailure => "LOGIN_FAILURE",
            Self::LoginSuccess => "LOGIN_SUCCESS",
            Self::UserRegistered => "USER_REGISTERED",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::HandlerError => "HANDLER_ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Who sent a request, as recorded in audit events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestOrigin {
    pub client_ip: String,
    pub user_agent: Option<String>,
    pub method: String,
    pub path: String,
}

impl RequestOrigin {
    /// Resolve the origin of a request. The peer address comes from
    /// `ConnectInfo` when the server was started with connect info.
    pub fn from_parts(parts: &Parts, trust_proxy: bool) -> Self {
        let peer = parts
            .extensions
            .get::<ConnectInfo<std::net::SocketAddr>>()
            .map(|info| info.0);

        Self {
            client_ip: client_ip(&parts.headers, peer, trust_proxy),
            user_agent: parts
                .headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
            method: parts.method.to_string(),
            path: parts.uri.path().to_owned(),
        }
    }
}

/// One audit record.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub severity: Severity,
    pub message: String,
    pub client_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl SecurityEvent {
    pub fn new(kind: EventKind, message: impl Into<String>, origin: &RequestOrigin) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            severity: kind.severity(),
            message: message.into(),
            client_ip: origin.client_ip.clone(),
            user_agent: origin.user_agent.clone(),
            method: origin.method.clone(),
            path: origin.path.clone(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Destination for audit records.
pub trait AuditSink: Send + Sync + 'static {
    fn record(&self, event: &SecurityEvent);
}

/// Writes events as structured `tracing` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, event: &SecurityEvent) {
        macro_rules! audit {
            ($level:ident) => {
                tracing::$level!(
                    target: "security_audit",
                    kind = event.kind.as_str(),
                    client_ip = %event.client_ip,
                    method = %event.method,
                    path = %event.path,
                    user_agent = event.user_agent.as_deref().unwrap_or("-"),
                    detail = event.detail.as_deref().unwrap_or(""),
                    "{}",
                    event.message
                )
            };
        }

        match event.severity {
            Severity::Info => audit!(info),
            Severity::Warning => audit!(warn),
            Severity::Error => audit!(error),
        }
    }
}

/// Keeps events in memory. Used by tests to observe the audit trail.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<SecurityEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().expect("audit sink mutex poisoned").clone()
    }

    pub fn of_kind(&self, kind: EventKind) -> Vec<SecurityEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.kind == kind)
            .collect()
    }
}

impl AuditSink for MemorySink {
    fn record(&self, event: &SecurityEvent) {
        self.events
            .lock()
            .expect("audit sink mutex poisoned")
            .push(event.clone());
    }
}

/// Handle for emitting audit events. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    tx: mpsc::Sender<SecurityEvent>,
    max_description_len: usize,
}

impl AuditLogger {
    /// Start the writer task. It exits once every logger handle is dropped.
    pub fn spawn(sink: Arc<dyn AuditSink>, config: &AuditConfig) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<SecurityEvent>(config.channel_capacity.max(1));

        let writer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                sink.record(&event);
            }
        });

        let logger = Self {
            tx,
            max_description_len: config.max_description_len,
        };
        (logger, writer)
    }

    /// Queue an event without waiting.
    pub fn emit(&self, event: SecurityEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                metrics::record_audit_dropped();
                tracing::debug!(kind = event.kind.as_str(), "Audit buffer full, event dropped");
            }
            Err(TrySendError::Closed(event)) => {
                metrics::record_audit_dropped();
                tracing::debug!(kind = event.kind.as_str(), "Audit writer stopped, event dropped");
            }
        }
    }

    /// Redact and truncate a description with this logger's length limit.
    pub fn redact(&self, text: &str) -> String {
        redact(text, self.max_description_len)
    }
}

/// Mask credentials in free text and cap its length.
///
/// Masks the word after `Bearer`, anything shaped like a JWT, and the value
/// of `key=value` pairs whose key names a secret.
pub fn redact(text: &str, max_len: usize) -> String {
    let mut words = Vec::new();
    let mut mask_next = false;

    for word in text.split_whitespace() {
        if mask_next {
            words.push(REDACTED.to_string());
            mask_next = false;
        } else if word.eq_ignore_ascii_case("bearer") {
            words.push(word.to_string());
            mask_next = true;
        } else if looks_like_jwt(word) {
            words.push(REDACTED.to_string());
        } else if let Some((key, _)) = word.split_once('=') {
            let lower = key.to_ascii_lowercase();
            if SENSITIVE_KEYS.iter().any(|s| lower.contains(s)) {
                words.push(format!("{key}={REDACTED}"));
            } else {
                words.push(word.to_string());
            }
        } else {
            words.push(word.to_string());
        }
    }

    let joined = words.join(" ");
    if joined.chars().count() <= max_len {
        return joined;
    }
    let mut truncated: String = joined.chars().take(max_len).collect();
    truncated.push_str("...");
    truncated
}

fn looks_like_jwt(word: &str) -> bool {
    let word = word.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    let segments: Vec<&str> = word.split('.').collect();
    segments.len() == 3
        && word.len() >= 20
        && segments.iter().all(|s| {
            !s.is_empty()
                && s
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
}

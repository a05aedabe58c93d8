//! Fixed-window rate limiting with named tiers.
//!
//! Each `(client key, tier)` pair owns one window: a start instant and a
//! counter. The first request after a window expires opens a fresh window.
//! Fixed windows allow up to twice the ceiling across a window boundary
//! (a burst at the seam); that is accepted behavior.
//!
//! The table is a `DashMap`, so the read-check-increment for one key holds
//! only that key's shard lock and unrelated clients never serialize.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::TierConfig;

pub const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
pub const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
pub const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// A named rate policy: `ceiling` requests per `window`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateTier {
    name: Arc<str>,
    window: Duration,
    ceiling: u32,
}

impl RateTier {
    pub fn new(name: &str, window: Duration, ceiling: u32) -> Self {
        Self {
            name: Arc::from(name),
            window,
            ceiling,
        }
    }

    pub fn from_config(name: &str, config: &TierConfig) -> Self {
        Self::new(name, config.window(), config.max_requests)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }
}

/// Outcome of a rate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed {
        limit: u32,
        remaining: u32,
        reset_after: Duration,
    },
    Rejected {
        limit: u32,
        retry_after: Duration,
    },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Write the `RateLimit-*` headers describing this decision.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        let (limit, remaining, reset) = match *self {
            Self::Allowed {
                limit,
                remaining,
                reset_after,
            } => (limit, remaining, reset_after),
            Self::Rejected { limit, retry_after } => (limit, 0, retry_after),
        };
        let reset_secs = reset.as_secs_f64().ceil() as u64;

        for (name, value) in [
            (RATELIMIT_LIMIT, limit.to_string()),
            (RATELIMIT_REMAINING, remaining.to_string()),
            (RATELIMIT_RESET, reset_secs.to_string()),
        ] {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(name, value);
            } else {
                tracing::warn!(header = %name, "Failed to encode rate limit header");
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WindowKey {
    client: String,
    tier: Arc<str>,
}

#[derive(Debug)]
struct RateWindow {
    started: Instant,
    window: Duration,
    count: u32,
}

/// In-memory, single-process rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<WindowKey, RateWindow>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
        }
    }

    /// Count one request from `client` against `tier`.
    pub fn check(&self, client: &str, tier: &RateTier) -> RateDecision {
        let now = self.clock.now();
        let key = WindowKey {
            client: client.to_owned(),
            tier: Arc::clone(&tier.name),
        };

        let mut entry = self.windows.entry(key).or_insert_with(|| RateWindow {
            started: now,
            window: tier.window,
            count: 0,
        });
        let window = entry.value_mut();
        let elapsed = now.saturating_duration_since(window.started);

        if window.count == 0 || elapsed >= tier.window {
            window.started = now;
            window.window = tier.window;
            window.count = 1;
            return RateDecision::Allowed {
                limit: tier.ceiling,
                remaining: tier.ceiling.saturating_sub(1),
                reset_after: tier.window,
            };
        }

        let reset_after = tier.window - elapsed;
        // Stops counting at ceiling + 1: the request that tripped the limit.
        if window.count <= tier.ceiling {
            window.count += 1;
        }

        if window.count <= tier.ceiling {
            RateDecision::Allowed {
                limit: tier.ceiling,
                remaining: tier.ceiling - window.count,
                reset_after,
            }
        } else {
            RateDecision::Rejected {
                limit: tier.ceiling,
                retry_after: reset_after,
            }
        }
    }

    /// Drop windows that have already expired. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows
            .retain(|_, window| now.saturating_duration_since(window.started) < window.window);
        before.saturating_sub(self.windows.len())
    }

    /// Number of tracked windows.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Run [`sweep`](Self::sweep) every `interval` until shutdown.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = self.sweep();
                        if removed > 0 {
                            tracing::debug!(removed, remaining = self.len(), "Evicted expired rate windows");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }
}

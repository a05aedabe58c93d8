//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Placeholder secret shipped in the defaults. Startup warns when it is used.
pub const DEFAULT_JWT_SECRET: &str = "CHANGE_ME_IN_PRODUCTION";

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, proxy trust).
    pub listener: ListenerConfig,

    /// Database connection pool.
    pub pool: PoolConfig,

    /// Rate limiting tiers.
    pub rate_limit: RateLimitConfig,

    /// Credential issuance and verification.
    pub auth: AuthConfig,

    /// Security audit log.
    pub audit: AuditConfig,

    /// Security hardening.
    pub security: SecurityConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Store settings.
    pub database: DatabaseConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:5000").
    pub bind_address: String,

    /// Resolve client addresses from `X-Forwarded-For` (behind a reverse proxy).
    pub trust_proxy: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5000".to_string(),
            trust_proxy: false,
        }
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum concurrent leased connections.
    pub max_connections: usize,

    /// Maximum time a request waits for a free connection, in milliseconds.
    pub acquire_timeout_ms: u64,
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout_ms: 5_000,
        }
    }
}

/// A single fixed-window tier.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct TierConfig {
    /// Window length in seconds.
    pub window_secs: u64,

    /// Requests allowed per window.
    pub max_requests: u32,
}

impl TierConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Ceiling applied to every request.
    pub global: TierConfig,

    /// Stricter ceiling for the login endpoint.
    pub login: TierConfig,

    /// How often expired windows are evicted, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            global: TierConfig {
                window_secs: 15 * 60,
                max_requests: 100,
            },
            login: TierConfig {
                window_secs: 15 * 60,
                max_requests: 5,
            },
            sweep_interval_secs: 60,
        }
    }
}

/// Credential configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for signing tokens.
    pub jwt_secret: String,

    /// Token lifetime in seconds.
    pub token_ttl_secs: u64,

    /// bcrypt work factor for new password hashes.
    pub bcrypt_cost: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            // WARNING: This is a placeholder! Change this in production.
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            token_ttl_secs: 3600,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

/// Security audit log configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Buffered events before new ones are dropped.
    pub channel_capacity: usize,

    /// Maximum length of error descriptions in audit events.
    pub max_description_len: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            max_description_len: 256,
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Enable security headers.
    pub enable_headers: bool,
    /// Maximum body size in bytes.
    pub max_body_size: usize,
    /// Allowed CORS origins; `["*"]` allows any.
    pub cors_allowed_origins: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_headers: true,
            max_body_size: 1024 * 1024, // 1MB
            cors_allowed_origins: vec!["*".to_string()],
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Handler deadline, measured from arrival, in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format: "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite connection URL. `sqlite::memory:` keeps everything in memory.
    pub url: String,

    /// Seed the product catalogue when it is empty.
    pub seed_demo_data: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://storefront.db".to_string(),
            seed_demo_data: true,
        }
    }
}

//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize, JWT_SECRET / PORT overrides)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → handed to HttpServer, which builds every component from it
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AuditConfig, AuthConfig, DatabaseConfig, ListenerConfig, ObservabilityConfig, PoolConfig,
    RateLimitConfig, SecurityConfig, ServerConfig, TierConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};

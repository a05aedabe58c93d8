//! Storefront API library: a user and product HTTP API whose requests pass
//! through a fixed admission pipeline (security headers, audit, rate
//! limiting, pooled store connections, bearer-token authentication).

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod routing;
pub mod security;

pub use config::schema::ServerConfig;
pub use error::ApiError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;

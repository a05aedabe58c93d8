//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, tower-http layers)
//!         trace → request ID → CORS → timeout → body limit
//!     → pipeline (admission, handler, finalize)
//!     → Send to client
//! ```

pub mod server;

pub use server::{AppState, HttpServer, ServerBuilder};

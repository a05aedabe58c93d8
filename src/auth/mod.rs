//! Authentication subsystem.
//!
//! # Data Flow
//! ```text
//! POST /api/login
//!     → password.rs (verify against stored bcrypt hash)
//!     → credentials.rs (issue signed token, 1h lifetime)
//!
//! Protected route:
//!     Authorization: Bearer <token>
//!     → credentials.rs (signature + expiry check)
//!     → Identity attached to the handler context
//! ```

pub mod credentials;
pub mod password;

pub use credentials::{Authenticator, Identity};
pub use password::{hash_password, verify_password};

/// Why a credential was not accepted. The reason is for logs and audit
/// events only; clients get a generic message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("no bearer credential presented")]
    Missing,

    #[error("credential rejected: {0}")]
    Invalid(String),

    #[error("credential expired")]
    Expired,

    #[error("credential could not be issued: {0}")]
    Issue(String),
}

impl AuthError {
    /// Short label for metrics and audit events.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Invalid(_) => "invalid",
            Self::Expired => "expired",
            Self::Issue(_) => "issue",
        }
    }
}

//! Database subsystem.
//!
//! # Data Flow
//! ```text
//! Admitted request
//!     → pool.rs (lease: idle connection, new connection, or FIFO wait)
//!     → handler runs parameterized queries on the leased StoreConnection
//!     → lease released on finalize (or on drop)
//!     → next queued waiter receives the connection directly
//! ```
//!
//! # Design Decisions
//! - Pool is an explicitly constructed component, never a global
//! - Leases are RAII guards: release is idempotent, use-after-release unrepresentable
//! - The pool itself never logs; callers observe it through `PoolStatus`

pub mod pool;
pub mod store;

pub use pool::{ConnectionLease, ManageConnection, Pool, PoolError, PoolOptions, PoolStatus};
pub use store::{NewUser, Product, Store, StoreConnection, StoreManager, UserRecord};

/// Pool of connections to the application store.
pub type DbPool = Pool<StoreManager>;

/// Failures raised by the store collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DbError {
    #[error("could not open connection: {0}")]
    Connect(String),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(&'static str),

    #[error("query failed: {0}")]
    Query(String),
}

//! Bounded connection pool with FIFO waiters.
//!
//! # Responsibilities
//! - Hand out an idle connection, or open a new one while under capacity
//! - Queue callers at capacity and serve them in arrival order
//! - Fail with `Exhausted` once the acquire timeout elapses
//! - Reclaim every connection exactly once, whichever way the borrower exits
//!
//! # Design Decisions
//! - A freed connection is passed straight to the oldest waiter, so the
//!   leased count never drops and rises again under contention
//! - Waiting uses a per-waiter `oneshot`, no polling
//! - Grants sent to a waiter that gave up are reclaimed, never dropped

use std::collections::VecDeque;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::db::DbError;

/// Opens connections on behalf of the pool.
pub trait ManageConnection: Send + Sync + 'static {
    type Connection: Send + 'static;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection, DbError>> + Send;
}

/// Pool sizing and wait policy.
#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    /// Maximum concurrent leases.
    pub max_size: usize,
    /// How long a caller may wait for a free slot.
    pub acquire_timeout: Duration,
}

/// Failures to obtain a lease. Neither leaves a slot held.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("no connection became available within {waited:?}")]
    Exhausted { waited: Duration },

    #[error(transparent)]
    Connect(#[from] DbError),
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub capacity: usize,
    pub leased: usize,
    pub idle: usize,
    pub waiting: usize,
    pub leases_granted: u64,
    pub leases_returned: u64,
}

/// What a waiter receives when a slot frees up.
enum Grant<C> {
    /// A ready connection.
    Connection(C),
    /// Permission to open a new connection.
    Slot,
}

struct PoolState<C> {
    idle: VecDeque<C>,
    leased: usize,
    waiters: VecDeque<oneshot::Sender<Grant<C>>>,
}

struct Shared<M: ManageConnection> {
    manager: M,
    options: PoolOptions,
    state: Mutex<PoolState<M::Connection>>,
    leases_granted: AtomicU64,
    leases_returned: AtomicU64,
}

impl<M: ManageConnection> Shared<M> {
    fn lock(&self) -> MutexGuard<'_, PoolState<M::Connection>> {
        self.state.lock().expect("pool mutex poisoned")
    }

    /// Pass a freed grant to the oldest live waiter, or retire it.
    fn hand_off(&self, mut grant: Grant<M::Connection>) {
        let mut state = self.lock();
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(grant) {
                Ok(()) => return,
                Err(returned) => grant = returned,
            }
        }
        state.leased -= 1;
        if let Grant::Connection(conn) = grant {
            state.idle.push_back(conn);
        }
    }
}

/// A fixed-capacity pool of connections.
pub struct Pool<M: ManageConnection> {
    shared: Arc<Shared<M>>,
}

impl<M: ManageConnection> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: ManageConnection> std::fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").field("status", &self.status()).finish()
    }
}

impl<M: ManageConnection> Pool<M> {
    /// Create an empty pool. Connections are opened lazily.
    pub fn new(manager: M, options: PoolOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                manager,
                options,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    leased: 0,
                    waiters: VecDeque::new(),
                }),
                leases_granted: AtomicU64::new(0),
                leases_returned: AtomicU64::new(0),
            }),
        }
    }

    /// Borrow a connection, waiting up to the acquire timeout at capacity.
    pub async fn lease(&self) -> Result<ConnectionLease<M>, PoolError> {
        let started = Instant::now();

        let ready = {
            let mut state = self.shared.lock();
            if let Some(conn) = state.idle.pop_front() {
                state.leased += 1;
                Ok(Grant::Connection(conn))
            } else if state.leased < self.shared.options.max_size {
                state.leased += 1;
                Ok(Grant::Slot)
            } else {
                state.waiters.retain(|waiter| !waiter.is_closed());
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Err(Waiter {
                    rx,
                    shared: Arc::clone(&self.shared),
                    settled: false,
                })
            }
        };

        let grant = match ready {
            Ok(grant) => grant,
            Err(mut waiter) => waiter
                .wait(self.shared.options.acquire_timeout)
                .await
                .ok_or(PoolError::Exhausted {
                    waited: started.elapsed(),
                })?,
        };

        self.open(grant).await
    }

    async fn open(&self, grant: Grant<M::Connection>) -> Result<ConnectionLease<M>, PoolError> {
        let conn = match grant {
            Grant::Connection(conn) => conn,
            Grant::Slot => {
                let slot = SlotGuard {
                    shared: Arc::clone(&self.shared),
                    armed: true,
                };
                let conn = self.shared.manager.connect().await?;
                slot.disarm();
                conn
            }
        };

        self.shared.leases_granted.fetch_add(1, Ordering::Relaxed);
        Ok(ConnectionLease {
            conn: Some(conn),
            shared: Arc::clone(&self.shared),
        })
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.shared.lock();
        PoolStatus {
            capacity: self.shared.options.max_size,
            leased: state.leased,
            idle: state.idle.len(),
            waiting: state.waiters.iter().filter(|w| !w.is_closed()).count(),
            leases_granted: self.shared.leases_granted.load(Ordering::Relaxed),
            leases_returned: self.shared.leases_returned.load(Ordering::Relaxed),
        }
    }
}

/// A queued lease request.
struct Waiter<M: ManageConnection> {
    rx: oneshot::Receiver<Grant<M::Connection>>,
    shared: Arc<Shared<M>>,
    settled: bool,
}

impl<M: ManageConnection> Waiter<M> {
    async fn wait(&mut self, limit: Duration) -> Option<Grant<M::Connection>> {
        let received = match tokio::time::timeout(limit, &mut self.rx).await {
            Ok(Ok(grant)) => Some(grant),
            Ok(Err(_)) => None,
            Err(_) => {
                // A grant may have landed between the deadline and close().
                self.rx.close();
                self.rx.try_recv().ok()
            }
        };
        self.settled = true;
        received
    }
}

impl<M: ManageConnection> Drop for Waiter<M> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.rx.close();
        if let Ok(grant) = self.rx.try_recv() {
            self.shared.hand_off(grant);
        }
    }
}

/// Holds a counted slot while a new connection is being opened.
struct SlotGuard<M: ManageConnection> {
    shared: Arc<Shared<M>>,
    armed: bool,
}

impl<M: ManageConnection> SlotGuard<M> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<M: ManageConnection> Drop for SlotGuard<M> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.hand_off(Grant::Slot);
        }
    }
}

/// An exclusive borrow of one pooled connection.
///
/// The connection goes back to the pool exactly once: on [`release`] or,
/// failing that, on drop.
///
/// [`release`]: ConnectionLease::release
pub struct ConnectionLease<M: ManageConnection> {
    conn: Option<M::Connection>,
    shared: Arc<Shared<M>>,
}

impl<M: ManageConnection> std::fmt::Debug for ConnectionLease<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("held", &self.conn.is_some())
            .finish_non_exhaustive()
    }
}

impl<M: ManageConnection> ConnectionLease<M> {
    /// Return the connection to the pool.
    pub fn release(mut self) {
        self.return_to_pool();
    }

    fn return_to_pool(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.leases_returned.fetch_add(1, Ordering::Relaxed);
            self.shared.hand_off(Grant::Connection(conn));
        }
    }
}

impl<M: ManageConnection> Deref for ConnectionLease<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .expect("lease holds its connection until released")
    }
}

impl<M: ManageConnection> DerefMut for ConnectionLease<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_mut()
            .expect("lease holds its connection until released")
    }
}

impl<M: ManageConnection> Drop for ConnectionLease<M> {
    fn drop(&mut self) {
        self.return_to_pool();
    }
}

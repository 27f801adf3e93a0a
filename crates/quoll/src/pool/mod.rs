//! The asynchronous connection pool.
//!
//! Opening a server connection per statement is expensive, and PostgreSQL
//! servers cap how many sessions they will hold. The pool keeps a bounded
//! population of connections, revalidates them as they move in and out, and
//! parks callers in a strictly first-in-first-out queue when every
//! connection is checked out. A release hands its connection directly to the
//! head waiter rather than routing it through the idle set, so a saturated
//! pool stays fair under contention.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use event_listener::EventListener;
use futures_core::future::BoxFuture;
use futures_util::FutureExt;

use crate::{
    ConnInfo, Error, QueryResult, Result, Row, Value,
    query::Query,
    quoll::Quoll,
    transaction::{self, Transaction, TransactionOptions},
    wire::Connector,
};

use self::inner::PoolInner;

mod connection;
mod inner;

pub use self::connection::PoolConnection;

/// An asynchronous pool of PostgreSQL connections, and the crate's client
/// surface.
///
/// Create one with [`Quoll::open`][crate::Quoll::open], then either check
/// out connections with [`acquire`][Pool::acquire] or run statements
/// directly on the pool; direct calls check a connection out for exactly one
/// statement. Transactions run through
/// [`transaction`][Pool::transaction], which owns the full
/// begin/commit/rollback cycle including retries.
///
/// `Pool` is `Send`, `Sync` and `Clone`. Cloning is cheap: every clone is a
/// handle to the same shared state. Calls to `acquire` are fair — fulfilled
/// strictly in arrival order — and the pool never opens more than its
/// configured maximum of connections.
///
/// Call [`close`][Pool::close] during shutdown to reject queued waiters and
/// tear down idle connections; connections still checked out are torn down
/// as they come back.
pub struct Pool(pub(crate) Arc<PoolInner>);

/// A point-in-time snapshot of pool accounting.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolStats {
    /// Configured connection ceiling.
    pub max_size: u32,
    /// Connections currently checked out.
    pub active: u32,
    /// Connections parked in the pool.
    pub idle: usize,
    /// Acquires parked waiting for a connection.
    pub waiting: usize,
    /// Id of the connection most recently handed to a caller.
    pub last_used_connection: Option<u64>,
}

/// A future that resolves when the pool is closed.
///
/// See [`Pool::close_event()`] for details.
pub struct CloseEvent {
    pub(crate) listener: Option<EventListener>,
}

impl Pool {
    pub(crate) async fn new(
        options: Quoll,
        conninfo: ConnInfo,
        connector: Arc<dyn Connector>,
    ) -> Result<Pool> {
        // Make an initial connection to validate the configuration.
        let inner = PoolInner::new_arc(options, conninfo, connector);
        let conn = inner.acquire().await?;
        inner.release(conn);
        Ok(Pool(inner))
    }

    /// Retrieves a connection from the pool.
    ///
    /// Resolves with a validated connection, parking the caller in the FIFO
    /// waiter queue when the pool is saturated. Fails with
    /// [`Error::PoolClosed`] once [`close`][Pool::close] has been called,
    /// with [`Error::ConnectionOpen`] when a fresh connection could not be
    /// established, and with [`Error::PoolTimedOut`] when the configured
    /// [`acquire_timeout`][crate::Quoll::acquire_timeout] elapses first.
    pub async fn acquire(&self) -> Result<PoolConnection> {
        let conn = self.0.acquire().await?;
        Ok(PoolConnection::new(conn, Arc::clone(&self.0)))
    }

    /// Attempts to retrieve an idle connection without waiting.
    ///
    /// Returns `None` when no idle connection is available right now; never
    /// opens a new one.
    pub fn try_acquire(&self) -> Option<PoolConnection> {
        let conn = self.0.try_acquire()?;
        Some(PoolConnection::new(conn, Arc::clone(&self.0)))
    }

    /// Borrow a connection for the duration of one closure.
    ///
    /// The connection is validated and returned to the pool when the closure
    /// completes, whatever the outcome.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut PoolConnection) -> BoxFuture<'c, Result<T>> + Send,
        T: Send,
    {
        let mut conn = self.acquire().await?;
        f(&mut conn).await
    }

    /// Run `f` inside a transaction with default options: a single attempt
    /// and the server's default isolation level.
    ///
    /// See [`transaction_with`][Pool::transaction_with].
    pub async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'t> FnMut(&'t mut Transaction) -> BoxFuture<'t, Result<T>> + Send,
        T: Send,
    {
        transaction::retry_loop(self, TransactionOptions::default(), f).await
    }

    /// Run `f` inside a transaction.
    ///
    /// Each attempt acquires a connection, sends `BEGIN` (carrying the
    /// requested isolation level, if any), invokes `f` with a
    /// [`Transaction`] handle, and commits when `f` succeeds. On failure the
    /// transaction rolls back, its rollback callbacks fire, and the attempt
    /// is retried with a fresh connection while attempts remain; exhaustion
    /// surfaces [`Error::TransactionFailed`] carrying the attempt history.
    pub async fn transaction_with<T, F>(&self, options: TransactionOptions, f: F) -> Result<T>
    where
        F: for<'t> FnMut(&'t mut Transaction) -> BoxFuture<'t, Result<T>> + Send,
        T: Send,
    {
        transaction::retry_loop(self, options, f).await
    }

    /// Execute a statement on a pooled connection and return every row.
    pub async fn fetch_all(&self, query: impl Into<Query>) -> Result<Vec<Row>> {
        let mut conn = self.acquire().await?;
        conn.fetch_all(query).await
    }

    /// Execute a statement on a pooled connection and return the first row,
    /// if any.
    pub async fn fetch_optional(&self, query: impl Into<Query>) -> Result<Option<Row>> {
        let mut conn = self.acquire().await?;
        conn.fetch_optional(query).await
    }

    /// Execute a statement on a pooled connection and return the first row,
    /// failing with [`Error::RowNotFound`] when there is none.
    pub async fn fetch_one(&self, query: impl Into<Query>) -> Result<Row> {
        let mut conn = self.acquire().await?;
        conn.fetch_one(query).await
    }

    /// Execute a statement on a pooled connection and return the first
    /// column of the first row, or `None` when no row was produced.
    pub async fn fetch_value(&self, query: impl Into<Query>) -> Result<Option<Value>> {
        let mut conn = self.acquire().await?;
        conn.fetch_value(query).await
    }

    /// Execute a statement on a pooled connection, discarding any rows, and
    /// report how many rows it affected.
    pub async fn execute(&self, query: impl Into<Query>) -> Result<QueryResult> {
        let mut conn = self.acquire().await?;
        conn.execute(query).await
    }

    /// Shut down the pool, immediately waking every parked `acquire`.
    ///
    /// Queued waiters are rejected with [`Error::PoolClosed`], idle
    /// connections are torn down on the spot, and subsequent calls to
    /// [`acquire`][Pool::acquire] fail. Connections currently checked out
    /// are unaffected until they are released, at which point they are torn
    /// down instead of returned. Idempotent.
    pub fn close(&self) {
        self.0.close();
    }

    /// Returns `true` if [`close`][Pool::close] has been called on the pool.
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }

    /// Get a future that resolves when [`Pool::close()`] is called.
    ///
    /// If the pool is already closed, the future resolves immediately.
    ///
    /// This can be used to cancel long-running operations that hold onto a
    /// [`PoolConnection`] so they don't prevent shutdown from completing.
    pub fn close_event(&self) -> CloseEvent {
        self.0.close_event()
    }

    /// A snapshot of the pool's accounting counters.
    pub fn stats(&self) -> PoolStats {
        self.0.stats()
    }
}

/// Returns a new [Pool] tied to the same shared state.
impl Clone for Pool {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        fmt.debug_struct("Pool")
            .field("max_size", &stats.max_size)
            .field("active", &stats.active)
            .field("idle", &stats.idle)
            .field("waiting", &stats.waiting)
            .field("is_closed", &self.is_closed())
            .finish()
    }
}

impl CloseEvent {
    /// Execute the given future until it returns or the pool is closed.
    ///
    /// Cancels the future and returns `Err(PoolClosed)` if/when the pool is
    /// closed. If the pool was already closed, the future is never run.
    pub async fn do_until<Fut: Future>(&mut self, fut: Fut) -> Result<Fut::Output> {
        // Check that the pool wasn't closed already.
        //
        // We use `poll_immediate()` as it will use the correct waker instead of
        // a no-op one like `.now_or_never()`, but it won't actually suspend execution here.
        futures_util::future::poll_immediate(&mut *self)
            .await
            .map_or(Ok(()), |_| Err(Error::PoolClosed))?;

        futures_util::pin_mut!(fut);

        futures_util::future::poll_fn(|cx| {
            // Poll `fut` first as the wakeup event is more likely for it than `self`.
            if let Poll::Ready(ret) = fut.as_mut().poll(cx) {
                return Poll::Ready(Ok(ret));
            }

            self.poll_unpin(cx).map(|_| Err(Error::PoolClosed))
        })
        .await
    }
}

impl Future for CloseEvent {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(listener) = &mut self.listener {
            futures_core::ready!(listener.poll_unpin(cx));
        }

        // `EventListener` doesn't like being polled after it yields, and even if it did it
        // would probably just wait for the next event, neither of which we want.
        //
        // So this way, once we get our close event, we fuse this future to immediately return.
        self.listener = None;

        Poll::Ready(())
    }
}

#[test]
#[allow(dead_code)]
fn assert_pool_traits() {
    fn assert_send_sync<T: Send + Sync>() {}
    fn assert_clone<T: Clone>() {}

    fn assert_pool() {
        assert_send_sync::<Pool>();
        assert_clone::<Pool>();
    }
}

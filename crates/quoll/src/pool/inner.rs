use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::oneshot;

use crate::{
    ConnInfo, Connection, Error, Result,
    quoll::Quoll,
    wire::{Connector, TransactionStatus},
};

use super::{CloseEvent, PoolStats};

/// A pending `acquire` parked in the FIFO queue. Resolved by direct hand-off
/// from a release, a freshly opened connection, or pool closure.
type Waiter = oneshot::Sender<Result<Connection>>;

pub(crate) struct PoolInner {
    state: Mutex<PoolState>,
    connector: Arc<dyn Connector>,
    conninfo: ConnInfo,
    pub(super) options: Quoll,
    next_connection_id: AtomicU64,
    on_closed: event_listener::Event,
}

struct PoolState {
    /// Idle connections, most recently used last. Popping reuses the warmest
    /// session first.
    idle: Vec<Connection>,
    /// Connections currently checked out (not in `idle`).
    active: u32,
    waiters: VecDeque<Waiter>,
    closed: bool,
    /// Id of the connection most recently handed to a caller.
    last_used: Option<u64>,
}

impl PoolState {
    /// Every open connection, checked out or idle. Never exceeds the
    /// configured maximum.
    fn total(&self) -> u32 {
        self.active + self.idle.len() as u32
    }
}

/// What one call to `acquire` should do, decided under the state lock.
enum Route {
    Ready(Connection),
    Connect(SizeGuard),
    Wait(oneshot::Receiver<Result<Connection>>),
}

/// Holds a capacity slot reserved for a connection being opened. If the
/// opening future is dropped or fails, the slot is refunded and any queued
/// waiter gets a replacement attempt.
struct SizeGuard {
    pool: Arc<PoolInner>,
    armed: bool,
}

impl SizeGuard {
    fn new(pool: Arc<PoolInner>) -> Self {
        Self { pool, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SizeGuard {
    fn drop(&mut self) {
        if self.armed {
            self.pool.state().active -= 1;
            self.pool.spawn_replenish();
        }
    }
}

impl PoolInner {
    pub(super) fn new_arc(
        options: Quoll,
        conninfo: ConnInfo,
        connector: Arc<dyn Connector>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PoolState {
                idle: Vec::with_capacity(options.pool_max_connections as usize),
                active: 0,
                waiters: VecDeque::new(),
                closed: false,
                last_used: None,
            }),
            connector,
            conninfo,
            options,
            next_connection_id: AtomicU64::new(1),
            on_closed: event_listener::Event::new(),
        })
    }

    /// The state mutex is only ever held for pointer-sized bookkeeping and
    /// synchronous driver calls; recover rather than propagate poisoning.
    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub(super) fn stats(&self) -> PoolStats {
        let state = self.state();
        PoolStats {
            max_size: self.options.pool_max_connections,
            active: state.active,
            idle: state.idle.len(),
            waiting: state.waiters.len(),
            last_used_connection: state.last_used,
        }
    }

    pub(super) async fn acquire(self: &Arc<Self>) -> Result<Connection> {
        match tokio::time::timeout(self.options.pool_acquire_timeout, self.acquire_inner()).await {
            Ok(result) => result,
            Err(_) => Err(Error::PoolTimedOut),
        }
    }

    async fn acquire_inner(self: &Arc<Self>) -> Result<Connection> {
        let route = {
            let mut state = self.state();
            if state.closed {
                return Err(Error::PoolClosed);
            }

            let mut reused = None;
            while let Some(conn) = state.idle.pop() {
                if conn.is_alive() {
                    state.active += 1;
                    state.last_used = Some(conn.id());
                    reused = Some(conn);
                    break;
                }
                tracing::debug!(
                    target: "quoll::pool",
                    id = conn.id(),
                    "discarding dead idle connection"
                );
                drop(conn);
            }

            match reused {
                Some(conn) => Route::Ready(conn),
                None if state.total() < self.options.pool_max_connections => {
                    state.active += 1;
                    Route::Connect(SizeGuard::new(Arc::clone(self)))
                }
                None => {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push_back(tx);
                    Route::Wait(rx)
                }
            }
        };

        match route {
            Route::Ready(conn) => Ok(conn),
            Route::Connect(guard) => {
                let conn = self.open_connection().await?;
                guard.disarm();
                self.state().last_used = Some(conn.id());
                Ok(conn)
            }
            Route::Wait(rx) => match rx.await {
                Ok(result) => result,
                // The pool was torn down while we were parked.
                Err(_) => Err(Error::PoolClosed),
            },
        }
    }

    /// Pop an idle connection if one is ready right now.
    pub(super) fn try_acquire(&self) -> Option<Connection> {
        let mut state = self.state();
        if state.closed {
            return None;
        }
        while let Some(conn) = state.idle.pop() {
            if conn.is_alive() {
                state.active += 1;
                state.last_used = Some(conn.id());
                return Some(conn);
            }
            drop(conn);
        }
        None
    }

    async fn open_connection(&self) -> Result<Connection> {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        Connection::establish(
            self.connector.as_ref(),
            &self.conninfo,
            id,
            self.options.log_settings.clone(),
        )
        .await
    }

    /// Return a checked-out connection to the pool.
    ///
    /// Never suspends: liveness is probed, an abandoned transaction is rolled
    /// back synchronously, and the connection is handed straight to the head
    /// waiter or parked idle. Dead connections are discarded, and a
    /// replacement is opened for the head waiter if one is queued.
    pub(super) fn release(self: &Arc<Self>, mut conn: Connection) {
        let mut state = self.state();
        debug_assert!(state.active > 0, "release without a matching acquire");

        if state.closed {
            state.active -= 1;
            drop(state);
            drop(conn);
            return;
        }

        let reusable = if !conn.is_alive() {
            false
        } else {
            match conn.transaction_status() {
                TransactionStatus::Idle => true,
                status => {
                    tracing::debug!(
                        target: "quoll::pool",
                        id = conn.id(),
                        ?status,
                        "rolling back abandoned transaction on release"
                    );
                    conn.reset_session().is_ok()
                }
            }
        };

        if !reusable {
            tracing::warn!(
                target: "quoll::pool",
                id = conn.id(),
                "discarding dead connection on release"
            );
            state.active -= 1;
            drop(state);
            drop(conn);
            self.spawn_replenish();
            return;
        }

        if let Some(conn) = hand_off(&mut state, conn) {
            state.active -= 1;
            state.idle.push(conn);
        }
    }

    /// Discard a checked-out connection without returning it, freeing its
    /// capacity slot.
    pub(super) fn discard(self: &Arc<Self>, conn: Connection) {
        {
            let mut state = self.state();
            debug_assert!(state.active > 0, "discard without a matching acquire");
            state.active -= 1;
            drop(conn);
        }
        self.spawn_replenish();
    }

    /// Open a connection on behalf of the head waiter when capacity frees up
    /// without a connection to hand over.
    fn spawn_replenish(self: &Arc<Self>) {
        {
            let mut state = self.state();
            if state.closed
                || state.waiters.is_empty()
                || state.total() >= self.options.pool_max_connections
            {
                return;
            }
            // Reserve the slot for the waiter before the connect suspends.
            state.active += 1;
        }

        let pool = Arc::clone(self);
        tokio::spawn(async move {
            match pool.open_connection().await {
                Ok(conn) => {
                    let mut state = pool.state();
                    if state.closed {
                        state.active -= 1;
                        drop(state);
                        drop(conn);
                        return;
                    }
                    if let Some(conn) = hand_off(&mut state, conn) {
                        state.active -= 1;
                        state.idle.push(conn);
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        target: "quoll::pool",
                        error = %err,
                        "failed to open a replacement connection"
                    );
                    let waiter = {
                        let mut state = pool.state();
                        state.active -= 1;
                        state.waiters.pop_front()
                    };
                    if let Some(waiter) = waiter {
                        let _ = waiter.send(Err(err));
                    }
                }
            }
            // Keep going while there are waiters and spare capacity.
            pool.spawn_replenish();
        });
    }

    /// Reject all waiters, close idle connections, and mark the pool
    /// terminal. Idempotent; never suspends. Checked-out connections are
    /// closed when they come back.
    pub(super) fn close(&self) {
        let (waiters, idle) = {
            let mut state = self.state();
            if state.closed {
                return;
            }
            state.closed = true;
            state.last_used = None;
            (
                std::mem::take(&mut state.waiters),
                std::mem::take(&mut state.idle),
            )
        };

        for waiter in waiters {
            let _ = waiter.send(Err(Error::PoolClosed));
        }
        // Dropping a Connection terminates its wire session.
        drop(idle);

        self.on_closed.notify(usize::MAX);
    }

    pub(super) fn close_event(&self) -> CloseEvent {
        CloseEvent {
            listener: (!self.is_closed()).then(|| self.on_closed.listen()),
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.on_closed.notify(usize::MAX);
    }
}

/// Hand a healthy connection to the first waiter still listening. Returns
/// the connection back when every queued waiter has gone away.
fn hand_off(state: &mut PoolState, mut conn: Connection) -> Option<Connection> {
    while let Some(waiter) = state.waiters.pop_front() {
        state.last_used = Some(conn.id());
        match waiter.send(Ok(conn)) {
            Ok(()) => return None,
            // The waiter cancelled its acquire; pass the connection along.
            Err(Ok(returned)) => conn = returned,
            // Only `Ok` values are ever sent.
            Err(Err(_)) => return None,
        }
    }
    Some(conn)
}

//! Transaction orchestration.
//!
//! A transaction runs as a user callback around which the pool, the
//! `BEGIN`/`COMMIT`/`ROLLBACK` statements, and the deferred callback queues
//! are managed for you: [`Pool::transaction`][crate::Pool::transaction]
//! acquires a connection, opens the transaction, hands the callback a
//! [`Transaction`] bound to that connection, and commits or rolls back based
//! on the callback's outcome, retrying with a fresh connection when attempts
//! remain.
//!
//! While the callback runs, the active transaction is tracked in a
//! task-local scope. Code nested arbitrarily deep inside the callback can
//! register [`on_commit`]/[`on_rollback`] hooks against "the transaction
//! currently open on this task" without threading the handle through every
//! signature; nested transactions shadow the scope for their own duration.

use std::{
    borrow::Cow,
    fmt::{self, Debug, Formatter},
    sync::{Arc, Mutex, PoisonError},
    time::Instant,
};

use futures_core::future::BoxFuture;

use crate::{
    Connection, Error, QueryResult, Result, Row, Value,
    error::TransactionAttempt,
    pool::{Pool, PoolConnection},
    query::Query,
};

enum_mode! {
    /// Standard SQL transaction isolation levels.
    ///
    /// `BEGIN` carries the level inline; the server reverts to its default
    /// when the transaction ends.
    pub IsolationLevel {
        ReadUncommitted => "READ UNCOMMITTED",
        ReadCommitted => "READ COMMITTED",
        RepeatableRead => "REPEATABLE READ",
        Serializable => "SERIALIZABLE",
    }
    default ReadCommitted
}

tokio::task_local! {
    /// The transaction currently open on this task, if any. Installed by the
    /// retry loop around the user callback and unwound with it.
    static CURRENT_TRANSACTION: Arc<TransactionContext>;
}

type Callback = Box<dyn FnOnce() -> Result<()> + Send>;

/// Per-transaction record: the deferred commit and rollback callbacks
/// registered while the transaction was running. Created at `BEGIN`,
/// drained at most once after `COMMIT` or `ROLLBACK`.
#[derive(Default)]
pub(crate) struct TransactionContext {
    commit_callbacks: Mutex<Vec<Callback>>,
    rollback_callbacks: Mutex<Vec<Callback>>,
}

impl TransactionContext {
    fn push_commit(&self, callback: Callback) {
        lock(&self.commit_callbacks).push(callback);
    }

    fn push_rollback(&self, callback: Callback) {
        lock(&self.rollback_callbacks).push(callback);
    }

    fn take_commit(&self) -> Vec<Callback> {
        std::mem::take(&mut *lock(&self.commit_callbacks))
    }

    fn take_rollback(&self) -> Vec<Callback> {
        std::mem::take(&mut *lock(&self.rollback_callbacks))
    }
}

fn lock(callbacks: &Mutex<Vec<Callback>>) -> std::sync::MutexGuard<'_, Vec<Callback>> {
    callbacks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Register a callback to run after the transaction currently open on this
/// task commits.
///
/// Callbacks fire in registration order, once, after `COMMIT` succeeds.
/// Fails with [`Error::NotInTransaction`] when no transaction is active.
pub fn on_commit<F>(callback: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    CURRENT_TRANSACTION
        .try_with(|ctx| ctx.push_commit(Box::new(callback)))
        .map_err(|_| Error::NotInTransaction)
}

/// Register a callback to run after the transaction currently open on this
/// task rolls back.
///
/// Fails with [`Error::NotInTransaction`] when no transaction is active.
pub fn on_rollback<F>(callback: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    CURRENT_TRANSACTION
        .try_with(|ctx| ctx.push_rollback(Box::new(callback)))
        .map_err(|_| Error::NotInTransaction)
}

/// Options for [`Pool::transaction_with`][crate::Pool::transaction_with].
#[derive(Debug, Clone, Copy)]
pub struct TransactionOptions {
    pub(crate) attempts: u32,
    pub(crate) isolation: Option<IsolationLevel>,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            attempts: 1,
            isolation: None,
        }
    }
}

impl TransactionOptions {
    /// Defaults: one attempt, server-default isolation.
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times the whole transaction may run before giving up.
    /// Must be at least 1.
    #[must_use]
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Isolation level for every attempt. `None` keeps the server default.
    #[must_use]
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }
}

/// Handle to one in-flight transaction, passed to the user callback.
///
/// Bound to the connection the transaction was opened on; every statement
/// issued through it joins that transaction. The handle only exists for the
/// duration of the callback — ownership of the connection returns to the
/// orchestrator when the callback finishes.
pub struct Transaction {
    conn: PoolConnection,
    ctx: Arc<TransactionContext>,
}

impl Transaction {
    /// Execute a statement inside the transaction and return every row.
    pub async fn fetch_all(&mut self, query: impl Into<Query>) -> Result<Vec<Row>> {
        self.conn.fetch_all(query).await
    }

    /// Execute a statement inside the transaction and return the first row,
    /// if any.
    pub async fn fetch_optional(&mut self, query: impl Into<Query>) -> Result<Option<Row>> {
        self.conn.fetch_optional(query).await
    }

    /// Execute a statement inside the transaction and return the first row,
    /// failing with [`Error::RowNotFound`] when there is none.
    pub async fn fetch_one(&mut self, query: impl Into<Query>) -> Result<Row> {
        self.conn.fetch_one(query).await
    }

    /// Execute a statement inside the transaction and return the first
    /// column of the first row, or `None` when no row was produced.
    pub async fn fetch_value(&mut self, query: impl Into<Query>) -> Result<Option<Value>> {
        self.conn.fetch_value(query).await
    }

    /// Execute a statement inside the transaction, discarding any rows, and
    /// report how many rows it affected.
    pub async fn execute(&mut self, query: impl Into<Query>) -> Result<QueryResult> {
        self.conn.execute(query).await
    }

    /// Register a callback to run after this transaction commits.
    pub fn on_commit<F>(&self, callback: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.ctx.push_commit(Box::new(callback));
    }

    /// Register a callback to run after this transaction rolls back.
    pub fn on_rollback<F>(&self, callback: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.ctx.push_rollback(Box::new(callback));
    }

    /// The underlying connection, for driver-level access the statement
    /// methods don't cover.
    pub fn connection(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

impl Debug for Transaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction").field("connection", &*self.conn).finish()
    }
}

fn begin_transaction_sql(isolation: Option<IsolationLevel>) -> Cow<'static, str> {
    match isolation {
        None => Cow::Borrowed("BEGIN"),
        Some(level) => Cow::Owned(format!("BEGIN ISOLATION LEVEL {level}")),
    }
}

/// Run the full acquire → BEGIN → callback → COMMIT/ROLLBACK cycle up to
/// `options.attempts` times.
pub(crate) async fn retry_loop<T, F>(pool: &Pool, options: TransactionOptions, mut f: F) -> Result<T>
where
    F: for<'t> FnMut(&'t mut Transaction) -> BoxFuture<'t, Result<T>> + Send,
    T: Send,
{
    if options.attempts < 1 {
        return Err(Error::BadArgument(
            "transaction attempts must be at least 1".into(),
        ));
    }

    let mut history = Vec::new();
    let mut attempt = 0;
    loop {
        attempt += 1;
        let started = Instant::now();

        match attempt_once(pool, options.isolation, &mut f).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                tracing::warn!(
                    target: "quoll::transaction",
                    attempt,
                    attempts = options.attempts,
                    error = %err,
                    "transaction attempt failed"
                );
                history.push(TransactionAttempt {
                    attempt,
                    message: err.to_string(),
                    elapsed: started.elapsed(),
                });
                if attempt == options.attempts {
                    return Err(Error::TransactionFailed {
                        attempts: options.attempts,
                        history,
                        source: Box::new(err),
                    });
                }
            }
        }
    }
}

async fn attempt_once<T, F>(
    pool: &Pool,
    isolation: Option<IsolationLevel>,
    f: &mut F,
) -> Result<T>
where
    F: for<'t> FnMut(&'t mut Transaction) -> BoxFuture<'t, Result<T>> + Send,
    T: Send,
{
    let mut conn = pool.acquire().await?;

    conn.execute(begin_transaction_sql(isolation).into_owned())
        .await
        .map_err(|err| Error::Transaction {
            stage: "BEGIN",
            source: Box::new(err),
        })?;

    let ctx = Arc::new(TransactionContext::default());
    let mut tx = Transaction {
        conn,
        ctx: Arc::clone(&ctx),
    };

    let outcome = CURRENT_TRANSACTION.scope(Arc::clone(&ctx), f(&mut tx)).await;

    // The handle dissolves with the callback; the orchestrator finishes the
    // cycle on the bare connection, which returns to the pool on drop.
    let Transaction { mut conn, .. } = tx;

    match outcome {
        Ok(value) => {
            if let Err(err) = conn.execute("COMMIT").await {
                rollback_quietly(&mut conn).await;
                fire_rollback_callbacks(&ctx);
                return Err(Error::Transaction {
                    stage: "COMMIT",
                    source: Box::new(err),
                });
            }
            let mut errors = fire_callbacks(ctx.take_commit());
            if !errors.is_empty() {
                return Err(Error::Transaction {
                    stage: "commit callback",
                    source: Box::new(errors.remove(0)),
                });
            }
            Ok(value)
        }
        Err(err) => {
            rollback_quietly(&mut conn).await;
            fire_rollback_callbacks(&ctx);
            Err(err)
        }
    }
}

async fn rollback_quietly(conn: &mut PoolConnection) {
    if let Err(err) = conn.execute("ROLLBACK").await {
        // The release path discards sessions stuck in a transaction.
        tracing::warn!(target: "quoll::transaction", error = %err, "rollback failed");
    }
}

fn fire_callbacks(callbacks: Vec<Callback>) -> Vec<Error> {
    let mut errors = Vec::new();
    for callback in callbacks {
        if let Err(err) = callback() {
            errors.push(err);
        }
    }
    errors
}

fn fire_rollback_callbacks(ctx: &TransactionContext) {
    for err in fire_callbacks(ctx.take_rollback()) {
        tracing::warn!(target: "quoll::transaction", error = %err, "rollback callback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_sql_carries_isolation_inline() {
        assert_eq!(begin_transaction_sql(None), "BEGIN");
        assert_eq!(
            begin_transaction_sql(Some(IsolationLevel::Serializable)),
            "BEGIN ISOLATION LEVEL SERIALIZABLE"
        );
        assert_eq!(
            begin_transaction_sql(Some(IsolationLevel::RepeatableRead)),
            "BEGIN ISOLATION LEVEL REPEATABLE READ"
        );
    }

    #[test]
    fn isolation_levels_spell_their_sql_literals() {
        assert_eq!(IsolationLevel::ReadUncommitted.as_str(), "READ UNCOMMITTED");
        assert_eq!(IsolationLevel::ReadCommitted.as_str(), "READ COMMITTED");
        assert_eq!(IsolationLevel::parse("serializable"), Some(IsolationLevel::Serializable));
        assert_eq!(IsolationLevel::parse("chaotic"), None);
    }

    #[test]
    fn callback_registration_outside_any_transaction_is_refused() {
        let err = on_commit(|| Ok(())).unwrap_err();
        assert!(matches!(err, Error::NotInTransaction));
        let err = on_rollback(|| Ok(())).unwrap_err();
        assert!(matches!(err, Error::NotInTransaction));
    }

    #[test]
    fn context_drains_callbacks_once_in_order() {
        let ctx = TransactionContext::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            ctx.push_commit(Box::new(move || {
                order.lock().unwrap().push(i);
                Ok(())
            }));
        }
        assert!(fire_callbacks(ctx.take_commit()).is_empty());
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert!(ctx.take_commit().is_empty());
    }
}

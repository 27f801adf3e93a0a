//! The interface to the PostgreSQL wire driver.
//!
//! Quoll does not speak the wire protocol itself. It drives a C-style
//! asynchronous driver API (send a statement, poll for completion, fetch the
//! buffered result) through the traits below, and the embedder supplies the
//! implementation via [`Connector`] when opening a pool. The shape of the
//! interface follows the driver's own calling conventions: send/poll/fetch
//! calls report success as booleans and surface failure text through
//! [`WireConnection::last_error`], the way the underlying C API does.

use futures_core::future::BoxFuture;

use crate::{ConnInfo, Result, Value};

/// Establishes new server connections for a pool.
///
/// Implementations typically wrap a libpq-style binding; tests substitute an
/// in-memory server. A single connector instance is shared by every connect
/// the pool ever makes, so implementations hold their own state behind the
/// shared reference.
pub trait Connector: Send + Sync + 'static {
    /// Open one connection described by `conninfo`.
    ///
    /// Fails with [`Error::ConnectionOpen`][crate::Error::ConnectionOpen]
    /// when the server cannot be reached or refuses the session.
    fn connect(&self, conninfo: &ConnInfo) -> BoxFuture<'static, Result<Box<dyn WireConnection>>>;
}

/// One established server session.
///
/// All calls are non-blocking driver entry points except [`exec`], which is
/// the synchronous one-shot statement used for session reset where the pool
/// must not suspend.
///
/// [`exec`]: WireConnection::exec
pub trait WireConnection: Send {
    /// Dispatch a statement using the simple query protocol.
    ///
    /// Returns `false` when the statement could not be submitted; the reason
    /// is available from [`last_error`][WireConnection::last_error].
    fn send_query(&mut self, sql: &str) -> bool;

    /// Dispatch a statement with positional parameters.
    fn send_query_params(&mut self, sql: &str, params: &[Value]) -> bool;

    /// Whether a dispatched statement is still being processed. Pumps any
    /// pending input from the server as a side effect.
    fn is_busy(&mut self) -> bool;

    /// Fetch the next buffered result, or `None` once the current statement
    /// has been fully consumed.
    fn get_result(&mut self) -> Option<Box<dyn WireResult>>;

    /// The driver's most recent error text for this session.
    fn last_error(&self) -> String;

    /// Coarse session health as reported by the driver.
    fn status(&self) -> ConnectionStatus;

    /// The server-side transaction state of this session.
    fn transaction_status(&self) -> TransactionStatus;

    /// Execute a statement synchronously, discarding its result.
    ///
    /// Only used for session-reset statements (`ROLLBACK`) on the release
    /// path; regular statement traffic goes through the asynchronous
    /// send/poll/fetch pipeline.
    fn exec(&mut self, sql: &str) -> bool;

    /// Terminate the session and free driver resources.
    fn close(&mut self);
}

/// One materialized statement result.
pub trait WireResult: Send {
    /// The driver-level disposition of the result.
    fn status(&self) -> ResultStatus;

    /// Server error text attached to the result, when the status is one of
    /// the failure variants.
    fn error_message(&self) -> Option<String>;

    /// Number of rows in the result set.
    fn num_rows(&self) -> usize;

    /// Number of columns per row.
    fn num_columns(&self) -> usize;

    /// Name of the column at `index`.
    fn column_name(&self, index: usize) -> &str;

    /// The cell at (`row`, `column`).
    fn value(&self, row: usize, column: usize) -> Value;

    /// Rows affected by a data-modifying statement; 0 otherwise.
    fn rows_affected(&self) -> u64;
}

/// Session health, as probed without a server round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// The session is usable.
    Ok,
    /// The session is broken: closed locally, reset, or terminated by the
    /// server. It must not be handed to any caller.
    Bad,
}

/// Server-side transaction state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// No transaction in progress.
    Idle,
    /// A statement is currently executing.
    Active,
    /// Inside an open, healthy transaction block.
    InTransaction,
    /// Inside a transaction block that has already failed.
    InError,
    /// The state could not be determined (usually a dead session).
    Unknown,
}

/// Driver-level disposition of one statement result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    /// The submitted string was empty.
    EmptyQuery,
    /// A statement that returns no rows completed.
    CommandOk,
    /// A statement completed and produced a row set.
    TuplesOk,
    /// The server's response could not be understood.
    BadResponse,
    /// A non-fatal server error (notice-grade failure).
    NonfatalError,
    /// A fatal server error; the statement did not take effect.
    FatalError,
}

impl ResultStatus {
    /// Whether this status means the statement failed.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ResultStatus::BadResponse | ResultStatus::NonfatalError | ResultStatus::FatalError
        )
    }
}

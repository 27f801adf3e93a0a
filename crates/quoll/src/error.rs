//! Types for working with errors produced by Quoll.

use std::io;
use std::time::Duration;

use crate::Value;

/// A specialized `Result` type for Quoll.
pub type Result<T> = std::result::Result<T, Error>;

/// The outcome of one failed transaction attempt, kept in the history
/// carried by [`Error::TransactionFailed`].
#[derive(Debug, Clone)]
pub struct TransactionAttempt {
    /// 1-based attempt counter.
    pub attempt: u32,
    /// Rendered message of the error that failed this attempt.
    pub message: String,
    /// Wall-clock time the attempt took, acquisition included.
    pub elapsed: Duration,
}

/// Represents all the ways a method can fail within Quoll.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Error while parsing or validating a connection string.
    #[error("error with configuration: {0}")]
    Configuration(String),

    /// [`Pool::close`] was called, either before or while we were waiting in
    /// [`Pool::acquire`].
    ///
    /// [`Pool::acquire`]: crate::Pool::acquire
    /// [`Pool::close`]: crate::Pool::close
    #[error("attempted to acquire a connection on a closed pool")]
    PoolClosed,

    /// A [`Pool::acquire`] timed out due to connections not becoming
    /// available before the configured deadline.
    ///
    /// [`Pool::acquire`]: crate::Pool::acquire
    #[error("pool timed out while waiting for an open connection")]
    PoolTimedOut,

    /// The wire driver could not establish a new server connection.
    #[error("could not open a new database connection: {0}")]
    ConnectionOpen(String),

    /// Mixed or mispositioned statement placeholders.
    #[error("invalid placeholder usage: {0}")]
    BadPlaceholders(String),

    /// Error returned from the database. Carries the statement and its bound
    /// parameters for diagnostics.
    #[error("error returned from database: {message}")]
    Query {
        sql: String,
        params: Vec<Value>,
        message: String,
    },

    /// A transaction control statement or callback failed inside one
    /// transaction attempt.
    #[error("transaction failed during {stage}")]
    Transaction {
        stage: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// A transaction exhausted every allowed attempt. The history records
    /// each attempt in order; `source` is the error of the last one.
    #[error("transaction exhausted all {attempts} attempts")]
    TransactionFailed {
        attempts: u32,
        history: Vec<TransactionAttempt>,
        #[source]
        source: Box<Error>,
    },

    /// [`on_commit`] or [`on_rollback`] was called while no transaction was
    /// active on the current task.
    ///
    /// [`on_commit`]: crate::on_commit
    /// [`on_rollback`]: crate::on_rollback
    #[error("no transaction is active on the current task")]
    NotInTransaction,

    /// An argument outside its accepted domain, such as zero transaction
    /// attempts.
    #[error("invalid argument: {0}")]
    BadArgument(String),

    /// No rows returned by a query that expected to return at least one row.
    #[error("no rows returned by a query that expected to return at least one row")]
    RowNotFound,

    /// No column found for the given name.
    #[error("no column found for name: {0}")]
    ColumnNotFound(String),

    /// Column index was out of bounds.
    #[error("column index out of bounds: the len is {len}, but the index is {index}")]
    ColumnIndexOutOfBounds { index: usize, len: usize },

    /// Unexpected or invalid data encountered while talking to the database.
    ///
    /// This should indicate there is a programming error in Quoll or in the
    /// wire driver, or something corrupted with the connection itself.
    #[error("encountered unexpected or invalid data: {0}")]
    Protocol(String),

    /// Error communicating with the database backend.
    #[error("error communicating with database: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// The statement behind a [`Error::Query`], if that is what this is.
    pub fn query_sql(&self) -> Option<&str> {
        match self {
            Error::Query { sql, .. } => Some(sql),
            _ => None,
        }
    }
}

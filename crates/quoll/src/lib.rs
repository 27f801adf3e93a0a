//! An async PostgreSQL client core: a bounded connection pool, a
//! non-blocking statement pipeline, and retryable transactions with deferred
//! commit/rollback callbacks, layered over an embedder-supplied wire driver.

#[macro_use]
/// Macro helper for enum mode definitions.
mod enum_mode;

/// Connection-string model and parser.
mod conninfo;
/// PostgreSQL connection and the statement pipeline.
mod connection;
/// Error types and result helpers.
pub mod error;
#[macro_use]
/// Statement logging.
mod logger;
/// Column metadata.
mod column;
/// Connection pool implementation.
mod pool;
/// Query type and constructor.
pub mod query;
/// Non-row statement results.
mod query_result;
/// Client configuration.
mod quoll;
/// Row representation.
mod row;
/// Placeholder-dialect normalization.
pub mod sql;
/// Transaction handling.
mod transaction;
/// Scalar values and bound parameters.
mod value;
/// The wire-driver interface consumed by the pool.
pub mod wire;

pub use crate::{
    column::Column,
    conninfo::{ConnInfo, SslMode},
    connection::Connection,
    error::{Error, Result, TransactionAttempt},
    logger::LogSettings,
    pool::{CloseEvent, Pool, PoolConnection, PoolStats},
    query::{Query, query},
    query_result::QueryResult,
    quoll::Quoll,
    row::Row,
    sql::normalize_placeholders,
    transaction::{IsolationLevel, Transaction, TransactionOptions, on_commit, on_rollback},
    value::{Arguments, Value},
    wire::{
        ConnectionStatus, Connector, ResultStatus, TransactionStatus, WireConnection, WireResult,
    },
};

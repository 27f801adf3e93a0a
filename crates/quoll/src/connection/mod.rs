use std::fmt::{self, Debug, Formatter};

use crate::{
    ConnInfo, QueryResult, Result, Row, Value,
    error::Error,
    logger::LogSettings,
    query::Query,
    wire::{Connector, ConnectionStatus, TransactionStatus, WireConnection},
};

pub(crate) mod execute;

/// A connection to a PostgreSQL server.
///
/// Wraps one wire-driver session and drives its C-style asynchronous API in
/// a non-blocking manner: statements are dispatched, then completion is
/// polled cooperatively before the buffered result is fetched and shaped.
/// Connections are created and owned by the pool; user code touches one
/// through [`PoolConnection`][crate::PoolConnection] or through the
/// transaction handle's escape hatch.
pub struct Connection {
    pub(crate) wire: Box<dyn WireConnection>,
    id: u64,
    log_settings: LogSettings,
}

impl Debug for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("status", &self.wire.status())
            .field("transaction_status", &self.wire.transaction_status())
            .finish()
    }
}

impl Connection {
    pub(crate) async fn establish(
        connector: &dyn Connector,
        conninfo: &ConnInfo,
        id: u64,
        log_settings: LogSettings,
    ) -> Result<Self> {
        let wire = connector.connect(conninfo).await?;
        Ok(Self {
            wire,
            id,
            log_settings,
        })
    }

    /// Identifier assigned by the pool, unique within it.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn log_settings(&self) -> &LogSettings {
        &self.log_settings
    }

    /// Whether the wire-level status indicator still reports a usable
    /// session.
    pub fn is_alive(&self) -> bool {
        self.wire.status() == ConnectionStatus::Ok
    }

    /// The server-side transaction state of this session.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.wire.transaction_status()
    }

    /// Return the server session to a clean state with a synchronous
    /// `ROLLBACK`. Fails when the session is beyond recovery.
    pub(crate) fn reset_session(&mut self) -> Result<()> {
        if !self.wire.exec("ROLLBACK") {
            return Err(Error::Protocol(format!(
                "session reset failed: {}",
                self.wire.last_error()
            )));
        }
        match self.wire.transaction_status() {
            TransactionStatus::Idle => Ok(()),
            other => Err(Error::Protocol(format!(
                "session still in transaction state {other:?} after reset"
            ))),
        }
    }

    /// Execute a statement and return every row.
    pub async fn fetch_all(&mut self, query: impl Into<Query>) -> Result<Vec<Row>> {
        let fetched = execute::run(self, query.into()).await?;
        Ok(fetched.rows)
    }

    /// Execute a statement and return the first row, if any.
    pub async fn fetch_optional(&mut self, query: impl Into<Query>) -> Result<Option<Row>> {
        let fetched = execute::run(self, query.into()).await?;
        Ok(fetched.rows.into_iter().next())
    }

    /// Execute a statement and return the first row, failing with
    /// [`Error::RowNotFound`] when the result set is empty.
    pub async fn fetch_one(&mut self, query: impl Into<Query>) -> Result<Row> {
        self.fetch_optional(query).await?.ok_or(Error::RowNotFound)
    }

    /// Execute a statement and return the first column of the first row, or
    /// `None` when no row was produced.
    pub async fn fetch_value(&mut self, query: impl Into<Query>) -> Result<Option<Value>> {
        let row = match self.fetch_optional(query).await? {
            Some(row) => row,
            None => return Ok(None),
        };
        if row.is_empty() {
            return Ok(None);
        }
        Ok(Some(row.get_idx(0)?.clone()))
    }

    /// Execute a statement, discarding any rows, and report how many rows it
    /// affected.
    pub async fn execute(&mut self, query: impl Into<Query>) -> Result<QueryResult> {
        let fetched = execute::run(self, query.into()).await?;
        Ok(QueryResult {
            rows_affected: fetched.rows_affected,
        })
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.wire.close();
    }
}

//! An in-memory stand-in for a PostgreSQL server and its wire driver.
//!
//! Implements the statement forms the integration tests use (CREATE TABLE /
//! INSERT / DELETE / SELECT COUNT(*) / SELECT * / SELECT $n / SHOW
//! transaction_isolation and the transaction control statements), with
//! per-session transaction buffers, aborted-transaction semantics, and a
//! statement log for asserting what actually reached the wire. Failure
//! injection covers refused connects, killed sessions, and busy polling.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use futures::future::BoxFuture;

use quoll::{
    ConnInfo, ConnectionStatus, Connector, Error, Result, ResultStatus, TransactionStatus, Value,
    WireConnection, WireResult,
};

#[derive(Default)]
struct ServerState {
    tables: HashMap<String, Vec<Vec<Value>>>,
    /// Every statement any session dispatched, in arrival order.
    statements: Vec<String>,
    opened: u64,
    live: u64,
    max_live: u64,
    connect_failures: u32,
    busy_polls: u32,
    /// Sessions created before this epoch report a broken status.
    kill_epoch: u64,
}

/// Handle to the shared mock server. Clone freely.
#[derive(Clone, Default)]
pub struct MockServer {
    state: Arc<Mutex<ServerState>>,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector opening sessions against this server.
    pub fn connector(&self) -> MockConnector {
        MockConnector {
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    /// Committed rows in `table`.
    pub fn table_len(&self, table: &str) -> usize {
        self.lock().tables.get(table).map_or(0, Vec::len)
    }

    /// Everything that reached the wire, in order.
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    /// How many dispatched statements contain `needle`.
    pub fn statement_count(&self, needle: &str) -> usize {
        self.lock()
            .statements
            .iter()
            .filter(|sql| sql.contains(needle))
            .count()
    }

    /// Total connections ever opened.
    pub fn opened(&self) -> u64 {
        self.lock().opened
    }

    /// High-water mark of simultaneously open connections.
    pub fn max_live(&self) -> u64 {
        self.lock().max_live
    }

    /// Refuse the next `n` connection attempts.
    pub fn fail_connects(&self, n: u32) {
        self.lock().connect_failures = n;
    }

    /// Make every dispatched statement report busy for `n` polls before
    /// completing.
    pub fn set_busy_polls(&self, n: u32) {
        self.lock().busy_polls = n;
    }

    /// Break every currently open session. Sessions opened afterwards are
    /// healthy.
    pub fn kill_all(&self) {
        self.lock().kill_epoch += 1;
    }
}

/// [`Connector`] implementation handing out [`MockConnection`]s.
pub struct MockConnector {
    state: Arc<Mutex<ServerState>>,
}

impl Connector for MockConnector {
    fn connect(&self, _conninfo: &ConnInfo) -> BoxFuture<'static, Result<Box<dyn WireConnection>>> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let epoch = {
                let mut server = state.lock().unwrap();
                if server.connect_failures > 0 {
                    server.connect_failures -= 1;
                    return Err(Error::ConnectionOpen("connection refused".into()));
                }
                server.opened += 1;
                server.live += 1;
                server.max_live = server.max_live.max(server.live);
                server.kill_epoch
            };
            Ok(Box::new(MockConnection {
                server: state,
                epoch,
                tx: TxState::Idle,
                pending: None,
                busy_left: 0,
                last_error: String::new(),
                closed: false,
            }) as Box<dyn WireConnection>)
        })
    }
}

enum TxState {
    Idle,
    Open {
        isolation: Option<String>,
        buffered: Vec<(String, Vec<Value>)>,
    },
    Failed,
}

pub struct MockConnection {
    server: Arc<Mutex<ServerState>>,
    epoch: u64,
    tx: TxState,
    pending: Option<MockResult>,
    busy_left: u32,
    last_error: String,
    closed: bool,
}

impl MockConnection {
    fn is_killed(&self) -> bool {
        self.epoch < self.server.lock().unwrap().kill_epoch
    }

    fn send(&mut self, sql: &str, params: &[Value]) -> bool {
        if self.closed || self.is_killed() {
            self.last_error = "no connection to the server".into();
            return false;
        }
        self.busy_left = self.server.lock().unwrap().busy_polls;
        match self.dispatch(sql, params) {
            Ok(result) => self.pending = Some(result),
            Err(message) => {
                if matches!(self.tx, TxState::Open { .. }) {
                    self.tx = TxState::Failed;
                }
                self.last_error = message.clone();
                self.pending = Some(MockResult::error(message));
            }
        }
        true
    }

    fn dispatch(&mut self, sql: &str, params: &[Value]) -> std::result::Result<MockResult, String> {
        let trimmed = sql.trim();
        let upper = trimmed.to_ascii_uppercase();

        self.server.lock().unwrap().statements.push(trimmed.to_string());

        if matches!(self.tx, TxState::Failed)
            && !(upper.starts_with("ROLLBACK") || upper.starts_with("COMMIT"))
        {
            return Err(
                "current transaction is aborted, commands ignored until end of transaction block"
                    .into(),
            );
        }

        if upper == "BEGIN" || upper.starts_with("BEGIN ISOLATION LEVEL ") {
            if matches!(self.tx, TxState::Idle) {
                let isolation = upper
                    .starts_with("BEGIN ISOLATION LEVEL ")
                    .then(|| trimmed["BEGIN ISOLATION LEVEL ".len()..].trim().to_lowercase());
                self.tx = TxState::Open {
                    isolation,
                    buffered: Vec::new(),
                };
            }
            return Ok(MockResult::command(0));
        }

        if upper == "COMMIT" {
            if let TxState::Open { buffered, .. } = std::mem::replace(&mut self.tx, TxState::Idle) {
                let mut server = self.server.lock().unwrap();
                for (table, row) in buffered {
                    server.tables.entry(table).or_default().push(row);
                }
            }
            return Ok(MockResult::command(0));
        }

        if upper == "ROLLBACK" {
            self.tx = TxState::Idle;
            return Ok(MockResult::command(0));
        }

        if let Some(rest) = strip_prefix_ci(trimmed, "CREATE TABLE ") {
            let table = first_ident(rest);
            self.server.lock().unwrap().tables.entry(table).or_default();
            return Ok(MockResult::command(0));
        }

        if let Some(rest) = strip_prefix_ci(trimmed, "DROP TABLE ") {
            let table = first_ident(rest);
            self.server.lock().unwrap().tables.remove(&table);
            return Ok(MockResult::command(0));
        }

        if let Some(rest) = strip_prefix_ci(trimmed, "INSERT INTO ") {
            let table = first_ident(rest);
            if !self.server.lock().unwrap().tables.contains_key(&table) {
                return Err(format!("relation \"{table}\" does not exist"));
            }
            let row = params.to_vec();
            match &mut self.tx {
                TxState::Open { buffered, .. } => buffered.push((table, row)),
                _ => {
                    let mut server = self.server.lock().unwrap();
                    server.tables.entry(table).or_default().push(row);
                }
            }
            return Ok(MockResult::command(1));
        }

        if let Some(rest) = strip_prefix_ci(trimmed, "DELETE FROM ") {
            let table = first_ident(rest);
            let mut server = self.server.lock().unwrap();
            match server.tables.get_mut(&table) {
                Some(rows) => {
                    let affected = rows.len() as u64;
                    rows.clear();
                    return Ok(MockResult::command(affected));
                }
                None => return Err(format!("relation \"{table}\" does not exist")),
            }
        }

        if upper == "SHOW TRANSACTION_ISOLATION" {
            let level = match &self.tx {
                TxState::Open {
                    isolation: Some(level),
                    ..
                } => level.clone(),
                _ => "read committed".into(),
            };
            return Ok(MockResult::tuples(
                vec!["transaction_isolation".into()],
                vec![vec![Value::Text(level)]],
            ));
        }

        if let Some(rest) = strip_prefix_ci(trimmed, "SELECT COUNT(*) FROM ") {
            let table = first_ident(rest);
            let committed = {
                let server = self.server.lock().unwrap();
                match server.tables.get(&table) {
                    Some(rows) => rows.len(),
                    None => return Err(format!("relation \"{table}\" does not exist")),
                }
            };
            let buffered = match &self.tx {
                TxState::Open { buffered, .. } => {
                    buffered.iter().filter(|(t, _)| *t == table).count()
                }
                _ => 0,
            };
            return Ok(MockResult::tuples(
                vec!["count".into()],
                vec![vec![Value::Integer((committed + buffered) as i64)]],
            ));
        }

        if let Some(rest) = strip_prefix_ci(trimmed, "SELECT * FROM ") {
            let table = first_ident(rest);
            let mut rows = {
                let server = self.server.lock().unwrap();
                match server.tables.get(&table) {
                    Some(rows) => rows.clone(),
                    None => return Err(format!("relation \"{table}\" does not exist")),
                }
            };
            if let TxState::Open { buffered, .. } = &self.tx {
                rows.extend(
                    buffered
                        .iter()
                        .filter(|(t, _)| *t == table)
                        .map(|(_, row)| row.clone()),
                );
            }
            let width = rows.iter().map(Vec::len).max().unwrap_or(0);
            let columns = (1..=width).map(|i| format!("c{i}")).collect();
            return Ok(MockResult::tuples(columns, rows));
        }

        // Parameter echo, e.g. `SELECT $1, $2`.
        if upper.starts_with("SELECT $") {
            let columns = params.iter().map(|_| "?column?".to_string()).collect();
            return Ok(MockResult::tuples(columns, vec![params.to_vec()]));
        }

        let near = trimmed.split_whitespace().next().unwrap_or("");
        Err(format!("syntax error at or near \"{near}\""))
    }
}

impl WireConnection for MockConnection {
    fn send_query(&mut self, sql: &str) -> bool {
        self.send(sql, &[])
    }

    fn send_query_params(&mut self, sql: &str, params: &[Value]) -> bool {
        self.send(sql, params)
    }

    fn is_busy(&mut self) -> bool {
        if self.busy_left > 0 {
            self.busy_left -= 1;
            true
        } else {
            false
        }
    }

    fn get_result(&mut self) -> Option<Box<dyn WireResult>> {
        self.pending
            .take()
            .map(|result| Box::new(result) as Box<dyn WireResult>)
    }

    fn last_error(&self) -> String {
        self.last_error.clone()
    }

    fn status(&self) -> ConnectionStatus {
        if self.closed || self.is_killed() {
            ConnectionStatus::Bad
        } else {
            ConnectionStatus::Ok
        }
    }

    fn transaction_status(&self) -> TransactionStatus {
        match self.tx {
            TxState::Idle => TransactionStatus::Idle,
            TxState::Open { .. } => TransactionStatus::InTransaction,
            TxState::Failed => TransactionStatus::InError,
        }
    }

    fn exec(&mut self, sql: &str) -> bool {
        if self.closed || self.is_killed() {
            self.last_error = "no connection to the server".into();
            return false;
        }
        match self.dispatch(sql, &[]) {
            Ok(_) => true,
            Err(message) => {
                self.last_error = message;
                false
            }
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.server.lock().unwrap().live -= 1;
        }
    }
}

pub struct MockResult {
    status: ResultStatus,
    error: Option<String>,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    affected: u64,
}

impl MockResult {
    fn command(affected: u64) -> Self {
        Self {
            status: ResultStatus::CommandOk,
            error: None,
            columns: Vec::new(),
            rows: Vec::new(),
            affected,
        }
    }

    fn tuples(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            status: ResultStatus::TuplesOk,
            error: None,
            columns,
            rows,
            affected: 0,
        }
    }

    fn error(message: String) -> Self {
        Self {
            status: ResultStatus::FatalError,
            error: Some(message),
            columns: Vec::new(),
            rows: Vec::new(),
            affected: 0,
        }
    }
}

impl WireResult for MockResult {
    fn status(&self) -> ResultStatus {
        self.status
    }

    fn error_message(&self) -> Option<String> {
        self.error.clone()
    }

    fn num_rows(&self) -> usize {
        self.rows.len()
    }

    fn num_columns(&self) -> usize {
        self.columns.len()
    }

    fn column_name(&self, index: usize) -> &str {
        &self.columns[index]
    }

    fn value(&self, row: usize, column: usize) -> Value {
        self.rows[row].get(column).cloned().unwrap_or(Value::Null)
    }

    fn rows_affected(&self) -> u64 {
        self.affected
    }
}

fn strip_prefix_ci<'a>(input: &'a str, prefix: &str) -> Option<&'a str> {
    if input.len() >= prefix.len() && input[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&input[prefix.len()..])
    } else {
        None
    }
}

fn first_ident(input: &str) -> String {
    input
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("")
        .to_string()
}

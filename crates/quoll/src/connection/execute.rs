use std::{collections::HashMap, sync::Arc, time::Duration};

use crate::{
    Result,
    column::Column,
    error::Error,
    logger::QueryLogger,
    query::Query,
    row::Row,
    sql,
    value::Arguments,
    wire::{ResultStatus, WireResult},
};

use super::Connection;

/// Completion polling starts here and backs off multiplicatively.
const POLL_INTERVAL_FLOOR: Duration = Duration::from_micros(100);
const POLL_INTERVAL_CEIL: Duration = Duration::from_micros(1000);

fn next_poll_interval(current: Duration) -> Duration {
    // grows by 1.2x per poll
    POLL_INTERVAL_CEIL.min(Duration::from_micros(current.as_micros() as u64 * 6 / 5))
}

pub(crate) struct Fetched {
    pub(crate) rows: Vec<Row>,
    pub(crate) rows_affected: u64,
}

/// Send one statement, poll it to completion, and materialize the result.
///
/// This is the only path statements take to the wire. It does not acquire,
/// release, or close connections.
pub(crate) async fn run(conn: &mut Connection, mut query: Query) -> Result<Fetched> {
    let arguments = query.take_arguments();
    let sql = sql::normalize_placeholders(&query.sql)?;

    let mut logger = QueryLogger::new(&sql, conn.id(), conn.log_settings().clone());

    let sent = match &arguments {
        Some(args) => conn.wire.send_query_params(&sql, args.values()),
        None => conn.wire.send_query(&sql),
    };
    if !sent {
        let message = conn.wire.last_error();
        return Err(query_error(&sql, arguments, message));
    }

    let mut interval = POLL_INTERVAL_FLOOR;
    while conn.wire.is_busy() {
        tokio::time::sleep(interval).await;
        interval = next_poll_interval(interval);
    }

    let result = conn.wire.get_result();
    // The driver buffers trailing results until drained.
    while conn.wire.get_result().is_some() {}

    let result = match result {
        Some(result) => result,
        None => {
            let message = conn.wire.last_error();
            return Err(query_error(&sql, arguments, message));
        }
    };

    if result.status().is_error() {
        let message = result
            .error_message()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| conn.wire.last_error());
        return Err(query_error(&sql, arguments, message));
    }

    let fetched = match result.status() {
        ResultStatus::TuplesOk => materialize(result.as_ref()),
        _ => Fetched {
            rows: Vec::new(),
            rows_affected: result.rows_affected(),
        },
    };

    logger.rows_returned(fetched.rows.len() as u64);
    logger.rows_affected(fetched.rows_affected);

    Ok(fetched)
}

fn materialize(result: &dyn WireResult) -> Fetched {
    let column_count = result.num_columns();

    let columns: Arc<Vec<Column>> = Arc::new(
        (0..column_count)
            .map(|ordinal| Column {
                name: Arc::from(result.column_name(ordinal)),
                ordinal,
            })
            .collect(),
    );

    // First occurrence wins when the result set repeats a column name.
    let mut names: HashMap<Arc<str>, usize> = HashMap::with_capacity(column_count);
    for column in columns.iter() {
        names.entry(Arc::clone(&column.name)).or_insert(column.ordinal);
    }
    let column_names = Arc::new(names);

    let rows = (0..result.num_rows())
        .map(|row| {
            Row::new(
                (0..column_count).map(|col| result.value(row, col)).collect(),
                &columns,
                &column_names,
            )
        })
        .collect();

    Fetched {
        rows,
        rows_affected: result.rows_affected(),
    }
}

fn query_error(sql: &str, arguments: Option<Arguments>, message: String) -> Error {
    Error::Query {
        sql: sql.to_owned(),
        params: arguments.map(Arguments::into_values).unwrap_or_default(),
        message,
    }
}

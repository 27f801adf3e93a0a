use crate::value::{Arguments, Value};

/// Raw SQL statement with optionally bound parameters. Built by
/// [`query`][crate::query::query].
///
/// A query with no bound parameters travels over the simple query protocol;
/// binding at least one parameter switches to the extended protocol. Bare
/// `&str` and `String` statements convert into a `Query` implicitly, so the
/// execution methods accept either.
#[must_use = "query must be executed to affect database"]
#[derive(Clone, Debug)]
pub struct Query {
    pub(crate) sql: String,
    pub(crate) arguments: Option<Arguments>,
}

impl Query {
    /// Gets the SQL that will be executed.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bind the next positional parameter.
    ///
    /// Parameters are matched to placeholders in bind order; `None` binds a
    /// SQL NULL.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.arguments
            .get_or_insert_with(Arguments::default)
            .0
            .push(value.into());
        self
    }

    /// Detach the bound parameters, switching `self` back to the
    /// simple-protocol path.
    pub(crate) fn take_arguments(&mut self) -> Option<Arguments> {
        self.arguments.take()
    }
}

/// Construct a [`Query`] from a SQL string.
pub fn query(sql: impl Into<String>) -> Query {
    Query {
        sql: sql.into(),
        arguments: None,
    }
}

impl From<&str> for Query {
    fn from(sql: &str) -> Self {
        query(sql)
    }
}

impl From<String> for Query {
    fn from(sql: String) -> Self {
        query(sql)
    }
}

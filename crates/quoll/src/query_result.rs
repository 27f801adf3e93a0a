/// Summary of a statement that does not return rows.
#[derive(Debug, Default)]
pub struct QueryResult {
    pub(crate) rows_affected: u64,
}

impl QueryResult {
    /// Number of rows the statement inserted, updated or deleted. Zero for
    /// statements that are not data-modifying.
    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }
}

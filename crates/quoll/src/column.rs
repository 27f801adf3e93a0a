use std::sync::Arc;

/// Metadata for one column of a result set.
#[derive(Clone, Debug)]
pub struct Column {
    pub(crate) name: Arc<str>,
    pub(crate) ordinal: usize,
}

impl Column {
    /// The column name as reported by the server.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Zero-based position of the column in the row.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }
}

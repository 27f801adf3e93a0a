use std::{collections::HashMap, sync::Arc};

use crate::{Result, Value, column::Column, error::Error};

/// One row of a result set, addressable by column name or position.
///
/// Column metadata is shared across every row of the same result set.
#[derive(Clone, Debug)]
pub struct Row {
    values: Box<[Value]>,
    columns: Arc<Vec<Column>>,
    column_names: Arc<HashMap<Arc<str>, usize>>,
}

impl Row {
    pub(crate) fn new(
        values: Vec<Value>,
        columns: &Arc<Vec<Column>>,
        column_names: &Arc<HashMap<Arc<str>, usize>>,
    ) -> Self {
        Self {
            values: values.into_boxed_slice(),
            columns: Arc::clone(columns),
            column_names: Arc::clone(column_names),
        }
    }

    /// Returns `true` if this row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of columns in the row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// The column metadata for this row's result set.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Get a value by column index.
    pub fn get_idx(&self, index: usize) -> Result<&Value> {
        self.values.get(index).ok_or(Error::ColumnIndexOutOfBounds {
            index,
            len: self.values.len(),
        })
    }

    /// Get a value by column name. When the result set repeats a name, the
    /// first matching column wins.
    pub fn get(&self, column: &str) -> Result<&Value> {
        let index = *self
            .column_names
            .get(column)
            .ok_or_else(|| Error::ColumnNotFound(column.into()))?;
        self.get_idx(index)
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use crate::value::SqlValue;

/// A single row of a query result.
///
/// Column names and the name-to-index map are shared across every row of one
/// result set, so a row costs only its values.
#[derive(Debug, Clone)]
pub struct DbRow {
    /// Column names, shared across all rows in the result set
    pub columns: Arc<Vec<String>>,
    /// The values for this row, in column order
    pub values: Vec<SqlValue>,
    index: Arc<HashMap<String, usize>>,
}

impl DbRow {
    /// Get the index of a column by name
    #[must_use]
    pub fn column_index(&self, column_name: &str) -> Option<usize> {
        if let Some(&idx) = self.index.get(column_name) {
            return Some(idx);
        }
        // Fall back to linear search
        self.columns.iter().position(|col| col == column_name)
    }

    /// Get a value from the row by column name
    ///
    /// # Arguments
    ///
    /// * `column_name` - The name of the column
    ///
    /// # Returns
    ///
    /// The value at the column, or None if the column wasn't found
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&SqlValue> {
        self.column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }
}

/// Rows plus metadata returned by one statement.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// The rows returned by the query
    pub rows: Vec<DbRow>,
    /// The number of rows affected, as reported by the engine for DML
    pub rows_affected: u64,
    columns: Option<Arc<Vec<String>>>,
    index: Option<Arc<HashMap<String, usize>>>,
}

impl ResultSet {
    /// Create a new result set with a known row capacity
    #[must_use]
    pub fn with_capacity(capacity: usize) -> ResultSet {
        ResultSet {
            rows: Vec::with_capacity(capacity),
            rows_affected: 0,
            columns: None,
            index: None,
        }
    }

    /// Set the column names shared by all rows, building the lookup map once.
    pub fn set_columns(&mut self, columns: Arc<Vec<String>>) {
        let index = Arc::new(
            columns
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), i))
                .collect::<HashMap<_, _>>(),
        );
        self.columns = Some(columns);
        self.index = Some(index);
    }

    /// Column names for this result set, if any rows were described
    #[must_use]
    pub fn columns(&self) -> Option<&Arc<Vec<String>>> {
        self.columns.as_ref()
    }

    /// Add a row of values; `set_columns` must have been called first,
    /// otherwise the values are dropped.
    pub fn add_row(&mut self, values: Vec<SqlValue>) {
        if let (Some(columns), Some(index)) = (&self.columns, &self.index) {
            self.rows.push(DbRow {
                columns: columns.clone(),
                values,
                index: index.clone(),
            });
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First row, for single-row lookups
    #[must_use]
    pub fn first(&self) -> Option<&DbRow> {
        self.rows.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DbRow> {
        self.rows.iter()
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a DbRow;
    type IntoIter = std::slice::Iter<'a, DbRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

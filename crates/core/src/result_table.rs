//! Tabular results
//!
//! Every snapshot operation answers with one or more `ResultTable`s: a fixed
//! list of typed columns and any number of rows. Callers look at the
//! `RESULT` column of each row; a call that returned `Ok` may still carry
//! `FAILURE` rows.

use crate::types::Row;
use crate::value::{ColumnType, Value};
use serde::Serialize;
use std::fmt;

/// `RESULT` column value for a successful row
pub const SUCCESS: &str = "SUCCESS";

/// `RESULT` column value for a failed row
pub const FAILURE: &str = "FAILURE";

/// Column declaration of a result table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    /// Column name
    pub name: &'static str,
    /// Column type
    pub column_type: ColumnType,
}

impl ColumnInfo {
    /// Declare a column
    pub const fn new(name: &'static str, column_type: ColumnType) -> Self {
        ColumnInfo { name, column_type }
    }
}

/// A table of results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultTable {
    columns: Vec<ColumnInfo>,
    rows: Vec<Row>,
}

impl ResultTable {
    /// Create an empty table with the given columns
    pub fn new(columns: &[ColumnInfo]) -> Self {
        ResultTable {
            columns: columns.to_vec(),
            rows: Vec::new(),
        }
    }

    /// Append a row.
    ///
    /// # Panics
    ///
    /// The row width must match the column count; debug builds check it.
    pub fn add_row(&mut self, row: Row) {
        debug_assert_eq!(
            row.len(),
            self.columns.len(),
            "row width does not match result table"
        );
        self.rows.push(row);
    }

    /// Append every row of another table with the same columns
    pub fn extend(&mut self, other: ResultTable) {
        debug_assert_eq!(self.columns, other.columns);
        self.rows.extend(other.rows);
    }

    /// Column declarations
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Column names in order
    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    /// Number of columns
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// True if there are no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Iterate rows
    pub fn rows(&self) -> impl Iterator<Item = ResultRow<'_>> {
        (0..self.rows.len()).map(move |index| ResultRow { table: self, index })
    }

    /// Access one row
    pub fn row(&self, index: usize) -> Option<ResultRow<'_>> {
        (index < self.rows.len()).then_some(ResultRow { table: self, index })
    }

    /// Number of rows whose `RESULT` is `FAILURE`
    pub fn failure_count(&self) -> usize {
        self.rows()
            .filter(|r| r.get_str("RESULT") == Some(FAILURE))
            .count()
    }

    /// True if the table has a `RESULT` column and no row failed
    pub fn all_succeeded(&self) -> bool {
        self.column_index("RESULT").is_some() && self.failure_count() == 0
    }

    /// Sort rows by the string form of a column
    pub fn sort_by_column(&mut self, name: &str) {
        if let Some(idx) = self.column_index(name) {
            self.rows.sort_by_key(|row| row[idx].to_string());
        }
    }
}

impl fmt::Display for ResultTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.column_names().join("\t"))?;
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            writeln!(f, "{}", cells.join("\t"))?;
        }
        Ok(())
    }
}

/// Borrowed view of one result row
#[derive(Debug, Clone, Copy)]
pub struct ResultRow<'a> {
    table: &'a ResultTable,
    index: usize,
}

impl<'a> ResultRow<'a> {
    /// Value of a column by name
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        let idx = self.table.column_index(column)?;
        self.table.rows[self.index].get(idx)
    }

    /// String value of a column
    pub fn get_str(&self, column: &str) -> Option<&'a str> {
        self.get(column).and_then(|v| v.as_str())
    }

    /// Integer value of a column
    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(|v| v.as_i64())
    }

    /// All values of the row
    pub fn values(&self) -> &'a [Value] {
        &self.table.rows[self.index]
    }

    /// True if `RESULT` is `SUCCESS`
    pub fn succeeded(&self) -> bool {
        self.get_str("RESULT") == Some(SUCCESS)
    }
}

//! Table schemas and the catalog
//!
//! Table and column names are case-insensitive and stored upper-case.
//! A table is either replicated (a full copy on every site) or partitioned
//! on exactly one column.

use crate::error::{CoercionError, Error, Result};
use crate::types::Row;
use crate::value::{ColumnType, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A column declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name (upper-case)
    pub name: String,
    /// Declared type
    pub column_type: ColumnType,
    /// Whether NULL is allowed
    pub nullable: bool,
    /// Value used when a row does not supply this column
    pub default: Option<Value>,
}

impl ColumnDef {
    /// Create a nullable column without a default
    pub fn new(name: impl AsRef<str>, column_type: ColumnType) -> Self {
        ColumnDef {
            name: name.as_ref().to_uppercase(),
            column_type,
            nullable: true,
            default: None,
        }
    }

    /// Forbid NULL in this column
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Set the default value
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Value to fill in when a source row has no data for this column
    pub fn fill_value(&self) -> std::result::Result<Value, CoercionError> {
        match &self.default {
            Some(v) => v.coerce_to(self.column_type),
            None if self.nullable => Ok(Value::Null),
            None => Err(CoercionError::NullNotAllowed {
                column: self.name.clone(),
            }),
        }
    }
}

/// Schema of one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name (upper-case)
    pub name: String,
    /// Columns in declaration order
    pub columns: Vec<ColumnDef>,
    /// Partitioning column, `None` for replicated tables
    pub partition_column: Option<String>,
    /// Primary key columns (may be empty)
    pub primary_key: Vec<String>,
}

impl TableSchema {
    /// Create a replicated table
    pub fn replicated(name: impl AsRef<str>, columns: Vec<ColumnDef>) -> Self {
        TableSchema {
            name: name.as_ref().to_uppercase(),
            columns,
            partition_column: None,
            primary_key: Vec::new(),
        }
    }

    /// Create a table partitioned on `partition_column`
    pub fn partitioned(
        name: impl AsRef<str>,
        columns: Vec<ColumnDef>,
        partition_column: impl AsRef<str>,
    ) -> Self {
        TableSchema {
            name: name.as_ref().to_uppercase(),
            columns,
            partition_column: Some(partition_column.as_ref().to_uppercase()),
            primary_key: Vec::new(),
        }
    }

    /// Set the primary key
    pub fn with_primary_key<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.primary_key = columns.iter().map(|c| c.as_ref().to_uppercase()).collect();
        self
    }

    /// True if the table is replicated on every site
    pub fn is_replicated(&self) -> bool {
        self.partition_column.is_none()
    }

    /// Position of a column by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let upper = name.to_uppercase();
        self.columns.iter().position(|c| c.name == upper)
    }

    /// Position of the partitioning column
    pub fn partition_column_index(&self) -> Option<usize> {
        self.partition_column
            .as_deref()
            .and_then(|c| self.column_index(c))
    }

    /// Positions of the primary key columns
    pub fn primary_key_indices(&self) -> Vec<usize> {
        self.primary_key
            .iter()
            .filter_map(|c| self.column_index(c))
            .collect()
    }

    /// Validate the declaration itself
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::invalid_input("table name is empty"));
        }
        // Table names become part of snapshot file names
        if self.name.starts_with('.') || self.name.contains(['/', '\\', '\0']) {
            return Err(Error::invalid_input(format!(
                "table name {:?} is not usable in a file name",
                self.name
            )));
        }
        if self.columns.is_empty() {
            return Err(Error::invalid_input(format!(
                "table {} has no columns",
                self.name
            )));
        }
        for (i, col) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name == col.name) {
                return Err(Error::invalid_input(format!(
                    "table {} declares column {} twice",
                    self.name, col.name
                )));
            }
        }
        if let Some(pcol) = &self.partition_column {
            let idx = self.column_index(pcol).ok_or_else(|| {
                Error::invalid_input(format!(
                    "partition column {} is not a column of {}",
                    pcol, self.name
                ))
            })?;
            if self.columns[idx].nullable {
                return Err(Error::invalid_input(format!(
                    "partition column {}.{} must be NOT NULL",
                    self.name, pcol
                )));
            }
        }
        for key in &self.primary_key {
            if self.column_index(key).is_none() {
                return Err(Error::invalid_input(format!(
                    "primary key column {} is not a column of {}",
                    key, self.name
                )));
            }
        }
        Ok(())
    }

    /// Check a row against the declared column types
    pub fn check_row(&self, row: &Row) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::invalid_input(format!(
                "table {} expects {} columns, row has {}",
                self.name,
                self.columns.len(),
                row.len()
            )));
        }
        for (value, col) in row.iter().zip(&self.columns) {
            if value.is_null() && !col.nullable {
                return Err(CoercionError::NullNotAllowed {
                    column: col.name.clone(),
                }
                .into());
            }
            if !value.matches_type(col.column_type) {
                return Err(Error::invalid_input(format!(
                    "column {}.{} is {}, got {}",
                    self.name,
                    col.name,
                    col.column_type,
                    value.type_name()
                )));
            }
        }
        Ok(())
    }

    /// Identity of a row for duplicate detection.
    ///
    /// Uses the primary key when one is declared, otherwise the whole row.
    pub fn row_key(&self, row: &Row) -> Vec<u8> {
        let mut key = Vec::new();
        let pk = self.primary_key_indices();
        if pk.is_empty() {
            for v in row {
                v.write_key_bytes(&mut key);
            }
        } else {
            for i in pk {
                row[i].write_key_bytes(&mut key);
            }
        }
        key
    }
}

/// The set of tables known to a cluster
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    tables: BTreeMap<String, TableSchema>,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table, failing if the name is taken
    pub fn add_table(&mut self, schema: TableSchema) -> Result<()> {
        schema.validate()?;
        if self.tables.contains_key(&schema.name) {
            return Err(Error::invalid_input(format!(
                "table {} already exists",
                schema.name
            )));
        }
        self.tables.insert(schema.name.clone(), schema);
        Ok(())
    }

    /// Remove a table
    pub fn drop_table(&mut self, name: &str) -> Option<TableSchema> {
        self.tables.remove(&name.to_uppercase())
    }

    /// Look up a table by name
    pub fn get(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(&name.to_uppercase())
    }

    /// Look up a table, failing with `TableNotFound`
    pub fn require(&self, name: &str) -> Result<&TableSchema> {
        self.get(name)
            .ok_or_else(|| Error::TableNotFound(name.to_uppercase()))
    }

    /// True if the table exists
    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(&name.to_uppercase())
    }

    /// Table names in sorted order
    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    /// Iterate tables in name order
    pub fn iter(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// Number of tables
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// True if there are no tables
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

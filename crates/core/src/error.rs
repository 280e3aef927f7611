//! Error types for the snapshot engine
//!
//! This module defines the error types shared by every layer.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use crate::value::ColumnType;
use std::io;
use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types shared across the workspace
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Caller supplied an invalid argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Named table is not in the catalog
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// A value could not be converted to a column type
    #[error(transparent)]
    Coercion(#[from] CoercionError),
}

impl Error {
    /// Build an `InvalidInput` error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Build a `Corruption` error
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }
}

/// Failure to convert a value into another column type
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoercionError {
    /// The value does not fit in the target type
    #[error("Value {value} is out of range for type {target}")]
    OutOfRange {
        /// Display form of the offending value
        value: String,
        /// Target column type
        target: ColumnType,
    },

    /// Converting would silently drop a fractional part
    #[error("Value {value} would lose precision as {target}")]
    PrecisionLoss {
        /// Display form of the offending value
        value: String,
        /// Target column type
        target: ColumnType,
    },

    /// The two types have no conversion
    #[error("Type {from} can not be converted to {target}")]
    Incompatible {
        /// Source value type name
        from: &'static str,
        /// Target column type
        target: ColumnType,
    },

    /// Null supplied for a column that forbids it
    #[error("Column {column} is not nullable")]
    NullNotAllowed {
        /// Column name
        column: String,
    },
}

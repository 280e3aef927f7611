//! Responses and call-boundary errors
//!
//! A snapshot operation that runs returns a [`SnapshotResponse`]: a status
//! plus result tables whose `RESULT` column carries per-row outcomes. Only
//! systemic problems (bad parameters, no digests at all, a busy cluster)
//! surface as [`SnapshotError`].

use std::io;

use strata_core::{ColumnInfo, ColumnType, ResultTable, Value, FAILURE};

/// Overall outcome of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    /// Every row succeeded
    Success,
    /// The operation ran but at least one row failed
    OperationalFailure,
    /// Nothing to do; the tables explain why
    GracefulFailure,
}

/// Result of a snapshot operation
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotResponse {
    /// Overall outcome
    pub status: ResponseStatus,
    /// Result tables
    pub results: Vec<ResultTable>,
}

impl SnapshotResponse {
    /// Build a response whose status follows the `RESULT` columns
    pub fn from_tables(results: Vec<ResultTable>) -> Self {
        let failed = results.iter().any(|t| t.failure_count() > 0);
        SnapshotResponse {
            status: if failed {
                ResponseStatus::OperationalFailure
            } else {
                ResponseStatus::Success
            },
            results,
        }
    }

    /// Build a response with an explicit status
    pub fn with_status(status: ResponseStatus, results: Vec<ResultTable>) -> Self {
        SnapshotResponse { status, results }
    }

    /// True if the status is `Success`
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// First result table
    pub fn first(&self) -> Option<&ResultTable> {
        self.results.first()
    }

    /// Result table by position
    pub fn table(&self, index: usize) -> Option<&ResultTable> {
        self.results.get(index)
    }

    /// Failed rows across every table
    pub fn failure_count(&self) -> usize {
        self.results.iter().map(|t| t.failure_count()).sum()
    }
}

/// Errors raised at the call boundary
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// A request parameter is malformed
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The path names a URI scheme other than `file`
    #[error("Unsupported URI scheme: {0}")]
    UnsupportedScheme(String),

    /// No digest exists for the requested snapshot
    #[error("No snapshot related digests files found for nonce {nonce}")]
    NoDigestsFound {
        /// Requested nonce (empty when auto-picking)
        nonce: String,
        /// One row per digest that was looked for
        diagnostics: ResultTable,
    },

    /// No snapshot in the directory can be restored
    #[error("No viable snapshot found in {0}")]
    NoViableSnapshot(String),

    /// Another save or restore holds the cluster
    #[error("Snapshot operation already in progress: {0}")]
    Busy(String),

    /// Snapshot metadata is unreadable
    #[error("Snapshot corrupted: {0}")]
    Corruption(String),

    /// Catalog or row error
    #[error(transparent)]
    Core(#[from] strata_core::Error),

    /// I/O failure outside per-file handling
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SnapshotError {
    /// Build an `InvalidParameter` error
    pub fn invalid(msg: impl Into<String>) -> Self {
        SnapshotError::InvalidParameter(msg.into())
    }
}

/// Result type of snapshot operations
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Columns of the diagnostic table carried by [`SnapshotError::NoDigestsFound`]
pub const DIGEST_DIAGNOSTIC_COLUMNS: &[ColumnInfo] = &[
    ColumnInfo::new("HOST_ID", ColumnType::Integer),
    ColumnInfo::new("PATH", ColumnType::Varchar),
    ColumnInfo::new("NAME", ColumnType::Varchar),
    ColumnInfo::new("RESULT", ColumnType::Varchar),
    ColumnInfo::new("ERR_MSG", ColumnType::Varchar),
];

/// Diagnostic row for a digest that was not found
pub(crate) fn missing_digest_row(host_id: u32, path: &str, name: &str) -> Vec<Value> {
    vec![
        Value::Integer(host_id as i32),
        Value::from(path),
        Value::from(name),
        Value::from(FAILURE),
        Value::from("No snapshot related digests files found"),
    ]
}
